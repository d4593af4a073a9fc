//! Provider handoff for committed, released sends.
//!
//! Runs downstream of the `Send` notification. A record is dispatched at
//! most once: anything already dispatched, cancelled, delivered or still
//! scheduled is passed over.

use crate::batch::{commit_in_chunks, ChunkPolicy};
use chrono::Utc;
use outreach_core::error::OutreachResult;
use outreach_core::event_bus::{notify_ids, EmailTopic, Notifier};
use outreach_core::provider::ProviderGateway;
use outreach_core::store::RecordStore;
use outreach_core::types::{EmailId, EmailRecord};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub dispatched: Vec<EmailId>,
    pub passed_over: Vec<EmailId>,
    pub failed: Vec<(EmailId, String)>,
}

pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn ProviderGateway>,
    notifier: Arc<dyn Notifier>,
    policy: ChunkPolicy,
}

fn is_dispatchable(email: &EmailRecord, now: chrono::DateTime<Utc>) -> bool {
    email.is_sent
        && !email.cancel
        && !email.delivered
        && email.is_released(now)
        && !email.is_dispatched()
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gateway: Arc<dyn ProviderGateway>,
        notifier: Arc<dyn Notifier>,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            policy,
        }
    }

    pub async fn dispatch(&self, ids: &[EmailId]) -> OutreachResult<DispatchReport> {
        let now = Utc::now();
        let mut report = DispatchReport::default();
        let mut updated = Vec::new();

        for mut email in self.store.get_multi(ids).await? {
            if !is_dispatchable(&email, now) {
                debug!(email_id = email.id, "Email not dispatchable, skipping");
                report.passed_over.push(email.id);
                continue;
            }
            match self.gateway.submit(&email).await {
                Ok(provider_id) => {
                    if let Some(provider_id) = provider_id {
                        email.set_provider_id(provider_id);
                    }
                    email.dispatched_at = Some(now);
                    email.updated = now;
                    report.dispatched.push(email.id);
                    updated.push(email);
                }
                Err(e) => {
                    warn!(email_id = email.id, error = %e, "Provider submission failed");
                    report.failed.push((email.id, e.to_string()));
                }
            }
        }

        // Submission already happened; an id that fails to persist is only
        // logged so the caller does not resubmit it.
        let commit = commit_in_chunks(&self.store, updated, self.policy).await;
        for failure in &commit.failures {
            warn!(chunk = failure.index, error = %failure.error, "Failed to persist provider ids");
        }
        notify_ids(self.notifier.as_ref(), EmailTopic::Changed, commit.committed).await?;

        metrics::counter!("outreach_dispatched_total").increment(report.dispatched.len() as u64);
        metrics::counter!("outreach_dispatch_failures_total").increment(report.failed.len() as u64);
        info!(
            dispatched = report.dispatched.len(),
            passed_over = report.passed_over.len(),
            failed = report.failed.len(),
            "Dispatch batch processed"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryEmailStore;
    use crate::testing::RecordingGateway;
    use chrono::Duration as ChronoDuration;
    use outreach_core::event_bus::capture_notifier;
    use outreach_core::types::SendMethod;
    use std::time::Duration;

    fn sent(id: EmailId, method: SendMethod) -> EmailRecord {
        let mut e = EmailRecord::draft(1, "a@x.com", "s");
        e.id = id;
        e.is_sent = true;
        e.method = Some(method);
        e
    }

    #[tokio::test]
    async fn test_dispatch_stores_provider_ids() {
        let store = Arc::new(MemoryEmailStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let notifier = capture_notifier();
        store.seed(sent(1, SendMethod::SendGrid));
        store.seed(sent(2, SendMethod::Outlook));
        let mut future = sent(3, SendMethod::SendGrid);
        future.send_at = Some(Utc::now() + ChronoDuration::hours(1));
        store.seed(future);
        let mut cancelled = sent(4, SendMethod::SendGrid);
        cancelled.cancel = true;
        store.seed(cancelled);
        store.seed(sent(5, SendMethod::Gmail));
        gateway.reject(5);

        let dispatcher = Dispatcher::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            ChunkPolicy::new(300, Duration::from_secs(5)),
        );
        let report = dispatcher.dispatch(&[1, 2, 3, 4, 5]).await.unwrap();

        assert_eq!(report.dispatched, vec![1, 2]);
        assert_eq!(report.passed_over, vec![3, 4]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(store.get_sync(1).unwrap().sendgrid_id.as_deref(), Some("msg1"));
        assert_eq!(notifier.ids_for(EmailTopic::Changed), vec![1, 2]);

        // Replays do not resubmit, even for methods without a provider id.
        let again = dispatcher.dispatch(&[1, 2]).await.unwrap();
        assert!(again.dispatched.is_empty());
        assert!(store.get_sync(2).unwrap().is_dispatched());
        assert_eq!(gateway.submitted(), vec![1, 2]);
    }
}

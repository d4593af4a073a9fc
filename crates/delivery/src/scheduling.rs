//! Scheduled sends: cancellation, listing, archiving and the release sweep.

use crate::batch::{commit_in_chunks, ChunkPolicy};
use crate::error::{DeliveryError, DeliveryResult};
use crate::send::SkippedEmail;
use chrono::Utc;
use outreach_core::cache::{invalidate_keys, CampaignCache};
use outreach_core::campaign_key::derive_key;
use outreach_core::error::OutreachResult;
use outreach_core::event_bus::{notify_ids, EmailTopic, Notifier};
use outreach_core::search::{EmailFilter, PageRequest, SearchIndex, SearchPage, SendAtFilter};
use outreach_core::sender::SenderProfile;
use outreach_core::store::RecordStore;
use outreach_core::types::{EmailId, EmailRecord};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BulkCancelOutcome {
    pub cancelled: Vec<EmailRecord>,
    pub skipped: Vec<SkippedEmail>,
    pub has_errors: bool,
}

/// Result of one pass of the release sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    /// Due records matching the query, across all pages.
    pub total_candidates: usize,
    /// Due records notified in this pass.
    pub processed: usize,
    /// Sends still waiting for their time.
    pub still_scheduled: usize,
}

pub struct SchedulingService {
    store: Arc<dyn RecordStore>,
    index: Arc<dyn SearchIndex>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn CampaignCache>,
    policy: ChunkPolicy,
}

impl SchedulingService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<dyn SearchIndex>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<dyn CampaignCache>,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            store,
            index,
            notifier,
            cache,
            policy,
        }
    }

    async fn owned(&self, sender: &SenderProfile, id: EmailId) -> DeliveryResult<EmailRecord> {
        let email = self
            .store
            .get(id)
            .await?
            .ok_or(DeliveryError::NotFound(id))?;
        if email.created_by != sender.user_id {
            return Err(DeliveryError::Forbidden(id));
        }
        Ok(email)
    }

    /// Cancel one scheduled send. Repeating a cancel is a no-op.
    pub async fn cancel(&self, sender: &SenderProfile, id: EmailId) -> DeliveryResult<EmailRecord> {
        let mut email = self.owned(sender, id).await?;
        if !email.cancel_schedule(Utc::now())? {
            return Ok(email);
        }
        email.updated = Utc::now();
        self.store.put(&email).await?;
        invalidate_keys(self.cache.as_ref(), [derive_key(&email)]).await;
        notify_ids(self.notifier.as_ref(), EmailTopic::Changed, vec![id]).await?;
        info!(email_id = id, "Scheduled email cancelled");
        Ok(email)
    }

    pub async fn bulk_cancel(
        &self,
        sender: &SenderProfile,
        ids: &[EmailId],
    ) -> DeliveryResult<BulkCancelOutcome> {
        let mut seen = HashSet::new();
        let unique: Vec<EmailId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let now = Utc::now();

        let mut skipped = Vec::new();
        let mut changed = Vec::new();
        let mut unchanged = Vec::new();
        for mut email in self.store.get_multi(&unique).await? {
            let id = email.id;
            if email.created_by != sender.user_id {
                skipped.push(SkippedEmail {
                    id,
                    reason: DeliveryError::Forbidden(id).to_string(),
                });
                continue;
            }
            match email.cancel_schedule(now) {
                Ok(true) => {
                    email.updated = now;
                    changed.push(email);
                }
                Ok(false) => unchanged.push(email),
                Err(rejection) => skipped.push(SkippedEmail {
                    id,
                    reason: DeliveryError::from(rejection).to_string(),
                }),
            }
        }

        let report = commit_in_chunks(&self.store, changed.clone(), self.policy).await;
        for failure in &report.failures {
            for id in &failure.ids {
                skipped.push(SkippedEmail {
                    id: *id,
                    reason: failure.error.clone(),
                });
            }
        }
        let committed: HashSet<EmailId> = report.committed.iter().copied().collect();
        let mut cancelled: Vec<EmailRecord> = changed
            .into_iter()
            .filter(|e| committed.contains(&e.id))
            .collect();

        invalidate_keys(self.cache.as_ref(), cancelled.iter().map(derive_key)).await;
        notify_ids(self.notifier.as_ref(), EmailTopic::Changed, report.committed).await?;

        cancelled.extend(unchanged);
        info!(
            user_id = sender.user_id,
            cancelled = cancelled.len(),
            skipped = skipped.len(),
            "Bulk cancel complete"
        );
        Ok(BulkCancelOutcome {
            has_errors: !skipped.is_empty(),
            cancelled,
            skipped,
        })
    }

    /// Cancel every future send the user has pending.
    pub async fn cancel_all_scheduled(
        &self,
        sender: &SenderProfile,
    ) -> DeliveryResult<BulkCancelOutcome> {
        let filter = EmailFilter::scheduled(sender.user_id, Utc::now());
        let mut ids = Vec::new();
        let mut page = PageRequest::first(self.policy.chunk_size.max(1));
        loop {
            let hits = self.index.query_emails(&filter, page).await?;
            let fetched = hits.items.len();
            ids.extend(hits.items.into_iter().map(|e| e.id));
            if fetched == 0 || page.offset + fetched >= hits.total {
                break;
            }
            page = page.next();
        }
        debug!(user_id = sender.user_id, count = ids.len(), "Cancelling all scheduled emails");
        self.bulk_cancel(sender, &ids).await
    }

    pub async fn list_scheduled(
        &self,
        sender: &SenderProfile,
        page: PageRequest,
    ) -> OutreachResult<SearchPage<EmailRecord>> {
        self.index
            .query_emails(&EmailFilter::scheduled(sender.user_id, Utc::now()), page)
            .await
    }

    /// Hide an email from listings and campaign analytics.
    pub async fn archive(&self, sender: &SenderProfile, id: EmailId) -> DeliveryResult<EmailRecord> {
        let mut email = self.owned(sender, id).await?;
        if email.archived {
            return Ok(email);
        }
        email.archived = true;
        email.updated = Utc::now();
        self.store.put(&email).await?;
        invalidate_keys(self.cache.as_ref(), [derive_key(&email)]).await;
        notify_ids(self.notifier.as_ref(), EmailTopic::Changed, vec![id]).await?;
        Ok(email)
    }

    /// Hand one page of due scheduled sends to the dispatcher.
    pub async fn release_due(&self, page: PageRequest) -> OutreachResult<SweepReport> {
        let now = Utc::now();
        let due = self.index.query_emails(&EmailFilter::due(now), page).await?;

        let pending = EmailFilter {
            is_sent: Some(true),
            cancel: Some(false),
            delivered: Some(false),
            send_at: Some(SendAtFilter::Future(now)),
            ..Default::default()
        };
        let still_scheduled = self
            .index
            .query_emails(&pending, PageRequest::first(0))
            .await?
            .total;

        let ids: Vec<EmailId> = due.items.iter().map(|e| e.id).collect();
        invalidate_keys(self.cache.as_ref(), due.items.iter().map(derive_key)).await;
        notify_ids(self.notifier.as_ref(), EmailTopic::Send, ids.clone()).await?;

        metrics::counter!("outreach_scheduled_released_total").increment(ids.len() as u64);
        if !ids.is_empty() {
            info!(released = ids.len(), total_due = due.total, "Released scheduled emails");
        }
        Ok(SweepReport {
            total_candidates: due.total,
            processed: ids.len(),
            still_scheduled,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryEmailStore;
    use chrono::Duration as ChronoDuration;
    use outreach_core::cache::MemoryCampaignCache;
    use outreach_core::event_bus::{capture_notifier, CaptureNotifier};
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryEmailStore>,
        notifier: Arc<CaptureNotifier>,
        cache: Arc<MemoryCampaignCache>,
        service: SchedulingService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryEmailStore::new());
        let notifier = capture_notifier();
        let cache = Arc::new(MemoryCampaignCache::new());
        let service = SchedulingService::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            cache.clone(),
            ChunkPolicy::new(300, Duration::from_secs(5)),
        );
        Harness {
            store,
            notifier,
            cache,
            service,
        }
    }

    fn scheduled(id: EmailId, in_hours: i64) -> EmailRecord {
        let mut e = EmailRecord::draft(7, "a@x.com", "Later");
        e.id = id;
        e.is_sent = true;
        e.send_at = Some(Utc::now() + ChronoDuration::hours(in_hours));
        e
    }

    fn sender() -> SenderProfile {
        SenderProfile::new(7, "me@x.com")
    }

    #[tokio::test]
    async fn test_cancel_scheduled_email() {
        let h = harness();
        h.store.seed(scheduled(1, 2));

        let cancelled = h.service.cancel(&sender(), 1).await.unwrap();
        assert!(cancelled.cancel);
        assert!(h.store.get_sync(1).unwrap().cancel);
        assert_eq!(h.notifier.ids_for(EmailTopic::Changed), vec![1]);
        assert_eq!(h.cache.deleted_keys().len(), 1);

        // Second cancel is a no-op.
        h.service.cancel(&sender(), 1).await.unwrap();
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_rejections() {
        let h = harness();
        let mut delivered = scheduled(1, 2);
        delivered.delivered = true;
        h.store.seed(delivered);
        h.store.seed(scheduled(2, -1));
        let mut foreign = scheduled(3, 2);
        foreign.created_by = 8;
        h.store.seed(foreign);

        assert!(matches!(
            h.service.cancel(&sender(), 1).await,
            Err(DeliveryError::AlreadyDelivered(1))
        ));
        assert!(matches!(
            h.service.cancel(&sender(), 2).await,
            Err(DeliveryError::NotScheduled(2))
        ));
        assert!(matches!(
            h.service.cancel(&sender(), 3).await,
            Err(DeliveryError::Forbidden(3))
        ));
        assert!(matches!(
            h.service.cancel(&sender(), 4).await,
            Err(DeliveryError::NotFound(4))
        ));
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_scheduled() {
        let h = harness();
        for id in 1..=4 {
            h.store.seed(scheduled(id, 3));
        }
        h.store.seed(scheduled(5, -1));

        let outcome = h.service.cancel_all_scheduled(&sender()).await.unwrap();
        assert_eq!(outcome.cancelled.len(), 4);
        assert!(!outcome.has_errors);
        assert!(!h.store.get_sync(5).unwrap().cancel);
        assert_eq!(h.notifier.count(), 1);

        let listed = h
            .service
            .list_scheduled(&sender(), PageRequest::first(10))
            .await
            .unwrap();
        assert_eq!(listed.total, 0);
    }

    #[tokio::test]
    async fn test_release_due() {
        let h = harness();
        h.store.seed(scheduled(1, -1));
        h.store.seed(scheduled(2, -2));
        h.store.seed(scheduled(3, 5));
        let mut cancelled = scheduled(4, -1);
        cancelled.cancel = true;
        h.store.seed(cancelled);

        let report = h.service.release_due(PageRequest::first(1)).await.unwrap();
        assert_eq!(report.total_candidates, 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.still_scheduled, 1);
        assert_eq!(h.notifier.ids_for(EmailTopic::Send).len(), 1);
    }

    #[tokio::test]
    async fn test_archive() {
        let h = harness();
        h.store.seed(scheduled(1, -1));
        let archived = h.service.archive(&sender(), 1).await.unwrap();
        assert!(archived.archived);
        assert!(h.store.get_sync(1).unwrap().archived);
        h.service.archive(&sender(), 1).await.unwrap();
        assert_eq!(h.notifier.count(), 1);
    }
}

//! Notifier implementations: NATS for deployments, an in-process channel
//! for single-node development.

use crate::handler::SyncHandler;
use async_trait::async_trait;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{EmailBatchNotification, EmailTopic, Notifier};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Publishes notifications as JSON on `<prefix>.emails.*` subjects.
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(
        &self,
        topic: EmailTopic,
        notification: &EmailBatchNotification,
    ) -> OutreachResult<()> {
        let payload = serde_json::to_vec(notification)?;
        self.client
            .publish(topic.subject(&self.prefix), payload.into())
            .await
            .map_err(|e| OutreachError::Nats(e.to_string()))?;
        metrics::counter!("outreach_notifications_published_total").increment(1);
        Ok(())
    }
}

/// Hands notifications to a [`SyncHandler`] running on a background task.
pub struct InProcessNotifier {
    sender: mpsc::UnboundedSender<(EmailTopic, EmailBatchNotification)>,
}

impl InProcessNotifier {
    pub fn spawn(handler: Arc<SyncHandler>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(EmailTopic, EmailBatchNotification)>();
        let handle = tokio::spawn(async move {
            while let Some((topic, notification)) = receiver.recv().await {
                if let Err(e) = handler.handle(topic, &notification).await {
                    error!(topic = ?topic, error = %e, "In-process notification handling failed");
                    metrics::counter!("outreach_sync_errors_total").increment(1);
                }
            }
            info!("In-process notifier closed");
        });
        (Self { sender }, handle)
    }
}

#[async_trait]
impl Notifier for InProcessNotifier {
    async fn publish(
        &self,
        topic: EmailTopic,
        notification: &EmailBatchNotification,
    ) -> OutreachResult<()> {
        self.sender
            .send((topic, notification.clone()))
            .map_err(|_| OutreachError::Nats("in-process notifier is closed".into()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handler::CaptureSink;
    use outreach_core::types::EmailRecord;
    use outreach_delivery::MemoryEmailStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_process_notifier_feeds_handler() {
        let store = Arc::new(MemoryEmailStore::new());
        let mut email = EmailRecord::draft(1, "a@x.com", "s");
        email.id = 3;
        store.seed(email);
        let sink = Arc::new(CaptureSink::new());
        let handler = Arc::new(SyncHandler::new(store).with_index(sink.clone()));

        let (notifier, handle) = InProcessNotifier::spawn(handler);
        notifier
            .publish(EmailTopic::Changed, &EmailBatchNotification::new(vec![3]))
            .await
            .unwrap();
        drop(notifier);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink.ids(), vec![3]);
    }
}

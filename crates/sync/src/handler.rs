//! Reaction to one email batch notification.

use outreach_analytics::IndexWriter;
use outreach_core::error::OutreachResult;
use outreach_core::event_bus::{EmailBatchNotification, EmailTopic};
use outreach_core::store::RecordStore;
use outreach_core::types::EmailRecord;
use outreach_delivery::Dispatcher;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Destination for refreshed records.
pub trait IndexSink: Send + Sync {
    fn submit(&self, records: Vec<EmailRecord>) -> usize;
}

impl IndexSink for IndexWriter {
    fn submit(&self, records: Vec<EmailRecord>) -> usize {
        IndexWriter::submit(self, records)
    }
}

/// Keeps what it is given. Used in tests.
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<EmailRecord>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.id)
            .collect()
    }
}

impl IndexSink for CaptureSink {
    fn submit(&self, records: Vec<EmailRecord>) -> usize {
        let count = records.len();
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(records);
        count
    }
}

/// `Send` notifications go to the dispatcher; every notification refreshes
/// the index copy of the affected records.
pub struct SyncHandler {
    store: Arc<dyn RecordStore>,
    dispatcher: Option<Arc<Dispatcher>>,
    index: Option<Arc<dyn IndexSink>>,
}

impl SyncHandler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            dispatcher: None,
            index: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn IndexSink>) -> Self {
        self.index = Some(index);
        self
    }

    pub async fn handle(
        &self,
        topic: EmailTopic,
        notification: &EmailBatchNotification,
    ) -> OutreachResult<()> {
        let ids = &notification.email_ids;
        debug!(topic = ?topic, count = ids.len(), "Handling email notification");

        if topic == EmailTopic::Send {
            if let Some(dispatcher) = &self.dispatcher {
                let report = dispatcher.dispatch(ids).await?;
                if !report.failed.is_empty() {
                    warn!(failed = report.failed.len(), "Some emails were not handed to a provider");
                }
            }
        }

        if let Some(index) = &self.index {
            let records = self.store.get_multi(ids).await?;
            let queued = index.submit(records);
            metrics::counter!("outreach_sync_reindexed_total").increment(queued as u64);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use outreach_core::event_bus::capture_notifier;
    use outreach_delivery::testing::RecordingGateway;
    use outreach_delivery::{ChunkPolicy, MemoryEmailStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_notification_dispatches_and_reindexes() {
        let store = Arc::new(MemoryEmailStore::new());
        let mut email = EmailRecord::draft(1, "a@x.com", "s");
        email.id = 10;
        email.is_sent = true;
        store.seed(email);

        let gateway = Arc::new(RecordingGateway::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            gateway.clone(),
            capture_notifier(),
            ChunkPolicy::new(300, Duration::from_secs(5)),
        ));
        let sink = Arc::new(CaptureSink::new());
        let handler = SyncHandler::new(store.clone())
            .with_dispatcher(dispatcher)
            .with_index(sink.clone());

        handler
            .handle(EmailTopic::Send, &EmailBatchNotification::new(vec![10]))
            .await
            .unwrap();
        assert_eq!(gateway.submitted(), vec![10]);
        assert_eq!(sink.ids(), vec![10]);

        handler
            .handle(EmailTopic::Changed, &EmailBatchNotification::new(vec![10]))
            .await
            .unwrap();
        assert_eq!(gateway.submitted(), vec![10]);
        assert_eq!(sink.ids(), vec![10, 10]);
    }
}

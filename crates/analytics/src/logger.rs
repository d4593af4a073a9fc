//! Asynchronous index writer that batches email records and writes them to
//! ClickHouse. Uses a channel-based architecture for non-blocking submission.

use crate::index::ClickHouseEmailIndex;
use outreach_core::config::ClickHouseConfig;
use outreach_core::types::EmailRecord;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Index writer handle with a background batch writer.
#[derive(Clone)]
pub struct IndexWriter {
    sender: mpsc::Sender<EmailRecord>,
}

impl IndexWriter {
    /// Spawn the background writer over `index`.
    pub fn spawn(index: ClickHouseEmailIndex, config: &ClickHouseConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<EmailRecord>(100_000);

        let writer = BatchWriter { index };
        let batch_size = config.batch_size.max(1);
        let flush_interval = std::time::Duration::from_millis(config.flush_interval_ms);

        tokio::spawn(async move {
            writer.run(receiver, batch_size, flush_interval).await;
        });

        info!("Index writer initialized with ClickHouse backend");

        Self { sender }
    }

    /// Queue records for indexing (non-blocking). Returns how many were queued.
    pub fn submit(&self, records: Vec<EmailRecord>) -> usize {
        let mut queued = 0;
        for record in records {
            let id = record.id;
            if let Err(e) = self.sender.try_send(record) {
                metrics::counter!("outreach_index_dropped_total").increment(1);
                warn!(email_id = id, error = %e, "Index update dropped");
            } else {
                queued += 1;
            }
        }
        metrics::counter!("outreach_index_queued_total").increment(queued as u64);
        queued
    }
}

/// Background writer that batches records and flushes to ClickHouse.
struct BatchWriter {
    index: ClickHouseEmailIndex,
}

impl BatchWriter {
    async fn run(
        self,
        mut receiver: mpsc::Receiver<EmailRecord>,
        batch_size: usize,
        flush_interval: std::time::Duration,
    ) {
        let mut buffer: Vec<EmailRecord> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                received = receiver.recv() => match received {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        self.flush(&mut buffer).await;
                        info!("Index writer channel closed");
                        return;
                    }
                },
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<EmailRecord>) {
        let batch = latest_versions(std::mem::take(buffer));
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        debug!(count = count, "Flushing index batch to ClickHouse");

        match self.index.upsert(&batch).await {
            Ok(_) => {
                metrics::counter!("outreach_index_flushed_total").increment(count as u64);
                debug!(count = count, "Index batch flushed successfully");
            }
            Err(e) => {
                metrics::counter!("outreach_index_flush_errors_total").increment(1);
                error!(error = %e, count = count, "Failed to flush index batch");
            }
        }
    }
}

/// Keep only the last submitted version of each record, in first-seen order.
fn latest_versions(records: Vec<EmailRecord>) -> Vec<EmailRecord> {
    let mut position: HashMap<i64, usize> = HashMap::new();
    let mut latest: Vec<EmailRecord> = Vec::with_capacity(records.len());
    for record in records {
        match position.get(&record.id) {
            Some(&i) => latest[i] = record,
            None => {
                position.insert(record.id, latest.len());
                latest.push(record);
            }
        }
    }
    latest
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_versions_collapses_duplicates() {
        let mut a1 = EmailRecord::draft(1, "a@x.com", "s");
        a1.id = 1;
        let mut b = EmailRecord::draft(1, "b@x.com", "s");
        b.id = 2;
        let mut a2 = a1.clone();
        a2.opened = 3;

        let latest = latest_versions(vec![a1, b, a2]);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, 1);
        assert_eq!(latest[0].opened, 3);
        assert_eq!(latest[1].id, 2);
    }
}

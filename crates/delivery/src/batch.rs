//! Chunked transactional commits with per-chunk failure isolation.
//!
//! Records are split into chunks no larger than the store's batch limit and
//! committed concurrently. Each chunk is atomic on its own; a failed chunk
//! never rolls back another. The report carries the union of committed ids
//! plus one entry per failed chunk.

use outreach_core::store::RecordStore;
use outreach_core::types::{EmailId, EmailRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ChunkFailure {
    pub index: usize,
    pub ids: Vec<EmailId>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct BatchCommitReport {
    /// Ids that committed, in input order.
    pub committed: Vec<EmailId>,
    pub failures: Vec<ChunkFailure>,
    pub chunks: usize,
}

impl BatchCommitReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = EmailId> + '_ {
        self.failures.iter().flat_map(|f| f.ids.iter().copied())
    }
}

/// Chunk sizing and per-chunk timeout.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    pub timeout: Duration,
}

impl ChunkPolicy {
    pub fn new(chunk_size: usize, timeout: Duration) -> Self {
        Self {
            chunk_size,
            timeout,
        }
    }

    fn effective_size(&self, store: &dyn RecordStore) -> usize {
        self.chunk_size.min(store.max_batch_size()).max(1)
    }
}

pub async fn commit_in_chunks(
    store: &Arc<dyn RecordStore>,
    records: Vec<EmailRecord>,
    policy: ChunkPolicy,
) -> BatchCommitReport {
    if records.is_empty() {
        return BatchCommitReport::default();
    }

    let size = policy.effective_size(store.as_ref());
    let mut pending: BTreeMap<usize, Vec<EmailId>> = BTreeMap::new();
    let mut tasks = JoinSet::new();

    let mut chunks = Vec::new();
    let mut iter = records.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect::<Vec<_>>());
    }
    let chunk_count = chunks.len();

    for (index, chunk) in chunks.into_iter().enumerate() {
        let ids: Vec<EmailId> = chunk.iter().map(|r| r.id).collect();
        pending.insert(index, ids.clone());
        let store = Arc::clone(store);
        let timeout = policy.timeout;
        tasks.spawn(async move {
            let result = match tokio::time::timeout(timeout, store.put_multi(&chunk)).await {
                Ok(inner) => inner.map_err(|e| e.to_string()),
                Err(_) => Err(format!("commit timed out after {}s", timeout.as_secs())),
            };
            (index, result)
        });
    }

    let mut committed: BTreeMap<usize, Vec<EmailId>> = BTreeMap::new();
    let mut failures = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(()))) => {
                if let Some(ids) = pending.remove(&index) {
                    debug!(chunk = index, count = ids.len(), "Chunk committed");
                    committed.insert(index, ids);
                }
            }
            Ok((index, Err(error))) => {
                if let Some(ids) = pending.remove(&index) {
                    warn!(chunk = index, count = ids.len(), error = %error, "Chunk commit failed");
                    failures.push(ChunkFailure { index, ids, error });
                }
            }
            Err(e) => warn!(error = %e, "Chunk commit task aborted"),
        }
    }

    // Chunks whose task panicked never reported back.
    for (index, ids) in pending {
        failures.push(ChunkFailure {
            index,
            ids,
            error: "commit task aborted".to_string(),
        });
    }
    failures.sort_by_key(|f| f.index);

    metrics::counter!("outreach_batch_chunks_total").increment(chunk_count as u64);
    metrics::counter!("outreach_batch_chunk_failures_total").increment(failures.len() as u64);

    BatchCommitReport {
        committed: committed.into_values().flatten().collect(),
        failures,
        chunks: chunk_count,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryEmailStore;
    use crate::testing::FlakyStore;

    fn records(n: i64) -> Vec<EmailRecord> {
        (1..=n)
            .map(|id| {
                let mut r = EmailRecord::draft(1, format!("r{id}@x.com"), "s");
                r.id = id;
                r
            })
            .collect()
    }

    fn policy() -> ChunkPolicy {
        ChunkPolicy::new(300, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_650_records_make_three_chunks() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryEmailStore::new());
        let report = commit_in_chunks(&store, records(650), policy()).await;
        assert_eq!(report.chunks, 3);
        assert_eq!(report.committed.len(), 650);
        assert!(!report.has_failures());
        assert_eq!(report.committed.first(), Some(&1));
        assert_eq!(report.committed.last(), Some(&650));
    }

    #[tokio::test]
    async fn test_middle_chunk_failure_is_isolated() {
        let flaky = Arc::new(FlakyStore::new(MemoryEmailStore::new()));
        flaky.fail_batches_containing(450);
        let store: Arc<dyn RecordStore> = flaky.clone();

        let report = commit_in_chunks(&store, records(650), policy()).await;
        assert_eq!(report.chunks, 3);
        assert_eq!(report.committed.len(), 350);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].ids.len(), 300);
        assert!(!report.committed.contains(&450));
        assert!(report.committed.contains(&300));
        assert!(report.committed.contains(&601));

        assert!(flaky.inner().get_sync(1).is_some());
        assert!(flaky.inner().get_sync(450).is_none());
    }

    #[tokio::test]
    async fn test_chunk_size_capped_by_store_limit() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryEmailStore::new());
        let report = commit_in_chunks(
            &store,
            records(10),
            ChunkPolicy::new(10_000, Duration::from_secs(5)),
        )
        .await;
        assert_eq!(report.chunks, 1);

        let report = commit_in_chunks(&store, records(301), ChunkPolicy::new(10_000, Duration::from_secs(5))).await;
        assert_eq!(report.chunks, 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryEmailStore::new());
        let report = commit_in_chunks(&store, Vec::new(), policy()).await;
        assert_eq!(report.chunks, 0);
        assert!(report.committed.is_empty());
    }
}

//! Campaign statistics cache contract.
//!
//! Cache entries are keyed by campaign key (see [`crate::campaign_key`]).
//! A failed invalidation is logged and never fails the write that caused it.

use crate::error::OutreachResult;
use crate::types::CampaignStats;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait CampaignCache: Send + Sync {
    async fn get(&self, key: &str) -> OutreachResult<Option<CampaignStats>>;
    async fn put(&self, key: &str, stats: &CampaignStats) -> OutreachResult<()>;
    async fn delete(&self, key: &str) -> OutreachResult<()>;
}

/// Delete each distinct key once. Returns how many deletions succeeded.
pub async fn invalidate_keys<I>(cache: &dyn CampaignCache, keys: I) -> usize
where
    I: IntoIterator<Item = String>,
{
    let unique: BTreeSet<String> = keys.into_iter().collect();
    let mut invalidated = 0;
    for key in unique {
        match cache.delete(&key).await {
            Ok(()) => invalidated += 1,
            Err(e) => {
                warn!(campaign_key = %key, error = %e, "campaign cache invalidation failed");
                metrics::counter!("outreach_cache_invalidation_failures_total").increment(1);
            }
        }
    }
    invalidated
}

/// Cache that stores nothing.
pub struct NoopCampaignCache;

#[async_trait]
impl CampaignCache for NoopCampaignCache {
    async fn get(&self, _key: &str) -> OutreachResult<Option<CampaignStats>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _stats: &CampaignStats) -> OutreachResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> OutreachResult<()> {
        Ok(())
    }
}

/// Map-backed cache that records every deletion. Used in tests and when no
/// shared cache is configured.
#[derive(Default)]
pub struct MemoryCampaignCache {
    entries: Mutex<HashMap<String, CampaignStats>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryCampaignCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys passed to `delete`, in call order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[async_trait]
impl CampaignCache for MemoryCampaignCache {
    async fn get(&self, key: &str) -> OutreachResult<Option<CampaignStats>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, stats: &CampaignStats) -> OutreachResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), stats.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> OutreachResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
        Ok(())
    }
}

//! In-process campaign stats cache backed by DashMap.
//! Serves as L1 in front of Redis, and as the only tier when Redis is off.

use async_trait::async_trait;
use dashmap::DashMap;
use outreach_core::cache::CampaignCache;
use outreach_core::error::OutreachResult;
use outreach_core::types::CampaignStats;
use std::time::{Duration, Instant};

struct CacheEntry {
    stats: CampaignStats,
    inserted_at: Instant,
}

/// Lock-free local cache of campaign statistics keyed by campaign key.
pub struct LocalCache {
    store: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl LocalCache {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            store: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
        }
    }

    /// Returns None if expired or missing.
    pub fn get(&self, key: &str) -> Option<CampaignStats> {
        let entry = self.store.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(entry.stats.clone())
    }

    pub fn put(&self, key: String, stats: CampaignStats) {
        // Over capacity: skip new keys until the eviction pass runs.
        if self.store.len() >= self.max_entries && !self.store.contains_key(&key) {
            return;
        }
        self.store.insert(
            key,
            CacheEntry {
                stats,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl CampaignCache for LocalCache {
    async fn get(&self, key: &str) -> OutreachResult<Option<CampaignStats>> {
        Ok(LocalCache::get(self, key))
    }

    async fn put(&self, key: &str, stats: &CampaignStats) -> OutreachResult<()> {
        LocalCache::put(self, key.to_string(), stats.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> OutreachResult<()> {
        self.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stats(delivered: u64) -> CampaignStats {
        CampaignStats {
            subject: "Launch".into(),
            delivered,
            show: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_put_get_remove() {
        let cache = LocalCache::new(60, 10);
        cache.put("1-2024-01-01-launch".into(), stats(4));
        assert_eq!(cache.get("1-2024-01-01-launch").unwrap().delivered, 4);
        assert!(cache.remove("1-2024-01-01-launch"));
        assert!(cache.get("1-2024-01-01-launch").is_none());
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = LocalCache::new(0, 10);
        cache.put("k".into(), stats(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        cache.put("k2".into(), stats(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_skips_new_keys() {
        let cache = LocalCache::new(60, 1);
        cache.put("a".into(), stats(1));
        cache.put("b".into(), stats(2));
        cache.put("a".into(), stats(3));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap().delivered, 3);
    }

    #[tokio::test]
    async fn test_trait_delete() {
        let cache = LocalCache::new(60, 10);
        CampaignCache::put(&cache, "k", &stats(2)).await.unwrap();
        assert!(CampaignCache::get(&cache, "k").await.unwrap().is_some());
        CampaignCache::delete(&cache, "k").await.unwrap();
        assert!(CampaignCache::get(&cache, "k").await.unwrap().is_none());
    }
}

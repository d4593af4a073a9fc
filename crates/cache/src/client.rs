//! Redis cache client for campaign statistics.
//! Two-tier caching: LocalCache (L1) -> Redis (L2).
//!
//! The L1 is per process and a delete only clears the local copy, so a
//! multi-node deployment sharing one Redis runs with the L1 off
//! (`redis.local_ttl_secs = 0`).

use crate::local::LocalCache;
use async_trait::async_trait;
use outreach_core::cache::CampaignCache;
use outreach_core::config::RedisConfig;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::types::CampaignStats;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

fn redis_err(e: redis::RedisError) -> OutreachError {
    OutreachError::Cache(e.to_string())
}

fn redis_key(campaign_key: &str) -> String {
    format!("campaign:{campaign_key}")
}

/// Redis-backed campaign cache with an optional local L1 layer.
pub struct RedisCampaignCache {
    client: redis::Client,
    local: Option<Arc<LocalCache>>,
    ttl_secs: u64,
}

fn local_tier(config: &RedisConfig) -> Option<Arc<LocalCache>> {
    match config.l1_ttl_secs() {
        0 => None,
        ttl => Some(Arc::new(LocalCache::new(ttl, 100_000))),
    }
}

impl RedisCampaignCache {
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;

        // Verify connectivity
        let mut conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            client.get_multiplexed_async_connection(),
        )
        .await??;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        let local = local_tier(config);
        if local.is_none() {
            info!("Local campaign cache disabled, every read goes to Redis");
        }

        Ok(Self {
            client,
            local,
            ttl_secs: config.ttl_secs,
        })
    }

    /// Run periodic maintenance (L1 eviction).
    pub async fn maintenance(&self) {
        let Some(local) = &self.local else {
            return;
        };
        let evicted = local.evict_expired();
        if evicted > 0 {
            debug!(evicted = evicted, "Local campaign cache eviction complete");
        }
    }

    pub fn local_cache_size(&self) -> usize {
        self.local.as_ref().map_or(0, |l| l.len())
    }
}

#[async_trait]
impl CampaignCache for RedisCampaignCache {
    async fn get(&self, key: &str) -> OutreachResult<Option<CampaignStats>> {
        if let Some(local) = &self.local {
            if let Some(stats) = local.get(key) {
                metrics::counter!("outreach_campaign_cache_l1_hit").increment(1);
                return Ok(Some(stats));
            }
            metrics::counter!("outreach_campaign_cache_l1_miss").increment(1);
        }

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        let data: Option<String> = conn.get(redis_key(key)).await.map_err(redis_err)?;

        match data {
            Some(json) => {
                let stats: CampaignStats = serde_json::from_str(&json)?;
                if let Some(local) = &self.local {
                    local.put(key.to_string(), stats.clone());
                }
                metrics::counter!("outreach_campaign_cache_l2_hit").increment(1);
                Ok(Some(stats))
            }
            None => {
                metrics::counter!("outreach_campaign_cache_l2_miss").increment(1);
                debug!(campaign_key = key, "Cache miss for campaign stats");
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, stats: &CampaignStats) -> OutreachResult<()> {
        let json = serde_json::to_string(stats)?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        conn.set_ex::<_, _, ()>(redis_key(key), &json, self.ttl_secs)
            .await
            .map_err(redis_err)?;

        if let Some(local) = &self.local {
            local.put(key.to_string(), stats.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> OutreachResult<()> {
        // L1 goes first so a Redis outage cannot leave a stale local hit.
        if let Some(local) = &self.local {
            local.remove(key);
        }

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        conn.del::<_, ()>(redis_key(key)).await.map_err(redis_err)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_local_tier_follows_config() {
        let mut config = RedisConfig::default();
        assert!(local_tier(&config).is_some());

        config.local_ttl_secs = Some(0);
        assert!(local_tier(&config).is_none());

        config.local_ttl_secs = None;
        config.ttl_secs = 1;
        assert!(local_tier(&config).is_none());
    }

    #[test]
    fn test_redis_key_namespaced() {
        assert_eq!(redis_key("7-2024-03-01-launch"), "campaign:7-2024-03-01-launch");
    }
}

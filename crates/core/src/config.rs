use crate::types::SendMethod;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `OUTREACH__`, e.g. `OUTREACH__DELIVERY__CHUNK_SIZE=300`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub limits: ProviderLimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// Empty list disables NATS; notifications are dropped with a log line.
    #[serde(default = "default_nats_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_queue_group")]
    pub queue_group: String,
    #[serde(default = "default_nats_max_reconnects")]
    pub max_reconnects: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Empty list keeps campaign stats in the process-local cache only.
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Lifetime of the in-process L1 copy. Defaults to half of `ttl_secs`;
    /// 0 turns the L1 off. A delete clears only this node's L1, so nodes sharing
    /// one Redis should set 0 to see each other's invalidations.
    #[serde(default)]
    pub local_ttl_secs: Option<u64>,
}

impl RedisConfig {
    pub fn l1_ttl_secs(&self) -> u64 {
        self.local_ttl_secs.unwrap_or(self.ttl_secs / 2)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_clickhouse_db")]
    pub database: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Memory,
    ClickHouse,
}

impl std::str::FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(IndexBackend::Memory),
            "clickhouse" => Ok(IndexBackend::ClickHouse),
            other => Err(format!("unknown index backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Records per transactional commit.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    /// Index page size when scanning a campaign.
    #[serde(default = "default_campaign_page_size")]
    pub campaign_page_size: usize,
    #[serde(default = "default_click_redirect_url")]
    pub click_redirect_url: String,
    #[serde(default = "default_pixel_url")]
    pub pixel_url: String,
    /// Zero disables the release sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Daily send ceilings per provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderLimitsConfig {
    #[serde(default = "default_sendgrid_daily")]
    pub sendgrid_daily: u64,
    #[serde(default = "default_sparkpost_daily")]
    pub sparkpost_daily: u64,
    #[serde(default = "default_smtp_daily")]
    pub smtp_daily: u64,
    #[serde(default = "default_gmail_daily")]
    pub gmail_daily: u64,
    #[serde(default = "default_outlook_daily")]
    pub outlook_daily: u64,
}

// Default functions
fn default_node_id() -> String {
    "outreach-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_nats_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}
fn default_subject_prefix() -> String {
    "outreach".to_string()
}
fn default_queue_group() -> String {
    "outreach-index".to_string()
}
fn default_nats_max_reconnects() -> usize {
    60
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}
fn default_clickhouse_db() -> String {
    "outreach".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_chunk_size() -> usize {
    300
}
fn default_chunk_timeout_secs() -> u64 {
    150
}
fn default_campaign_page_size() -> usize {
    750
}
fn default_click_redirect_url() -> String {
    "https://email2.newsai.co/a".to_string()
}
fn default_pixel_url() -> String {
    "https://email2.newsai.co/".to_string()
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_sendgrid_daily() -> u64 {
    2000
}
fn default_sparkpost_daily() -> u64 {
    2000
}
fn default_smtp_daily() -> u64 {
    2000
}
fn default_gmail_daily() -> u64 {
    500
}
fn default_outlook_daily() -> u64 {
    500
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: default_nats_urls(),
            subject_prefix: default_subject_prefix(),
            queue_group: default_queue_group(),
            max_reconnects: default_nats_max_reconnects(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            ttl_secs: default_ttl_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            local_ttl_secs: None,
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            database: default_clickhouse_db(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            campaign_page_size: default_campaign_page_size(),
            click_redirect_url: default_click_redirect_url(),
            pixel_url: default_pixel_url(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ProviderLimitsConfig {
    pub fn daily_limit(&self, method: SendMethod) -> u64 {
        match method {
            SendMethod::SendGrid => self.sendgrid_daily,
            SendMethod::SparkPost => self.sparkpost_daily,
            SendMethod::Smtp => self.smtp_daily,
            SendMethod::Gmail => self.gmail_daily,
            SendMethod::Outlook => self.outlook_daily,
        }
    }
}

impl Default for ProviderLimitsConfig {
    fn default() -> Self {
        Self {
            sendgrid_daily: default_sendgrid_daily(),
            sparkpost_daily: default_sparkpost_daily(),
            smtp_daily: default_smtp_daily(),
            gmail_daily: default_gmail_daily(),
            outlook_daily: default_outlook_daily(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            nats: NatsConfig::default(),
            redis: RedisConfig::default(),
            clickhouse: ClickHouseConfig::default(),
            index: IndexConfig::default(),
            delivery: DeliveryConfig::default(),
            limits: ProviderLimitsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("OUTREACH")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("nats.urls")
                .with_list_parse_key("redis.urls"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.delivery.chunk_size, 300);
        assert_eq!(config.delivery.chunk_timeout_secs, 150);
        assert_eq!(config.delivery.campaign_page_size, 750);
        assert_eq!(config.limits.sendgrid_daily, 2000);
        assert_eq!(config.limits.gmail_daily, 500);
        assert_eq!(config.index.backend, IndexBackend::Memory);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"delivery": {"chunk_size": 50}, "index": {"backend": "clickhouse"}}"#,
        )
        .unwrap();
        assert_eq!(config.delivery.chunk_size, 50);
        assert_eq!(config.delivery.campaign_page_size, 750);
        assert_eq!(config.index.backend, IndexBackend::ClickHouse);
        assert_eq!(config.api.http_port, 8080);
    }

    #[test]
    fn test_redis_l1_ttl() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.l1_ttl_secs(), redis.ttl_secs / 2);
        redis.local_ttl_secs = Some(0);
        assert_eq!(redis.l1_ttl_secs(), 0);

        let config: AppConfig =
            serde_json::from_str(r#"{"redis": {"ttl_secs": 600, "local_ttl_secs": 30}}"#).unwrap();
        assert_eq!(config.redis.l1_ttl_secs(), 30);
    }

    #[test]
    fn test_index_backend_parse() {
        assert_eq!("ClickHouse".parse::<IndexBackend>().unwrap(), IndexBackend::ClickHouse);
        assert!("elastic".parse::<IndexBackend>().is_err());
    }
}

use thiserror::Error;

pub type OutreachResult<T> = Result<T, OutreachError>;

#[derive(Error, Debug)]
pub enum OutreachError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Batch of {size} records exceeds the store limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Search index error: {0}")]
    Index(String),

    #[error("NATS messaging error: {0}")]
    Nats(String),

    #[error("Redis cache error: {0}")]
    Cache(String),

    #[error("Sender directory error: {0}")]
    Directory(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

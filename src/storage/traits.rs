use crate::record::LogRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable, append-only record store behind one sink.
#[async_trait]
pub trait Storage<R: LogRecord>: Send + Sync {
    /// Append a bulk. Either every record becomes visible to `count` and
    /// `prune` or none does.
    async fn bulk(&self, records: &[R]) -> Result<(), StorageError>;

    /// Number of stored records of `instance_id` with
    /// `period_start <= timestamp < period_end`.
    async fn count(
        &self,
        instance_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// Remove every record with `timestamp < older_than`. Returns how many
    /// records were removed.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

use super::traits::{Storage, StorageError};
use crate::record::{AccessLogRecord, Headers, Protocol};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// DuckDB-backed access log storage.
///
/// Timestamps are stored as UTC microseconds so that period boundaries
/// compare exactly. Headers are JSON text in plain `VARCHAR` columns, so the
/// schema needs no DuckDB extension.
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

impl DuckDbStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::in_memory();
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS access_logs (
                    log_id UUID PRIMARY KEY,
                    ts_us BIGINT NOT NULL,
                    protocol VARCHAR NOT NULL,
                    request_url VARCHAR NOT NULL,
                    response_status UINTEGER NOT NULL,
                    request_headers VARCHAR NOT NULL,
                    response_headers VARCHAR NOT NULL,
                    instance_id VARCHAR NOT NULL,
                    project_id VARCHAR NOT NULL,
                    requested_domain VARCHAR NOT NULL,
                    requested_host VARCHAR NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_access_logs_instance_ts ON access_logs(instance_id, ts_us)",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    /// Most recent records of one instance, newest first.
    #[cfg(test)]
    pub async fn recent(
        &self,
        instance_id: &str,
        limit: usize,
    ) -> Result<Vec<AccessLogRecord>, StorageError> {
        let conn = self.conn.clone();
        let instance_id = instance_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT log_id, ts_us, protocol, request_url, response_status, request_headers,
                        response_headers, instance_id, project_id, requested_domain, requested_host
                 FROM access_logs
                 WHERE instance_id = ?
                 ORDER BY ts_us DESC
                 LIMIT ?",
            )?;

            let rows = stmt.query_map(duckdb::params![instance_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (
                    log_id,
                    ts_us,
                    protocol,
                    request_url,
                    response_status,
                    request_headers,
                    response_headers,
                    instance_id,
                    project_id,
                    requested_domain,
                    requested_host,
                ) = row?;

                records.push(AccessLogRecord {
                    log_id: Uuid::parse_str(&log_id)
                        .map_err(|e| StorageError::Database(format!("invalid log id: {}", e)))?,
                    timestamp: DateTime::from_timestamp_micros(ts_us).ok_or_else(|| {
                        StorageError::Database(format!("invalid timestamp: {}", ts_us))
                    })?,
                    protocol: Protocol::parse(&protocol).ok_or_else(|| {
                        StorageError::Database(format!("unknown protocol: {}", protocol))
                    })?,
                    request_url,
                    response_status,
                    request_headers: serde_json::from_str::<Headers>(&request_headers)?,
                    response_headers: serde_json::from_str::<Headers>(&response_headers)?,
                    instance_id,
                    project_id,
                    requested_domain,
                    requested_host,
                });
            }
            Ok(records)
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl Storage<AccessLogRecord> for DuckDbStorage {
    async fn bulk(&self, records: &[AccessLogRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let records = records.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO access_logs (log_id, ts_us, protocol, request_url, response_status,
                        request_headers, response_headers, instance_id, project_id,
                        requested_domain, requested_host)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )?;

                for record in &records {
                    stmt.execute(duckdb::params![
                        record.log_id.to_string(),
                        record.timestamp.timestamp_micros(),
                        record.protocol.as_str(),
                        record.request_url,
                        record.response_status,
                        serde_json::to_string(&record.request_headers)?,
                        serde_json::to_string(&record.response_headers)?,
                        record.instance_id,
                        record.project_id,
                        record.requested_domain,
                        record.requested_host,
                    ])?;
                }
            }
            tx.commit()?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn count(
        &self,
        instance_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let conn = self.conn.clone();
        let instance_id = instance_id.to_string();
        let start_us = period_start.timestamp_micros();
        let end_us = period_end.timestamp_micros();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM access_logs WHERE instance_id = ? AND ts_us >= ? AND ts_us < ?",
                duckdb::params![instance_id, start_us, end_us],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
        .map_err(join_error)?
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, StorageError> {
        let conn = self.conn.clone();
        let cutoff_us = older_than.timestamp_micros();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let removed = conn.execute(
                "DELETE FROM access_logs WHERE ts_us < ?",
                duckdb::params![cutoff_us],
            )?;
            Ok(removed as u64)
        })
        .await
        .map_err(join_error)?
    }
}

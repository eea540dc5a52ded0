use super::traits::{Storage, StorageError};
use crate::record::LogRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

/// In-process storage.
///
/// Serves as the secondary sink of the binary and as the observable sink in
/// tests: it remembers the size of every bulk it accepted.
pub struct MemoryStorage<R> {
    state: Mutex<MemoryState<R>>,
}

struct MemoryState<R> {
    records: Vec<R>,
    bulks: Vec<usize>,
    failures_pending: usize,
}

impl<R: LogRecord> MemoryStorage<R> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records: Vec::new(),
                bulks: Vec::new(),
                failures_pending: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState<R>> {
        // A panic while holding the lock cannot leave the vectors half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sizes of all accepted bulks, in write order.
    pub fn bulks(&self) -> Vec<usize> {
        self.state().bulks.clone()
    }

    /// Records currently stored (after pruning).
    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    pub fn records(&self) -> Vec<R> {
        self.state().records.clone()
    }

    /// Make the next `n` calls to `bulk` fail without storing anything.
    pub fn fail_next_bulks(&self, n: usize) {
        self.state().failures_pending = n;
    }
}

impl<R: LogRecord> Default for MemoryStorage<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: LogRecord> Storage<R> for MemoryStorage<R> {
    async fn bulk(&self, records: &[R]) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(StorageError::Unavailable("injected bulk failure".to_string()));
        }
        state.records.extend_from_slice(records);
        state.bulks.push(records.len());
        Ok(())
    }

    async fn count(
        &self,
        instance_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let count = self
            .state()
            .records
            .iter()
            .filter(|r| r.instance_id() == instance_id)
            .filter(|r| r.timestamp() >= period_start && r.timestamp() < period_end)
            .count();
        Ok(count as u64)
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut state = self.state();
        let before = state.records.len();
        state.records.retain(|r| r.timestamp() >= older_than);
        Ok((before - state.records.len()) as u64)
    }
}

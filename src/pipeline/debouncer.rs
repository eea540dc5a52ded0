use super::EmitterError;
use crate::clock::Clock;
use crate::config::types::{DebounceConfig, FlushFailurePolicy};
use crate::record::LogRecord;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Buffers records for one sink and decides when they become a bulk.
///
/// All state lives behind one async mutex: appending, the flush decision and
/// the storage write form a single critical section, so concurrent callers
/// can neither double-flush nor observe a half-appended buffer. Records leave
/// the buffer only after the storage acknowledged them (or, under
/// [`FlushFailurePolicy::Drop`], after it refused them), which keeps a
/// cancelled flush from losing anything.
pub struct Debouncer<R: LogRecord> {
    sink: String,
    config: DebounceConfig,
    on_failure: FlushFailurePolicy,
    /// Upper bound on the buffer while refused bulks are retained.
    max_retained: usize,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn Storage<R>>,
    state: Mutex<DebounceState<R>>,
}

struct DebounceState<R> {
    buffer: Vec<R>,
    /// When the time trigger fires next. `None` without a time trigger.
    deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    /// Only complete `max_bulk_size` bulks.
    FullBulks,
    /// Everything buffered, split at `max_bulk_size` when set.
    Everything,
}

impl<R: LogRecord> Debouncer<R> {
    pub fn new(
        sink: impl Into<String>,
        config: DebounceConfig,
        on_failure: FlushFailurePolicy,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage<R>>,
    ) -> Self {
        let deadline = next_deadline(&config, clock.now());
        Self {
            sink: sink.into(),
            config,
            on_failure,
            max_retained: usize::MAX,
            clock,
            storage,
            state: Mutex::new(DebounceState {
                buffer: Vec::new(),
                deadline,
            }),
        }
    }

    /// Under [`FlushFailurePolicy::Retain`], keep at most `max_retained`
    /// records; the oldest are dropped past that.
    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }

    /// Buffer a record and flush when a trigger is met.
    ///
    /// An overdue time trigger flushes what was buffered before this record
    /// arrived; the size trigger is evaluated after appending. Without any
    /// trigger configured the record is written on its own.
    pub async fn add(&self, record: R) -> Result<(), EmitterError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let mut result = Ok(());
        if is_due(&state, now) {
            result = self.flush_locked(&mut state, now, FlushMode::Everything).await;
        }

        state.buffer.push(record);

        if self.config.is_immediate() {
            return result.and(self.flush_locked(&mut state, now, FlushMode::Everything).await);
        }
        if self.config.max_bulk_size > 0 && state.buffer.len() >= self.config.max_bulk_size {
            return result.and(self.flush_locked(&mut state, now, FlushMode::FullBulks).await);
        }
        result
    }

    /// Fire the time trigger if its deadline has passed.
    pub async fn tick(&self) -> Result<(), EmitterError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        if is_due(&state, now) {
            return self.flush_locked(&mut state, now, FlushMode::Everything).await;
        }
        Ok(())
    }

    /// Write everything buffered, regardless of triggers.
    pub async fn flush(&self) -> Result<(), EmitterError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        self.flush_locked(&mut state, now, FlushMode::Everything).await
    }

    /// Prune the sink while holding the buffer lock, so pruning never
    /// interleaves with a flush of the same sink.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, EmitterError> {
        let _state = self.state.lock().await;
        self.storage
            .prune(older_than)
            .await
            .map_err(|source| EmitterError::Cleanup {
                sink: self.sink.clone(),
                source,
            })
    }

    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    async fn flush_locked(
        &self,
        state: &mut DebounceState<R>,
        now: DateTime<Utc>,
        mode: FlushMode,
    ) -> Result<(), EmitterError> {
        state.deadline = next_deadline(&self.config, now);

        loop {
            let len = state.buffer.len();
            let take = match self.config.max_bulk_size {
                0 => len,
                max if mode == FlushMode::FullBulks && len < max => 0,
                max => len.min(max),
            };
            if take == 0 {
                return Ok(());
            }

            match self.storage.bulk(&state.buffer[..take]).await {
                Ok(()) => {
                    state.buffer.drain(..take);
                    debug!(sink = %self.sink, count = take, "Flushed bulk");
                }
                Err(source) => {
                    match self.on_failure {
                        FlushFailurePolicy::Drop => {
                            state.buffer.drain(..take);
                            error!(sink = %self.sink, count = take, error = %source, "Dropped bulk after storage failure");
                        }
                        FlushFailurePolicy::Retain => {
                            warn!(sink = %self.sink, count = take, error = %source, "Storage refused bulk, keeping records buffered");
                            let excess = state.buffer.len().saturating_sub(self.max_retained);
                            if excess > 0 {
                                state.buffer.drain(..excess);
                                error!(
                                    sink = %self.sink,
                                    dropped = excess,
                                    max_retained = self.max_retained,
                                    "Retained backlog full, dropped oldest records"
                                );
                            }
                        }
                    }
                    return Err(EmitterError::Flush {
                        sink: self.sink.clone(),
                        records: take,
                        source,
                    });
                }
            }
        }
    }
}

fn is_due<R>(state: &DebounceState<R>, now: DateTime<Utc>) -> bool {
    state.deadline.is_some_and(|deadline| now >= deadline)
}

fn next_deadline(config: &DebounceConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if config.min_frequency.is_zero() {
        return None;
    }
    let step = chrono::Duration::from_std(config.min_frequency).ok()?;
    now.checked_add_signed(step)
}

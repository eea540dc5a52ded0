use super::{Debouncer, EmitterError};
use crate::clock::Clock;
use crate::config::types::{CleanupConfig, DebounceConfig, EmitterConfig};
use crate::record::LogRecord;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One configured destination: a storage sink, its debouncer and its
/// cleanup schedule.
pub struct Emitter<R: LogRecord> {
    name: String,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn Storage<R>>,
    /// `None` when the sink is disabled.
    debouncer: Option<Debouncer<R>>,
    cleanup: Option<CleanupSchedule>,
}

struct CleanupSchedule {
    config: CleanupConfig,
    step: chrono::Duration,
    keep: chrono::Duration,
    next: Mutex<DateTime<Utc>>,
}

impl CleanupSchedule {
    fn new(sink: &str, config: CleanupConfig, created: DateTime<Utc>) -> Option<Self> {
        if config.interval.is_zero() || config.keep.is_zero() {
            warn!(sink = %sink, ?config, "Ignoring cleanup with zero interval or keep duration");
            return None;
        }
        let (Ok(step), Ok(keep)) = (
            chrono::Duration::from_std(config.interval),
            chrono::Duration::from_std(config.keep),
        ) else {
            warn!(sink = %sink, ?config, "Ignoring cleanup with out-of-range durations");
            return None;
        };
        let next = created.checked_add_signed(step)?;
        Some(Self {
            config,
            step,
            keep,
            next: Mutex::new(next),
        })
    }

    /// Returns the prune cutoff if a cleanup tick is due, and schedules the
    /// next tick on the fixed cadence measured from creation.
    fn take_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        if now < *next {
            return None;
        }
        while *next <= now {
            *next = next.checked_add_signed(self.step)?;
        }
        now.checked_sub_signed(self.keep)
    }
}

impl<R: LogRecord> Emitter<R> {
    pub fn new(
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
        config: &EmitterConfig,
        storage: Arc<dyn Storage<R>>,
    ) -> Self {
        let name = name.into();
        if !config.enabled {
            info!(sink = %name, "Sink disabled");
            return Self {
                name,
                clock,
                storage,
                debouncer: None,
                cleanup: None,
            };
        }

        let debounce = config.debounce.unwrap_or_else(DebounceConfig::default);
        let debouncer = Debouncer::new(
            name.clone(),
            debounce,
            config.on_flush_failure,
            clock.clone(),
            storage.clone(),
        )
        .with_max_retained(config.max_retained);
        let cleanup = config
            .cleanup
            .and_then(|cleanup| CleanupSchedule::new(&name, cleanup, clock.now()));

        info!(
            sink = %name,
            min_frequency = ?debounce.min_frequency,
            max_bulk_size = debounce.max_bulk_size,
            cleanup = ?cleanup.as_ref().map(|c| c.config),
            "Sink enabled"
        );

        Self {
            name,
            clock,
            storage,
            debouncer: Some(debouncer),
            cleanup,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reflects configuration, not runtime health.
    pub fn enabled(&self) -> bool {
        self.debouncer.is_some()
    }

    pub fn storage(&self) -> &Arc<dyn Storage<R>> {
        &self.storage
    }

    /// Hand a record to the debouncer. No-op when disabled.
    pub async fn emit(&self, record: R) -> Result<(), EmitterError> {
        match &self.debouncer {
            Some(debouncer) => debouncer.add(record).await,
            None => Ok(()),
        }
    }

    /// Fire the overdue time trigger and the overdue cleanup, if any.
    ///
    /// Both run even when no record arrived since the last call. When both
    /// fail, the flush error is returned and the cleanup error is logged.
    pub async fn tick(&self) -> Result<(), EmitterError> {
        let Some(debouncer) = &self.debouncer else {
            return Ok(());
        };

        let flushed = debouncer.tick().await;

        let cutoff = self
            .cleanup
            .as_ref()
            .and_then(|cleanup| cleanup.take_due(self.clock.now()));
        let cleaned = match cutoff {
            Some(cutoff) => debouncer.prune(cutoff).await.map(|removed| {
                debug!(sink = %self.name, removed, %cutoff, "Cleaned up sink");
            }),
            None => Ok(()),
        };

        match (flushed, cleaned) {
            (Err(flush), Err(cleanup)) => {
                warn!(sink = %self.name, error = %cleanup, "Cleanup failed");
                Err(flush)
            }
            (flushed, cleaned) => flushed.and(cleaned),
        }
    }

    /// Write everything buffered, regardless of triggers.
    pub async fn flush(&self) -> Result<(), EmitterError> {
        match &self.debouncer {
            Some(debouncer) => debouncer.flush().await,
            None => Ok(()),
        }
    }

    pub async fn buffered(&self) -> usize {
        match &self.debouncer {
            Some(debouncer) => debouncer.buffered().await,
            None => 0,
        }
    }
}

use crate::quota::{NotificationRule, QuotaUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sinks: SinksConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub quotas: Vec<QuotaConfig>,
    #[serde(default)]
    pub driver: DriverConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinksConfig {
    /// The primary sink; quota usage is counted from its storage.
    pub main: EmitterConfig,
    #[serde(default)]
    pub secondary: Option<EmitterConfig>,
}

/// One configured destination for log records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Absent means every record is flushed on its own.
    #[serde(default)]
    pub debounce: Option<DebounceConfig>,
    /// Absent means the sink is never pruned.
    #[serde(default)]
    pub cleanup: Option<CleanupConfig>,
    #[serde(default)]
    pub on_flush_failure: FlushFailurePolicy,
    /// Cap on records kept buffered after refused bulks under `retain`.
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_max_retained() -> usize {
    10_000
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: None,
            cleanup: None,
            on_flush_failure: FlushFailurePolicy::default(),
            max_retained: default_max_retained(),
        }
    }
}

impl EmitterConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_debounce(mut self, debounce: DebounceConfig) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupConfig) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn with_flush_failure(mut self, policy: FlushFailurePolicy) -> Self {
        self.on_flush_failure = policy;
        self
    }

    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }
}

/// Size and time triggers for batching. A zero value disables that trigger;
/// with both disabled every record is flushed on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default, with = "humantime_serde")]
    pub min_frequency: Duration,
    #[serde(default)]
    pub max_bulk_size: usize,
}

impl DebounceConfig {
    pub fn new(min_frequency: Duration, max_bulk_size: usize) -> Self {
        Self {
            min_frequency,
            max_bulk_size,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.min_frequency.is_zero() && self.max_bulk_size == 0
    }
}

/// Every `interval`, records older than `keep` are pruned from the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub keep: Duration,
}

impl CleanupConfig {
    pub fn new(interval: Duration, keep: Duration) -> Self {
        Self { interval, keep }
    }
}

/// What happens to a bulk the storage refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushFailurePolicy {
    /// Discard the bulk and report the error.
    #[default]
    Drop,
    /// Keep the records buffered; the next trigger writes them again.
    Retain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// DuckDB database file, or `:memory:`.
    pub path: PathBuf,
}

/// A statically configured quota for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub instance_id: String,
    #[serde(default)]
    pub unit: QuotaUnit,
    /// Anchor of the first accounting period.
    pub from: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub amount: u64,
    #[serde(default)]
    pub limit: bool,
    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// How often buffered sinks are checked for overdue flushes and cleanups.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}

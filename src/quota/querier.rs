use super::types::{Quota, QuotaUnit};
use crate::clock::Clock;
use crate::config::types::QuotaConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("quota lookup failed for instance '{instance_id}': {message}")]
    Lookup { instance_id: String, message: String },

    #[error("invalid quota for instance '{instance_id}': {message}")]
    Invalid { instance_id: String, message: String },
}

/// Looks up the quota in force for an instance.
///
/// `Ok(None)` means the instance has no quota for `unit`.
#[async_trait]
pub trait QuotaQuerier: Send + Sync {
    async fn resolve(&self, instance_id: &str, unit: QuotaUnit) -> Result<Option<Quota>, QuotaError>;
}

/// Answers every lookup with the same quota.
#[derive(Debug, Clone, Default)]
pub struct FixedQuotaQuerier {
    quota: Option<Quota>,
}

impl FixedQuotaQuerier {
    pub fn new(quota: Option<Quota>) -> Self {
        Self { quota }
    }
}

#[async_trait]
impl QuotaQuerier for FixedQuotaQuerier {
    async fn resolve(&self, _instance_id: &str, _unit: QuotaUnit) -> Result<Option<Quota>, QuotaError> {
        Ok(self.quota.clone())
    }
}

/// Quotas from the config file. Periods repeat every `interval` starting at `from`.
#[derive(Debug)]
pub struct StaticQuotaQuerier {
    clock: Arc<dyn Clock>,
    quotas: HashMap<(String, QuotaUnit), QuotaConfig>,
}

impl StaticQuotaQuerier {
    pub fn new(clock: Arc<dyn Clock>, quotas: Vec<QuotaConfig>) -> Self {
        let quotas = quotas
            .into_iter()
            .map(|q| ((q.instance_id.clone(), q.unit), q))
            .collect();
        Self { clock, quotas }
    }
}

#[async_trait]
impl QuotaQuerier for StaticQuotaQuerier {
    async fn resolve(&self, instance_id: &str, unit: QuotaUnit) -> Result<Option<Quota>, QuotaError> {
        let Some(config) = self.quotas.get(&(instance_id.to_string(), unit)) else {
            return Ok(None);
        };

        let (period_start, period_end) =
            current_period(config.from, config.interval, self.clock.now()).ok_or_else(|| {
                QuotaError::Invalid {
                    instance_id: instance_id.to_string(),
                    message: format!("interval {:?} cannot form a period", config.interval),
                }
            })?;

        Ok(Some(Quota {
            unit,
            amount: config.amount,
            interval: config.interval,
            limit: config.limit,
            period_start,
            period_end,
            notifications: config.notifications.clone(),
        }))
    }
}

/// The period `[start, end)` containing `now`. Before `from` the first period applies.
pub fn current_period(
    from: DateTime<Utc>,
    interval: std::time::Duration,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let step = chrono::Duration::from_std(interval).ok()?;
    let step_us = step.num_microseconds()?;
    if step_us <= 0 {
        return None;
    }

    let elapsed_us = (now - from).num_microseconds()?.max(0);
    let offset_us = (elapsed_us / step_us).checked_mul(step_us)?;
    let start = from.checked_add_signed(chrono::Duration::microseconds(offset_us))?;
    let end = start.checked_add_signed(step)?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;
    use std::time::Duration;

    fn from() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
    }

    fn config(instance_id: &str, amount: u64) -> QuotaConfig {
        QuotaConfig {
            instance_id: instance_id.to_string(),
            unit: QuotaUnit::RequestsAllAuthenticated,
            from: from(),
            interval: Duration::from_secs(30),
            amount,
            limit: true,
            notifications: Vec::new(),
        }
    }

    #[test]
    fn test_current_period() {
        let interval = Duration::from_secs(30);

        let (start, end) = current_period(from(), interval, from()).unwrap();
        assert_eq!(start, from());
        assert_eq!(end, from() + chrono::Duration::seconds(30));

        let now = from() + chrono::Duration::seconds(75);
        let (start, end) = current_period(from(), interval, now).unwrap();
        assert_eq!(start, from() + chrono::Duration::seconds(60));
        assert_eq!(end, from() + chrono::Duration::seconds(90));

        let before = from() - chrono::Duration::seconds(10);
        assert_eq!(current_period(from(), interval, before).unwrap().0, from());

        assert!(current_period(from(), Duration::ZERO, now).is_none());
    }

    #[test]
    fn test_current_period_with_many_elapsed_periods() {
        // Over three billion one-second periods since the anchor.
        let anchor = Utc.with_ymd_and_hms(1920, 1, 1, 0, 0, 0).unwrap();
        let now = from() + chrono::Duration::milliseconds(1500);
        let (start, end) = current_period(anchor, Duration::from_secs(1), now).unwrap();
        assert_eq!(start, from() + chrono::Duration::seconds(1));
        assert_eq!(end, from() + chrono::Duration::seconds(2));

        let now = from() + chrono::Duration::days(10) + chrono::Duration::milliseconds(260);
        let (start, end) = current_period(from(), Duration::from_millis(250), now).unwrap();
        assert_eq!(start, from() + chrono::Duration::days(10) + chrono::Duration::milliseconds(250));
        assert_eq!(end, from() + chrono::Duration::days(10) + chrono::Duration::milliseconds(500));
    }

    #[tokio::test]
    async fn test_static_querier_resolves_configured_instance() {
        let clock = Arc::new(MockClock::new(from() + chrono::Duration::seconds(45)));
        let querier = StaticQuotaQuerier::new(clock, vec![config("inst", 30)]);

        let quota = querier
            .resolve("inst", QuotaUnit::RequestsAllAuthenticated)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quota.amount, 30);
        assert!(quota.limit);
        assert_eq!(quota.period_start, from() + chrono::Duration::seconds(30));
        assert_eq!(quota.period_end, from() + chrono::Duration::seconds(60));

        let other = querier.resolve("other", QuotaUnit::RequestsAllAuthenticated).await.unwrap();
        assert!(other.is_none());
        let other_unit = querier.resolve("inst", QuotaUnit::ActionsAllRunsSeconds).await.unwrap();
        assert!(other_unit.is_none());
    }

    #[tokio::test]
    async fn test_static_querier_rejects_zero_interval() {
        let clock = Arc::new(MockClock::new(from()));
        let mut bad = config("inst", 30);
        bad.interval = Duration::ZERO;
        let querier = StaticQuotaQuerier::new(clock, vec![bad]);

        let err = querier
            .resolve("inst", QuotaUnit::RequestsAllAuthenticated)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Invalid { .. }));
    }
}

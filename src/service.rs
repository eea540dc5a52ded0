//! The pipeline façade used on the request path.
//!
//! `handle` fans a record out to every enabled sink, `limit` answers how much
//! of the tenant's quota is left and reports boundary crossings, and `tick`
//! drives the time-based triggers of all sinks off the injected clock.

use crate::clock::Clock;
use crate::pipeline::{Emitter, EmitterError};
use crate::quota::{
    Claim, NotificationLedger, Quota, QuotaError, QuotaQuerier, QuotaUnit, UsageReporter,
};
use crate::record::LogRecord;
use crate::storage::StorageError;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Every sink that failed during one fan-out.
#[derive(Debug, Error)]
#[error("{} sink(s) failed, first: {first}", .rest.len() + 1)]
pub struct SinkErrors {
    pub first: EmitterError,
    pub rest: Vec<EmitterError>,
}

impl SinkErrors {
    fn collect(results: impl IntoIterator<Item = Result<(), EmitterError>>) -> Result<(), Self> {
        let mut errors = results.into_iter().filter_map(Result::err);
        match errors.next() {
            None => Ok(()),
            Some(first) => Err(Self {
                first,
                rest: errors.collect(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmitterError> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("quota: {0}")]
    Quota(#[from] QuotaError),

    #[error("usage count: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sinks(#[from] SinkErrors),
}

/// Usage of one tenant in its current accounting period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub quota: Quota,
    pub used: u64,
}

impl QuotaStatus {
    /// `None` for quotas that are accounted but not limited.
    pub fn remaining(&self) -> Option<u64> {
        self.quota.limit.then(|| self.quota.remaining(self.used))
    }
}

pub struct Service<R: LogRecord> {
    clock: Arc<dyn Clock>,
    /// The first emitter is the primary sink; usage is counted from its storage.
    emitters: Vec<Emitter<R>>,
    quota_querier: Arc<dyn QuotaQuerier>,
    usage_reporter: Arc<dyn UsageReporter>,
    ledger: NotificationLedger,
    unit: QuotaUnit,
}

impl<R: LogRecord> Service<R> {
    pub fn new(
        clock: Arc<dyn Clock>,
        emitters: Vec<Emitter<R>>,
        quota_querier: Arc<dyn QuotaQuerier>,
        usage_reporter: Arc<dyn UsageReporter>,
    ) -> Self {
        Self {
            clock,
            emitters,
            quota_querier,
            usage_reporter,
            ledger: NotificationLedger::new(),
            unit: QuotaUnit::default(),
        }
    }

    /// Account against a different unit than authenticated requests.
    pub fn with_unit(mut self, unit: QuotaUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn emitters(&self) -> &[Emitter<R>] {
        &self.emitters
    }

    /// True iff at least one sink is enabled.
    pub fn enabled(&self) -> bool {
        self.emitters.iter().any(Emitter::enabled)
    }

    /// Push a record into every enabled sink.
    ///
    /// All sinks are attempted even when one fails.
    pub async fn handle(&self, record: R) -> Result<(), SinkErrors> {
        let record = record.normalize();
        let results = join_all(
            self.emitters
                .iter()
                .filter(|emitter| emitter.enabled())
                .map(|emitter| emitter.emit(record.clone())),
        )
        .await;
        SinkErrors::collect(results)
    }

    /// Remaining allowance of `instance_id`, or `None` when it is not limited.
    pub async fn limit(&self, instance_id: &str) -> Result<Option<u64>, ServiceError> {
        Ok(self
            .quota_status(instance_id)
            .await?
            .and_then(|status| status.remaining()))
    }

    /// Resolve the quota, count usage on the primary sink and report newly
    /// crossed notification boundaries.
    ///
    /// `None` when the pipeline is off or the tenant has no quota. Unlimited
    /// quotas without notification rules skip the count.
    pub async fn quota_status(&self, instance_id: &str) -> Result<Option<QuotaStatus>, ServiceError> {
        if instance_id.is_empty() || !self.enabled() {
            return Ok(None);
        }
        let Some(primary) = self.emitters.first() else {
            return Ok(None);
        };
        let Some(quota) = self.quota_querier.resolve(instance_id, self.unit).await? else {
            return Ok(None);
        };
        if !quota.limit && quota.notifications.is_empty() {
            return Ok(None);
        }

        let used = primary
            .storage()
            .count(instance_id, quota.period_start, quota.period_end)
            .await?;
        debug!(instance_id, used, amount = quota.amount, "Counted quota usage");

        self.notify(instance_id, &quota, used).await;

        Ok(Some(QuotaStatus { quota, used }))
    }

    /// Each notification is delivered on its own; only the ones that failed
    /// go back to the ledger.
    async fn notify(&self, instance_id: &str, quota: &Quota, used: u64) {
        let claims = self.ledger.claim(instance_id, quota, used, self.clock.now());
        if claims.is_empty() {
            return;
        }

        let mut pending = PendingClaims {
            ledger: &self.ledger,
            claims,
        };
        while let Some(claim) = pending.claims.first() {
            let result = self
                .usage_reporter
                .report(std::slice::from_ref(&claim.notification))
                .await;
            let claim = pending.claims.remove(0);
            let notification = &claim.notification;

            match result {
                Ok(()) => info!(
                    instance_id,
                    rule = %notification.rule_id,
                    threshold_percent = notification.threshold_percent,
                    "Reported quota notification"
                ),
                Err(e) => {
                    warn!(
                        instance_id,
                        rule = %notification.rule_id,
                        error = %e,
                        "Reporting quota notification failed, will retry"
                    );
                    self.ledger.release(std::slice::from_ref(&claim));
                }
            }
        }
    }

    /// Fire overdue flushes and cleanups on every sink.
    pub async fn tick(&self) -> Result<(), SinkErrors> {
        SinkErrors::collect(join_all(self.emitters.iter().map(|emitter| emitter.tick())).await)
    }

    /// Write out everything still buffered.
    pub async fn flush(&self) -> Result<(), SinkErrors> {
        SinkErrors::collect(join_all(self.emitters.iter().map(|emitter| emitter.flush())).await)
    }

    /// Call [`Service::tick`] every `every` until `shutdown` is cancelled,
    /// then flush once more.
    pub fn spawn_driver(self: &Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval = ?every, "Timer driver started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = service.tick().await {
                            for err in e.iter() {
                                warn!(error = %err, "Sink tick failed");
                            }
                        }
                    }
                }
            }

            if let Err(e) = service.flush().await {
                for err in e.iter() {
                    error!(error = %err, "Final flush failed");
                }
            }
            info!("Timer driver stopped");
        })
    }
}

/// Claims not yet attempted go back to the ledger when the `limit` future
/// is dropped mid-report.
struct PendingClaims<'a> {
    ledger: &'a NotificationLedger,
    claims: Vec<Claim>,
}

impl Drop for PendingClaims<'_> {
    fn drop(&mut self) {
        self.ledger.release(&self.claims);
    }
}

//! Remembers which usage boundaries have been reported.
//!
//! A boundary is claimed before the reporter runs and released again if the
//! report fails, so concurrent `Limit` calls racing over the same crossing
//! produce one notification, and a failed delivery is retried by the next
//! call. Entries are scoped to the accounting period: a new period starts
//! with nothing reported.

use super::types::{Quota, UsageNotification};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    instance_id: String,
    rule_id: String,
    period_start: DateTime<Utc>,
}

/// A boundary taken by one caller, together with what it replaced.
#[derive(Debug, Clone)]
pub struct Claim {
    pub notification: UsageNotification,
    previous: u64,
}

#[derive(Debug, Default)]
pub struct NotificationLedger {
    reported: Mutex<HashMap<LedgerKey, u64>>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn reported(&self) -> MutexGuard<'_, HashMap<LedgerKey, u64>> {
        self.reported.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim every boundary `used` has newly reached under `quota`.
    pub fn claim(
        &self,
        instance_id: &str,
        quota: &Quota,
        used: u64,
        now: DateTime<Utc>,
    ) -> Vec<Claim> {
        let mut reported = self.reported();
        let mut claims = Vec::new();

        for rule in quota.rules().iter() {
            // Older periods of this rule can never be crossed again.
            reported.retain(|key, _| {
                !(key.instance_id == instance_id
                    && key.rule_id == rule.id
                    && key.period_start < quota.period_start)
            });

            let Some(threshold_percent) = reached_threshold(quota.amount, rule.percent, rule.repeat, used)
            else {
                continue;
            };

            let key = LedgerKey {
                instance_id: instance_id.to_string(),
                rule_id: rule.id.clone(),
                period_start: quota.period_start,
            };
            let previous = reported.get(&key).copied().unwrap_or(0);
            if threshold_percent <= previous {
                continue;
            }
            reported.insert(key, threshold_percent);

            claims.push(Claim {
                notification: UsageNotification {
                    id: notification_id(instance_id, &rule.id, quota.period_start, threshold_percent),
                    instance_id: instance_id.to_string(),
                    unit: quota.unit,
                    rule_id: rule.id.clone(),
                    call_url: rule.call_url.clone(),
                    period_start: quota.period_start,
                    threshold_percent,
                    usage: used,
                    amount: quota.amount,
                    due_at: now,
                },
                previous,
            });
        }

        claims
    }

    /// Give claims back after a failed delivery. A claim that has since been
    /// superseded by a higher boundary stays superseded.
    pub fn release(&self, claims: &[Claim]) {
        let mut reported = self.reported();
        for claim in claims {
            let notification = &claim.notification;
            let key = LedgerKey {
                instance_id: notification.instance_id.clone(),
                rule_id: notification.rule_id.clone(),
                period_start: notification.period_start,
            };
            if reported.get(&key) == Some(&notification.threshold_percent) {
                if claim.previous == 0 {
                    reported.remove(&key);
                } else {
                    reported.insert(key, claim.previous);
                }
            }
        }
    }
}

/// The highest boundary (in percent of `amount`) that `used` has reached.
///
/// Compared as `used * 100 >= amount * percent` so fractional boundaries are
/// not rounded down.
fn reached_threshold(amount: u64, percent: u32, repeat: bool, used: u64) -> Option<u64> {
    if percent == 0 {
        return None;
    }
    let boundary = u128::from(amount) * u128::from(percent);
    let multiple = if boundary == 0 {
        1
    } else {
        u128::from(used) * 100 / boundary
    };
    if multiple == 0 {
        return None;
    }
    let multiple = if repeat { multiple } else { 1 };
    u64::try_from(multiple * u128::from(percent)).ok()
}

fn notification_id(
    instance_id: &str,
    rule_id: &str,
    period_start: DateTime<Utc>,
    threshold_percent: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instance_id.as_bytes());
    hasher.update([0]);
    hasher.update(rule_id.as_bytes());
    hasher.update([0]);
    hasher.update(period_start.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(threshold_percent.to_be_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

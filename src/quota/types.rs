use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;

/// What a quota counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuotaUnit {
    #[default]
    #[serde(rename = "requests.all.authenticated")]
    RequestsAllAuthenticated,
    #[serde(rename = "actions.all.runs.seconds")]
    ActionsAllRunsSeconds,
}

impl std::fmt::Display for QuotaUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaUnit::RequestsAllAuthenticated => write!(f, "requests.all.authenticated"),
            QuotaUnit::ActionsAllRunsSeconds => write!(f, "actions.all.runs.seconds"),
        }
    }
}

/// When to tell the platform about usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: String,
    /// Boundary as a share of the quota amount.
    pub percent: u32,
    /// Also notify at every multiple of the boundary (200 %, 300 %, ...).
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub call_url: Option<String>,
}

impl NotificationRule {
    /// The rule applied to quotas that configure none: usage reached the amount.
    pub fn exhausted() -> Self {
        Self {
            id: "exhausted".to_string(),
            percent: 100,
            repeat: false,
            call_url: None,
        }
    }
}

/// The quota in force for one tenant during one accounting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    pub unit: QuotaUnit,
    pub amount: u64,
    pub interval: Duration,
    /// `false` means usage is accounted but never limited.
    pub limit: bool,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
}

impl Quota {
    /// Rules in force, falling back to [`NotificationRule::exhausted`].
    pub fn rules(&self) -> Cow<'_, [NotificationRule]> {
        if self.notifications.is_empty() {
            Cow::Owned(vec![NotificationRule::exhausted()])
        } else {
            Cow::Borrowed(&self.notifications)
        }
    }

    /// Allowance left, never below zero.
    pub fn remaining(&self, used: u64) -> u64 {
        self.amount.saturating_sub(used)
    }
}

/// Usage crossed a notification boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageNotification {
    /// Stable across retries of the same crossing.
    pub id: String,
    pub instance_id: String,
    pub unit: QuotaUnit,
    pub rule_id: String,
    pub call_url: Option<String>,
    pub period_start: DateTime<Utc>,
    /// The crossed boundary, e.g. 100 or 200 for a repeating 100 % rule.
    pub threshold_percent: u64,
    pub usage: u64,
    pub amount: u64,
    pub due_at: DateTime<Utc>,
}

pub mod ledger;
pub mod querier;
pub mod reporter;
pub mod types;

pub use ledger::{Claim, NotificationLedger};
pub use querier::{FixedQuotaQuerier, QuotaError, QuotaQuerier, StaticQuotaQuerier};
pub use reporter::{LogReporter, ReportError, UsageReporter, UsageReporterFn, WebhookReporter};
pub use types::{NotificationRule, Quota, QuotaUnit, UsageNotification};

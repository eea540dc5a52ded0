use super::types::UsageNotification;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint {url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("usage report rejected: {0}")]
    Rejected(String),
}

/// Delivers usage notifications to whoever bills or warns the tenant.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn report(&self, notifications: &[UsageNotification]) -> Result<(), ReportError>;
}

/// Adapts a plain function into a reporter.
pub struct UsageReporterFn<F>(pub F);

#[async_trait]
impl<F> UsageReporter for UsageReporterFn<F>
where
    F: Fn(&[UsageNotification]) -> Result<(), ReportError> + Send + Sync,
{
    async fn report(&self, notifications: &[UsageNotification]) -> Result<(), ReportError> {
        (self.0)(notifications)
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl UsageReporter for LogReporter {
    async fn report(&self, notifications: &[UsageNotification]) -> Result<(), ReportError> {
        for n in notifications {
            tracing::info!(
                id = %n.id,
                instance_id = %n.instance_id,
                unit = %n.unit,
                rule = %n.rule_id,
                threshold_percent = n.threshold_percent,
                usage = n.usage,
                amount = n.amount,
                "Quota notification due"
            );
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to its rule's `call_url`.
///
/// Notifications without a URL are logged instead.
#[derive(Debug, Clone, Default)]
pub struct WebhookReporter {
    client: reqwest::Client,
}

impl WebhookReporter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UsageReporter for WebhookReporter {
    async fn report(&self, notifications: &[UsageNotification]) -> Result<(), ReportError> {
        for n in notifications {
            let Some(url) = n.call_url.as_deref() else {
                LogReporter.report(std::slice::from_ref(n)).await?;
                continue;
            };

            let response = self.client.post(url).json(n).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ReportError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            tracing::debug!(id = %n.id, url, "Delivered quota notification");
        }
        Ok(())
    }
}

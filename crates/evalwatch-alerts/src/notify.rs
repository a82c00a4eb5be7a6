use std::time::Duration;

use async_trait::async_trait;
use evalwatch_model::{AlertEvent, AlertKind};
use evalwatch_policies::NotifySettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &AlertEvent) -> Result<(), NotifyError>;
}

/// Emits alerts as structured log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &AlertEvent) -> Result<(), NotifyError> {
        match alert.kind {
            AlertKind::Fired => warn!(
                alert_id = %alert.id,
                metric = %alert.metric_name,
                model_id = %alert.model_id,
                severity = alert.severity.as_str(),
                consecutive_failures = alert.consecutive_failures,
                "{}",
                alert.message
            ),
            AlertKind::Resolved => info!(
                alert_id = %alert.id,
                metric = %alert.metric_name,
                model_id = %alert.model_id,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&NotifySettings::default())
    }
}

impl From<&NotifySettings> for RetryPolicy {
    fn from(settings: &NotifySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_backoff_ms: settings.base_backoff_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    NotAttempted,
    Delivered { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl Delivery {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Sends `alert`, retrying with linear backoff. Never fails the caller; the
/// final error is logged and reported in the returned `Delivery`.
pub async fn deliver_with_retry(
    notifier: &dyn Notifier,
    alert: &AlertEvent,
    retry: RetryPolicy,
) -> Delivery {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match notifier.notify(alert).await {
            Ok(()) => return Delivery::Delivered { attempts: attempt },
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        notifier = notifier.name(),
                        alert_id = %alert.id,
                        attempts = attempt,
                        "alert notification failed: {e}"
                    );
                    return Delivery::Failed {
                        attempts: attempt,
                        error: e.to_string(),
                    };
                }
                debug!(notifier = notifier.name(), attempt, "notification attempt failed: {e}");
            }
        }
        tokio::time::sleep(retry.backoff(attempt)).await;
    }
}

use std::collections::BTreeMap;

use evalwatch_model::{Comparator, MetricName, ThresholdConfig};
use serde::{Deserialize, Serialize};

use crate::limits::{
    DEFAULT_COOLDOWN_SECONDS, DEFAULT_FAILURES_TO_ALERT, DEFAULT_JUDGE_MAX_RETRIES,
    DEFAULT_JUDGE_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_EVENTS, DEFAULT_NOTIFY_BASE_BACKOFF_MS,
    DEFAULT_NOTIFY_MAX_ATTEMPTS, DEFAULT_SCORER_TIMEOUT_MS,
};

/// Startup configuration: per-metric thresholds plus pipeline knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdDocument {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub metrics: BTreeMap<String, MetricPolicy>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricPolicy {
    pub comparator: Comparator,
    pub bound: f64,
    /// Sub-field of a structured score; defaults to the scorer's primary field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_failures_to_alert")]
    pub failures_to_alert: u32,
}

impl MetricPolicy {
    #[must_use]
    pub fn new(comparator: Comparator, bound: f64) -> Self {
        Self {
            comparator,
            bound,
            field: None,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            failures_to_alert: DEFAULT_FAILURES_TO_ALERT,
        }
    }

    #[must_use]
    pub fn threshold(&self, metric_name: MetricName) -> ThresholdConfig {
        ThresholdConfig {
            metric_name,
            comparator: self.comparator,
            bound: self.bound,
            field: self.field.clone(),
        }
    }

    #[must_use]
    pub fn alerting(&self) -> AlertPolicy {
        AlertPolicy {
            cooldown_seconds: self.cooldown_seconds,
            failures_to_alert: self.failures_to_alert,
        }
    }
}

/// Alert engine parameters for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPolicy {
    pub cooldown_seconds: u64,
    pub failures_to_alert: u32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            failures_to_alert: DEFAULT_FAILURES_TO_ALERT,
        }
    }
}

impl AlertPolicy {
    #[must_use]
    pub fn cooldown_ms(&self) -> i64 {
        i64::try_from(self.cooldown_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSettings {
    #[serde(default = "default_scorer_timeout_ms")]
    pub scorer_timeout_ms: u64,
    #[serde(default = "default_judge_timeout_ms")]
    pub judge_timeout_ms: u64,
    #[serde(default = "default_judge_max_retries")]
    pub judge_max_retries: u32,
    #[serde(default = "default_max_concurrent_events")]
    pub max_concurrent_events: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scorer_timeout_ms: DEFAULT_SCORER_TIMEOUT_MS,
            judge_timeout_ms: DEFAULT_JUDGE_TIMEOUT_MS,
            judge_max_retries: DEFAULT_JUDGE_MAX_RETRIES,
            max_concurrent_events: DEFAULT_MAX_CONCURRENT_EVENTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifySettings {
    #[serde(default = "default_notify_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_notify_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_NOTIFY_MAX_ATTEMPTS,
            base_backoff_ms: DEFAULT_NOTIFY_BASE_BACKOFF_MS,
        }
    }
}

fn default_cooldown_seconds() -> u64 {
    DEFAULT_COOLDOWN_SECONDS
}

fn default_failures_to_alert() -> u32 {
    DEFAULT_FAILURES_TO_ALERT
}

fn default_scorer_timeout_ms() -> u64 {
    DEFAULT_SCORER_TIMEOUT_MS
}

fn default_judge_timeout_ms() -> u64 {
    DEFAULT_JUDGE_TIMEOUT_MS
}

fn default_judge_max_retries() -> u32 {
    DEFAULT_JUDGE_MAX_RETRIES
}

fn default_max_concurrent_events() -> usize {
    DEFAULT_MAX_CONCURRENT_EVENTS
}

fn default_notify_max_attempts() -> u32 {
    DEFAULT_NOTIFY_MAX_ATTEMPTS
}

fn default_notify_base_backoff_ms() -> u64 {
    DEFAULT_NOTIFY_BASE_BACKOFF_MS
}

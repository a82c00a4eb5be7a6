// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};

use evalwatch_core::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::ids::{AlertId, EventId, MetricName, ModelId, ResultId};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub metric_name: MetricName,
    pub model_id: ModelId,
}

impl AlertKey {
    #[must_use]
    pub fn new(metric_name: MetricName, model_id: ModelId) -> Self {
        Self {
            metric_name,
            model_id,
        }
    }
}

impl Display for AlertKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.metric_name, self.model_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Healthy,
    Degraded,
    Alerting,
}

impl AlertStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Alerting => "alerting",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "alerting" => Some(Self::Alerting),
            _ => None,
        }
    }
}

/// Violation tracking for one (metric, model). Owned by the alert engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertState {
    pub metric_name: MetricName,
    pub model_id: ModelId,
    pub status: AlertStatus,
    pub consecutive_failures: u32,
    pub last_fired_at: Option<TimestampMs>,
    pub last_observed_at: Option<TimestampMs>,
    pub last_observed_event: Option<EventId>,
}

impl AlertState {
    #[must_use]
    pub fn healthy(key: &AlertKey) -> Self {
        Self {
            metric_name: key.metric_name.clone(),
            model_id: key.model_id.clone(),
            status: AlertStatus::Healthy,
            consecutive_failures: 0,
            last_fired_at: None,
            last_observed_at: None,
            last_observed_event: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.metric_name.clone(), self.model_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Fired,
    Resolved,
}

impl AlertKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fired => "fired",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fired" => Some(Self::Fired),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Append-only record of an alert decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertEvent {
    pub id: AlertId,
    pub kind: AlertKind,
    pub metric_name: MetricName,
    pub model_id: ModelId,
    pub fired_at: TimestampMs,
    pub triggering_result_id: ResultId,
    pub severity: Severity,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub consecutive_failures: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Low < Severity::Critical);
        assert_eq!(Severity::parse("high"), Some(Severity::High));
    }

    #[test]
    fn fresh_state_is_healthy() {
        let key = AlertKey::new(
            MetricName::new("toxicity").unwrap(),
            ModelId::new("m1").unwrap(),
        );
        let state = AlertState::healthy(&key);
        assert_eq!(state.status, AlertStatus::Healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.key(), key);
        assert_eq!(key.to_string(), "toxicity@m1");
    }
}

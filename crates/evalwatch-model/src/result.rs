// SPDX-License-Identifier: Apache-2.0

use evalwatch_core::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::event::InferenceEvent;
use crate::ids::{EventId, MetricName, ModelId, ResultId};
use crate::score::Score;
use crate::threshold::ThresholdConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ResultOutcome {
    Scored,
    NotApplicable,
    ScorerError,
    ConfigError,
}

impl ResultOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scored => "scored",
            Self::NotApplicable => "not_applicable",
            Self::ScorerError => "scorer_error",
            Self::ConfigError => "config_error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scored" => Some(Self::Scored),
            "not_applicable" => Some(Self::NotApplicable),
            "scorer_error" => Some(Self::ScorerError),
            "config_error" => Some(Self::ConfigError),
            _ => None,
        }
    }

    /// Only real scores move alert state.
    #[must_use]
    pub const fn is_alertable(self) -> bool {
        matches!(self, Self::Scored)
    }
}

/// One verdict for one (event, metric). Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationResult {
    pub id: ResultId,
    pub event_id: EventId,
    pub model_id: ModelId,
    pub event_timestamp: TimestampMs,
    pub metric_name: MetricName,
    pub outcome: ResultOutcome,
    /// Null for errors and not-applicable results.
    pub score: Option<Score>,
    /// The value the threshold was applied to.
    pub observed_value: Option<f64>,
    pub passed: bool,
    pub threshold_used: Option<ThresholdConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub computed_at: TimestampMs,
}

impl EvaluationResult {
    /// Result skeleton for `event`/`metric`; the caller fills in the verdict.
    #[must_use]
    pub fn for_event(
        event: &InferenceEvent,
        metric_name: MetricName,
        outcome: ResultOutcome,
        computed_at: TimestampMs,
    ) -> Self {
        Self {
            id: ResultId::derive(&event.id, &metric_name),
            event_id: event.id.clone(),
            model_id: event.model_id.clone(),
            event_timestamp: event.timestamp,
            metric_name,
            outcome,
            score: None,
            observed_value: None,
            passed: false,
            threshold_used: None,
            detail: None,
            computed_at,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.outcome.is_alertable() && !self.passed
    }

    #[must_use]
    pub fn order_key(&self) -> (TimestampMs, &EventId, &MetricName) {
        (self.event_timestamp, &self.event_id, &self.metric_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_strings_round_trip() {
        for outcome in [
            ResultOutcome::Scored,
            ResultOutcome::NotApplicable,
            ResultOutcome::ScorerError,
            ResultOutcome::ConfigError,
        ] {
            assert_eq!(ResultOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(ResultOutcome::parse("bogus"), None);
    }

    #[test]
    fn only_scored_failures_count() {
        let event = InferenceEvent::new(
            EventId::new("e").unwrap(),
            TimestampMs(5),
            ModelId::new("m").unwrap(),
            "p",
            "r",
        );
        let mut result = EvaluationResult::for_event(
            &event,
            MetricName::new("toxicity").unwrap(),
            ResultOutcome::ScorerError,
            TimestampMs(6),
        );
        assert!(!result.is_failure());
        result.outcome = ResultOutcome::Scored;
        assert!(result.is_failure());
        result.passed = true;
        assert!(!result.is_failure());
    }
}

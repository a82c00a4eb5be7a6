// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use evalwatch_model::{InferenceEvent, MetricName, ScoreResult, StructuredScore};

use crate::Scorer;

/// Reference tiers (p50, p95, p99) in milliseconds used to bucket a single observation.
pub const LATENCY_TIERS_MS: [(&str, f64); 3] = [("p50", 1000.0), ("p95", 2000.0), ("p99", 5000.0)];

#[must_use]
pub fn latency_bucket(latency_ms: f64) -> &'static str {
    if latency_ms <= LATENCY_TIERS_MS[0].1 {
        "within_p50"
    } else if latency_ms <= LATENCY_TIERS_MS[1].1 {
        "within_p95"
    } else if latency_ms <= LATENCY_TIERS_MS[2].1 {
        "within_p99"
    } else {
        "beyond_p99"
    }
}

/// Stateless: the score is the event's own latency. Windowed percentiles
/// are computed by the result store over persisted latency scores.
pub struct LatencyScorer {
    metric: MetricName,
}

impl LatencyScorer {
    #[must_use]
    pub fn new(metric: MetricName) -> Self {
        Self { metric }
    }
}

#[async_trait]
impl Scorer for LatencyScorer {
    fn metric_name(&self) -> &MetricName {
        &self.metric
    }

    async fn score(&self, event: &InferenceEvent) -> ScoreResult {
        let Some(latency_ms) = event.latency_ms else {
            return ScoreResult::not_applicable("event has no latency_ms");
        };
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            return ScoreResult::not_applicable(format!("latency_ms {latency_ms} is not a duration"));
        }
        ScoreResult::structured(
            StructuredScore::new("latency_ms")
                .field("latency_ms", latency_ms)
                .label("bucket", latency_bucket(latency_ms)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalwatch_core::TimestampMs;
    use evalwatch_model::{EventId, ModelId, Score};

    fn event(latency: Option<f64>) -> InferenceEvent {
        let e = InferenceEvent::new(
            EventId::new("e").unwrap(),
            TimestampMs(0),
            ModelId::new("m").unwrap(),
            "p",
            "r",
        );
        match latency {
            Some(v) => e.with_latency_ms(v),
            None => e,
        }
    }

    #[test]
    fn buckets_are_inclusive_upper_bounds() {
        assert_eq!(latency_bucket(1000.0), "within_p50");
        assert_eq!(latency_bucket(1000.1), "within_p95");
        assert_eq!(latency_bucket(2500.0), "within_p99");
        assert_eq!(latency_bucket(9000.0), "beyond_p99");
    }

    #[tokio::test]
    async fn missing_latency_is_not_applicable() {
        let scorer = LatencyScorer::new(MetricName::new("latency").unwrap());
        assert!(scorer.score(&event(None)).await.is_not_applicable());
        assert!(scorer.score(&event(Some(-1.0))).await.is_not_applicable());
    }

    #[tokio::test]
    async fn score_carries_value_and_bucket() {
        let scorer = LatencyScorer::new(MetricName::new("latency").unwrap());
        let ScoreResult::Scored(Score::Structured(s)) = scorer.score(&event(Some(2500.0))).await
        else {
            panic!("expected structured score");
        };
        assert_eq!(s.primary, "latency_ms");
        assert_eq!(s.get("latency_ms"), Some(2500.0));
        assert_eq!(s.labels.get("bucket").map(String::as_str), Some("within_p99"));
    }
}

// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use evalwatch_model::{InferenceEvent, MetricName, ScoreResult};

use crate::Scorer;

/// Lowercased with whitespace runs collapsed to one space.
#[must_use]
pub fn normalize_for_match(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub struct ExactMatchScorer {
    metric: MetricName,
}

impl ExactMatchScorer {
    #[must_use]
    pub fn new(metric: MetricName) -> Self {
        Self { metric }
    }
}

#[async_trait]
impl Scorer for ExactMatchScorer {
    fn metric_name(&self) -> &MetricName {
        &self.metric
    }

    async fn score(&self, event: &InferenceEvent) -> ScoreResult {
        match event.reference.as_deref() {
            Some(reference) => {
                let equal = normalize_for_match(&event.response) == normalize_for_match(reference);
                ScoreResult::value(if equal { 1.0 } else { 0.0 })
            }
            None => ScoreResult::not_applicable("event has no reference answer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_and_spacing() {
        assert_eq!(normalize_for_match("  Paris\n is  "), "paris is");
        assert_eq!(normalize_for_match("A\tB"), normalize_for_match("a b"));
    }
}

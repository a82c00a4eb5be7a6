// SPDX-License-Identifier: Apache-2.0

use evalwatch_core::TimestampMs;
use evalwatch_model::{
    EvaluationResult, InferenceEvent, MetricName, ResultOutcome, ScoreResult, ThresholdConfig,
};
use evalwatch_policies::evaluate;

/// Turns a scorer outcome into the stored result for (event, metric).
///
/// Errors, non-finite scores and field mismatches fail the metric with no
/// score attached; not-applicable results pass and carry the scorer's reason.
#[must_use]
pub fn build_result(
    event: &InferenceEvent,
    metric: MetricName,
    threshold: ThresholdConfig,
    score: ScoreResult,
    computed_at: TimestampMs,
) -> EvaluationResult {
    if let ScoreResult::Scored(scored) = &score {
        if let Some(field) = scored.non_finite_field() {
            let mut r = scorer_error(
                event,
                metric,
                format!("scorer returned a non-finite `{field}`"),
                computed_at,
            );
            r.threshold_used = Some(threshold);
            return r;
        }
    }
    let verdict = evaluate(&score, &threshold);
    let mut result = match (score, verdict) {
        (_, Err(mismatch)) => {
            let mut r =
                EvaluationResult::for_event(event, metric, ResultOutcome::ConfigError, computed_at);
            r.detail = Some(mismatch.to_string());
            r
        }
        (ScoreResult::Scored(score), Ok(verdict)) => {
            let mut r =
                EvaluationResult::for_event(event, metric, ResultOutcome::Scored, computed_at);
            r.score = Some(score);
            r.observed_value = verdict.observed;
            r.passed = verdict.passed;
            r
        }
        (ScoreResult::NotApplicable { reason }, Ok(_)) => {
            let mut r = EvaluationResult::for_event(
                event,
                metric,
                ResultOutcome::NotApplicable,
                computed_at,
            );
            r.passed = true;
            r.detail = Some(reason);
            r
        }
        (ScoreResult::Error { message }, Ok(_)) => scorer_error(event, metric, message, computed_at),
    };
    result.threshold_used = Some(threshold);
    result
}

pub(crate) fn scorer_error(
    event: &InferenceEvent,
    metric: MetricName,
    message: impl Into<String>,
    computed_at: TimestampMs,
) -> EvaluationResult {
    let mut r = EvaluationResult::for_event(event, metric, ResultOutcome::ScorerError, computed_at);
    r.detail = Some(message.into());
    r
}

pub(crate) fn config_error(
    event: &InferenceEvent,
    metric: MetricName,
    message: impl Into<String>,
    computed_at: TimestampMs,
) -> EvaluationResult {
    let mut r = EvaluationResult::for_event(event, metric, ResultOutcome::ConfigError, computed_at);
    r.detail = Some(message.into());
    r
}

// SPDX-License-Identifier: Apache-2.0

use evalwatch_model::{
    AlertEvent, AlertId, AlertKind, AlertState, AlertStatus, EvaluationResult, Severity,
};
use evalwatch_policies::AlertPolicy;

/// Next state for one key plus the alert event the step emits, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: AlertState,
    pub alert: Option<AlertEvent>,
}

/// Severity from how far `actual` sits past `bound`, relative to the bound.
#[must_use]
pub fn severity_for(actual: f64, bound: f64) -> Severity {
    let ratio = (actual - bound).abs() / bound.abs().max(f64::EPSILON);
    if ratio < 0.10 {
        Severity::Low
    } else if ratio < 0.25 {
        Severity::Medium
    } else if ratio < 0.50 {
        Severity::High
    } else {
        Severity::Critical
    }
}

/// Applies one result to `current`.
///
/// Only scored results move the machine; anything else returns `current`
/// unchanged. The step's clock is the result's event timestamp, never earlier
/// than the last observation for the key.
#[must_use]
pub fn transition(current: &AlertState, result: &EvaluationResult, policy: &AlertPolicy) -> Transition {
    if !result.outcome.is_alertable() {
        return Transition {
            state: current.clone(),
            alert: None,
        };
    }
    let now = current
        .last_observed_at
        .map_or(result.event_timestamp, |last| last.max(result.event_timestamp));
    let mut next = current.clone();
    next.last_observed_at = Some(now);
    next.last_observed_event = Some(result.event_id.clone());

    if result.passed {
        let alert = (current.status == AlertStatus::Alerting)
            .then(|| build_alert(AlertKind::Resolved, &next, result, now, Severity::Low));
        next.status = AlertStatus::Healthy;
        next.consecutive_failures = 0;
        return Transition { state: next, alert };
    }

    next.consecutive_failures = current.consecutive_failures.saturating_add(1);
    if next.status == AlertStatus::Healthy {
        next.status = AlertStatus::Degraded;
    }
    let cooled_down = current
        .last_fired_at
        .map_or(true, |fired| now.millis_since(fired) >= policy.cooldown_ms());
    let alert = if next.consecutive_failures >= policy.failures_to_alert && cooled_down {
        next.status = AlertStatus::Alerting;
        next.last_fired_at = Some(now);
        let severity = match (result.observed_value, result.threshold_used.as_ref()) {
            (Some(actual), Some(threshold)) => severity_for(actual, threshold.bound),
            _ => Severity::Medium,
        };
        Some(build_alert(AlertKind::Fired, &next, result, now, severity))
    } else {
        None
    };
    Transition { state: next, alert }
}

fn build_alert(
    kind: AlertKind,
    state: &AlertState,
    result: &EvaluationResult,
    at: evalwatch_core::TimestampMs,
    severity: Severity,
) -> AlertEvent {
    let threshold_value = result.threshold_used.as_ref().map(|t| t.bound);
    let actual = result
        .observed_value
        .map_or_else(|| "n/a".to_string(), |v| format!("{v}"));
    let message = match kind {
        AlertKind::Fired => {
            let bound = result
                .threshold_used
                .as_ref()
                .map_or_else(|| "unset".to_string(), |t| format!("{} {}", t.comparator, t.bound));
            format!(
                "{} for {} is {actual}, outside threshold {bound} after {} consecutive failures",
                state.metric_name, state.model_id, state.consecutive_failures
            )
        }
        AlertKind::Resolved => format!(
            "{} for {} recovered at {actual}",
            state.metric_name, state.model_id
        ),
    };
    AlertEvent {
        id: AlertId::derive(
            &state.metric_name,
            &state.model_id,
            at,
            &result.id,
            kind.as_str(),
        ),
        kind,
        metric_name: state.metric_name.clone(),
        model_id: state.model_id.clone(),
        fired_at: at,
        triggering_result_id: result.id.clone(),
        severity,
        threshold_value,
        actual_value: result.observed_value,
        consecutive_failures: state.consecutive_failures,
        message,
    }
}

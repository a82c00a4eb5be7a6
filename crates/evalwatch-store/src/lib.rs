#![forbid(unsafe_code)]
//! Append-only persistence for evaluation results and alert decisions.

use async_trait::async_trait;
use evalwatch_core::TimestampMs;
use evalwatch_model::{
    AlertEvent, AlertKey, AlertState, EvaluationResult, EventId, InferenceEvent, MetricName,
    ModelId,
};
use serde::{Deserialize, Serialize};

mod memory;
mod sqlite;
mod stats;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SQLITE_SCHEMA_VERSION};
pub use stats::{nearest_rank_percentile, LatencyStats, MetricSummary};

pub const CRATE_NAME: &str = "evalwatch-store";

pub const DEFAULT_QUERY_LIMIT: usize = 1000;
pub const MAX_QUERY_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreErrorCode {
    Io,
    Sql,
    Conflict,
    Decode,
    Validation,
}

impl StoreErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Sql => "sql",
            Self::Conflict => "conflict",
            Self::Decode => "decode",
            Self::Validation => "validation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for StoreError {}

/// Result query. Time bounds apply to the event timestamp, `[since, until)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFilter {
    pub since: Option<TimestampMs>,
    pub until: Option<TimestampMs>,
    pub model_id: Option<ModelId>,
    pub metric_name: Option<MetricName>,
    pub event_id: Option<EventId>,
    pub passed: Option<bool>,
    pub limit: Option<usize>,
    /// Newest first instead of the default chronological order.
    #[serde(default)]
    pub newest_first: bool,
}

impl ResultFilter {
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT)
    }

    #[must_use]
    pub fn matches(&self, r: &EvaluationResult) -> bool {
        self.since.map_or(true, |s| r.event_timestamp >= s)
            && self.until.map_or(true, |u| r.event_timestamp < u)
            && self.model_id.as_ref().map_or(true, |m| &r.model_id == m)
            && self.metric_name.as_ref().map_or(true, |m| &r.metric_name == m)
            && self.event_id.as_ref().map_or(true, |e| &r.event_id == e)
            && self.passed.map_or(true, |p| r.passed == p)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub since: Option<TimestampMs>,
    pub until: Option<TimestampMs>,
    pub model_id: Option<ModelId>,
    pub metric_name: Option<MetricName>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT)
    }

    #[must_use]
    pub fn matches(&self, a: &AlertEvent) -> bool {
        self.since.map_or(true, |s| a.fired_at >= s)
            && self.until.map_or(true, |u| a.fired_at < u)
            && self.model_id.as_ref().map_or(true, |m| &a.model_id == m)
            && self.metric_name.as_ref().map_or(true, |m| &a.metric_name == m)
    }
}

/// Window over scored results of one latency metric, `[since, until)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyWindow {
    pub metric_name: MetricName,
    pub since: Option<TimestampMs>,
    pub until: Option<TimestampMs>,
    pub model_id: Option<ModelId>,
}

impl LatencyWindow {
    #[must_use]
    pub fn new(metric_name: MetricName) -> Self {
        Self {
            metric_name,
            since: None,
            until: None,
            model_id: None,
        }
    }

    #[must_use]
    pub fn between(mut self, since: TimestampMs, until: TimestampMs) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    #[must_use]
    pub fn for_model(mut self, model_id: ModelId) -> Self {
        self.model_id = Some(model_id);
        self
    }

    fn as_result_filter(&self) -> ResultFilter {
        ResultFilter {
            since: self.since,
            until: self.until,
            model_id: self.model_id.clone(),
            metric_name: Some(self.metric_name.clone()),
            ..ResultFilter::default()
        }
    }
}

/// Storage contract. Results and alert events are never updated or deleted;
/// alert state is the single mutable record and is replaced wholesale.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Writes the event and all of its results in one transaction. A result
    /// whose (event, metric) pair is already stored fails the whole batch
    /// with `StoreErrorCode::Conflict`.
    async fn append_evaluation(
        &self,
        event: &InferenceEvent,
        results: &[EvaluationResult],
    ) -> Result<(), StoreError>;

    async fn get_event(&self, id: &EventId) -> Result<Option<InferenceEvent>, StoreError>;

    async fn query_results(&self, filter: &ResultFilter) -> Result<Vec<EvaluationResult>, StoreError>;

    async fn recent_results(&self, limit: usize) -> Result<Vec<EvaluationResult>, StoreError> {
        self.query_results(&ResultFilter {
            limit: Some(limit),
            newest_first: true,
            ..ResultFilter::default()
        })
        .await
    }

    async fn count_results(&self) -> Result<u64, StoreError>;

    /// Percentiles over the scored `observed_value`s in the window.
    async fn latency_stats(&self, window: &LatencyWindow) -> Result<Option<LatencyStats>, StoreError>;

    async fn metrics_summary(&self, since: Option<TimestampMs>) -> Result<Vec<MetricSummary>, StoreError>;

    async fn query_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertEvent>, StoreError>;

    async fn load_alert_state(&self, key: &AlertKey) -> Result<Option<AlertState>, StoreError>;

    /// Persists `state` and, when present, appends `alert`, atomically.
    async fn commit_alert_state(
        &self,
        state: &AlertState,
        alert: Option<&AlertEvent>,
    ) -> Result<(), StoreError>;

    /// Upserts `state` with no accompanying alert event.
    async fn save_alert_state(&self, state: &AlertState) -> Result<(), StoreError> {
        self.commit_alert_state(state, None).await
    }

    async fn alert_states(&self) -> Result<Vec<AlertState>, StoreError>;
}

/// Rejects results that belong to another event or carry a NaN or infinite
/// value; either would corrupt an append-only table.
fn check_batch(event: &InferenceEvent, results: &[EvaluationResult]) -> Result<(), StoreError> {
    for r in results {
        if r.event_id != event.id {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("result {} does not belong to event {}", r.id, event.id),
            ));
        }
        let bad_score = r.score.as_ref().and_then(|s| s.non_finite_field());
        let bad_observed = r.observed_value.filter(|v| !v.is_finite()).map(|_| "observed_value");
        if let Some(field) = bad_score.or(bad_observed) {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("result {} has a non-finite `{field}`", r.id),
            ));
        }
    }
    Ok(())
}

fn sort_results(results: &mut [EvaluationResult], newest_first: bool) {
    results.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    if newest_first {
        results.reverse();
    }
}

fn scored_values(results: &[EvaluationResult]) -> Vec<f64> {
    results
        .iter()
        .filter(|r| r.outcome == evalwatch_model::ResultOutcome::Scored)
        .filter_map(|r| r.observed_value)
        .filter(|v| v.is_finite())
        .collect()
}

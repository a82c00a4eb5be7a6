// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use evalwatch_core::TimestampMs;
use evalwatch_model::{
    AlertEvent, AlertId, AlertKey, AlertState, EvaluationResult, EventId, InferenceEvent,
    MetricName, ResultId, ResultOutcome,
};
use tokio::sync::Mutex;

use crate::{
    check_batch, scored_values, sort_results, AlertFilter, LatencyStats, LatencyWindow, MetricSummary,
    ResultFilter, ResultStore, StoreError, StoreErrorCode,
};

#[derive(Default)]
struct MemoryInner {
    events: BTreeMap<EventId, InferenceEvent>,
    results: Vec<EvaluationResult>,
    result_ids: BTreeSet<ResultId>,
    alerts: Vec<AlertEvent>,
    alert_ids: BTreeSet<AlertId>,
    states: BTreeMap<AlertKey, AlertState>,
}

/// In-process store for tests and dry runs, with write-failure injection.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_writes: AtomicBool,
    fail_alert_writes: AtomicBool,
    pub evaluation_writes: AtomicU64,
    pub state_writes: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `append_evaluation` calls fail with an io error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `commit_alert_state` calls fail with an io error.
    pub fn set_fail_alert_writes(&self, fail: bool) {
        self.fail_alert_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn append_evaluation(
        &self,
        event: &InferenceEvent,
        results: &[EvaluationResult],
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::new(StoreErrorCode::Io, "injected write failure"));
        }
        check_batch(event, results)?;
        let mut inner = self.inner.lock().await;
        let mut batch_ids = BTreeSet::new();
        for r in results {
            if inner.result_ids.contains(&r.id) || !batch_ids.insert(r.id.clone()) {
                return Err(StoreError::new(
                    StoreErrorCode::Conflict,
                    format!("result for ({}, {}) already recorded", r.event_id, r.metric_name),
                ));
            }
        }
        inner
            .events
            .entry(event.id.clone())
            .or_insert_with(|| event.clone());
        for r in results {
            inner.result_ids.insert(r.id.clone());
            inner.results.push(r.clone());
        }
        self.evaluation_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<InferenceEvent>, StoreError> {
        Ok(self.inner.lock().await.events.get(id).cloned())
    }

    async fn query_results(&self, filter: &ResultFilter) -> Result<Vec<EvaluationResult>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<EvaluationResult> = inner
            .results
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_results(&mut out, filter.newest_first);
        out.truncate(filter.effective_limit());
        Ok(out)
    }

    async fn count_results(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().await.results.len() as u64)
    }

    async fn latency_stats(&self, window: &LatencyWindow) -> Result<Option<LatencyStats>, StoreError> {
        let filter = window.as_result_filter();
        let inner = self.inner.lock().await;
        let in_window: Vec<EvaluationResult> = inner
            .results
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(LatencyStats::from_values(scored_values(&in_window)))
    }

    async fn metrics_summary(&self, since: Option<TimestampMs>) -> Result<Vec<MetricSummary>, StoreError> {
        let inner = self.inner.lock().await;
        let mut grouped: BTreeMap<MetricName, Vec<f64>> = BTreeMap::new();
        for r in &inner.results {
            if r.outcome != ResultOutcome::Scored || since.is_some_and(|s| r.event_timestamp < s) {
                continue;
            }
            if let Some(v) = r.observed_value {
                grouped.entry(r.metric_name.clone()).or_default().push(v);
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(metric_name, values)| {
                let count = values.len() as u64;
                MetricSummary {
                    metric_name,
                    count,
                    avg: values.iter().sum::<f64>() / count as f64,
                    min: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect())
    }

    async fn query_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertEvent>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<AlertEvent> = inner
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.fired_at, &a.id).cmp(&(b.fired_at, &b.id)));
        out.truncate(filter.effective_limit());
        Ok(out)
    }

    async fn load_alert_state(&self, key: &AlertKey) -> Result<Option<AlertState>, StoreError> {
        Ok(self.inner.lock().await.states.get(key).cloned())
    }

    async fn commit_alert_state(
        &self,
        state: &AlertState,
        alert: Option<&AlertEvent>,
    ) -> Result<(), StoreError> {
        if self.fail_alert_writes.load(Ordering::SeqCst) {
            return Err(StoreError::new(StoreErrorCode::Io, "injected alert write failure"));
        }
        let mut inner = self.inner.lock().await;
        if let Some(alert) = alert {
            if !inner.alert_ids.insert(alert.id.clone()) {
                return Err(StoreError::new(
                    StoreErrorCode::Conflict,
                    format!("alert {} already recorded", alert.id),
                ));
            }
            inner.alerts.push(alert.clone());
        }
        inner.states.insert(state.key(), state.clone());
        self.state_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn alert_states(&self) -> Result<Vec<AlertState>, StoreError> {
        Ok(self.inner.lock().await.states.values().cloned().collect())
    }
}

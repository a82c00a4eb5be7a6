// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use evalwatch_alerts::{AlertEngine, AlertOutcome};
use evalwatch_core::Clock;
use evalwatch_model::{EvaluationResult, EventId, InferenceEvent, MetricName, ScoreResult, ThresholdConfig};
use evalwatch_policies::ThresholdDocument;
use evalwatch_scorers::{Scorer, ScorerRegistry};
use evalwatch_store::ResultStore;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{PipelineError, PipelineErrorCode};
use crate::verdict::{build_result, config_error, scorer_error};

/// Outcome of one persisted evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub event_id: EventId,
    pub results: Vec<EvaluationResult>,
    pub alerts: Vec<AlertOutcome>,
    /// Set when alert processing stopped early; the results are still stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_error: Option<String>,
}

/// A spawned scorer that is aborted if the evaluation is dropped first.
struct ScorerTask {
    metric: MetricName,
    threshold: ThresholdConfig,
    handle: JoinHandle<Result<ScoreResult, Elapsed>>,
}

impl Drop for ScorerTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Slot {
    Ready(EvaluationResult),
    Running(ScorerTask),
}

pub struct Orchestrator {
    registry: Arc<ScorerRegistry>,
    document: Arc<ThresholdDocument>,
    store: Arc<dyn ResultStore>,
    alerts: Arc<AlertEngine>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<ScorerRegistry>,
        document: Arc<ThresholdDocument>,
        store: Arc<dyn ResultStore>,
        alerts: Arc<AlertEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            document,
            store,
            alerts,
            clock,
        }
    }

    #[must_use]
    pub fn document(&self) -> &ThresholdDocument {
        &self.document
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Metrics that are both configured and registered.
    #[must_use]
    pub fn default_metrics(&self) -> Vec<MetricName> {
        self.document
            .metric_names()
            .into_iter()
            .filter(|m| self.registry.get(m).is_some())
            .collect()
    }

    fn scorer_timeout(&self) -> Duration {
        Duration::from_millis(self.document.pipeline.scorer_timeout_ms)
    }

    /// Scores `event` without touching the store or the alert engine.
    ///
    /// Returns one result per distinct metric, sorted by metric name.
    pub async fn score(
        &self,
        event: &InferenceEvent,
        metrics: &[MetricName],
    ) -> Result<Vec<EvaluationResult>, PipelineError> {
        event
            .validate()
            .map_err(|e| PipelineError::new(PipelineErrorCode::InvalidEvent, e.to_string()))?;
        let wanted: BTreeSet<&MetricName> = metrics.iter().collect();
        let shared = Arc::new(event.clone());
        let timeout = self.scorer_timeout();

        let mut slots = Vec::with_capacity(wanted.len());
        for metric in wanted {
            let scorer = self.registry.get(metric);
            let threshold = self.document.threshold_for(metric);
            let slot = match (scorer, threshold) {
                (None, _) => Slot::Ready(scorer_error(
                    event,
                    metric.clone(),
                    format!("no scorer registered for metric `{metric}`"),
                    self.clock.now(),
                )),
                (Some(_), None) => Slot::Ready(config_error(
                    event,
                    metric.clone(),
                    format!("no threshold configured for metric `{metric}`"),
                    self.clock.now(),
                )),
                (Some(scorer), Some(threshold)) => Slot::Running(ScorerTask {
                    metric: metric.clone(),
                    threshold,
                    handle: spawn_scorer(scorer, Arc::clone(&shared), timeout),
                }),
            };
            slots.push(slot);
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let result = match slot {
                Slot::Ready(result) => result,
                Slot::Running(mut task) => {
                    let joined = (&mut task.handle).await;
                    let computed_at = self.clock.now();
                    let metric = task.metric.clone();
                    match joined {
                        Ok(Ok(score)) => {
                            build_result(event, metric, task.threshold.clone(), score, computed_at)
                        }
                        Ok(Err(_)) => {
                            warn!(metric = %metric, event_id = %event.id, "scorer timed out");
                            with_threshold(
                                scorer_error(
                                    event,
                                    metric,
                                    format!("scorer timed out after {}ms", timeout.as_millis()),
                                    computed_at,
                                ),
                                &task.threshold,
                            )
                        }
                        Err(join) => {
                            error!(metric = %metric, event_id = %event.id, "scorer task failed: {join}");
                            let message = if join.is_panic() {
                                "scorer panicked".to_string()
                            } else {
                                format!("scorer task failed: {join}")
                            };
                            with_threshold(
                                scorer_error(event, metric, message, computed_at),
                                &task.threshold,
                            )
                        }
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Scores, persists and alerts on one event, returning its results.
    pub async fn evaluate(
        &self,
        event: &InferenceEvent,
        metrics: &[MetricName],
    ) -> Result<Vec<EvaluationResult>, PipelineError> {
        Ok(self.evaluate_report(event, metrics).await?.results)
    }

    /// Like [`Orchestrator::evaluate`], also reporting alert outcomes.
    ///
    /// The event and its results are written in one transaction before any
    /// alert work; a failed write returns `StoreWrite` and skips alerting.
    #[instrument(name = "pipeline_evaluate", skip_all, fields(event_id = %event.id, model_id = %event.model_id))]
    pub async fn evaluate_report(
        &self,
        event: &InferenceEvent,
        metrics: &[MetricName],
    ) -> Result<EvaluationReport, PipelineError> {
        let results = self.score(event, metrics).await?;
        self.store.append_evaluation(event, &results).await?;
        let failed = results.iter().filter(|r| !r.passed).count();
        info!(results = results.len(), failed, "evaluation stored");

        let (alerts, alert_error) = match self.alerts.process(&results).await {
            Ok(outcomes) => (outcomes, None),
            Err(e) => {
                error!("alert processing failed after results were stored: {e}");
                (Vec::new(), Some(e.to_string()))
            }
        };
        Ok(EvaluationReport {
            event_id: event.id.clone(),
            results,
            alerts,
            alert_error,
        })
    }

    /// Evaluates many events with at most `max_concurrent_events` in flight.
    /// Reports come back in input order.
    pub async fn evaluate_stream(
        self: &Arc<Self>,
        events: Vec<InferenceEvent>,
        metrics: &[MetricName],
    ) -> Vec<(EventId, Result<EvaluationReport, PipelineError>)> {
        let permits = Arc::new(Semaphore::new(
            self.document.pipeline.max_concurrent_events.max(1),
        ));
        let metrics: Arc<[MetricName]> = Arc::from(metrics);
        let mut handles = Vec::with_capacity(events.len());
        for event in events {
            let id = event.id.clone();
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    handles.push((
                        id,
                        Err(PipelineError::new(PipelineErrorCode::Internal, e.to_string())),
                    ));
                    continue;
                }
            };
            let this = Arc::clone(self);
            let metrics = Arc::clone(&metrics);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                this.evaluate_report(&event, &metrics).await
            });
            handles.push((id, Ok(handle)));
        }

        let mut out = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let report = match handle {
                Ok(handle) => handle.await.unwrap_or_else(|e| {
                    Err(PipelineError::new(
                        PipelineErrorCode::Internal,
                        format!("evaluation task failed: {e}"),
                    ))
                }),
                Err(e) => Err(e),
            };
            if let Err(e) = &report {
                warn!(event_id = %id, "event evaluation failed: {e}");
            }
            out.push((id, report));
        }
        debug!(events = out.len(), "stream evaluation finished");
        out
    }
}

fn spawn_scorer(
    scorer: Arc<dyn Scorer>,
    event: Arc<InferenceEvent>,
    timeout: Duration,
) -> JoinHandle<Result<ScoreResult, Elapsed>> {
    tokio::spawn(async move { tokio::time::timeout(timeout, scorer.score(&event)).await })
}

fn with_threshold(mut result: EvaluationResult, threshold: &ThresholdConfig) -> EvaluationResult {
    result.threshold_used = Some(threshold.clone());
    result
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use evalwatch_alerts::{AlertEngine, LogNotifier};
use evalwatch_core::{sha256_parts_hex, Clock, SystemClock, TimestampMs};
use evalwatch_model::{AlertKind, EventId, InferenceEvent, MetricName, ModelId};
use evalwatch_pipeline::Orchestrator;
use evalwatch_policies::{document_fingerprint, ThresholdDocument};
use evalwatch_scorers::{HttpJudge, Judge, ScorerRegistry, METRIC_LATENCY};
use evalwatch_store::{AlertFilter, LatencyWindow, ResultFilter, ResultStore, SqliteStore};
use serde_json::{json, Value};
use tracing::info;

use crate::output::{emit_ok, OutputMode};
use crate::CliError;

const MS_PER_HOUR: i64 = 3_600_000;

pub(crate) struct Context {
    pub config: Option<PathBuf>,
    pub db: PathBuf,
    pub output_mode: OutputMode,
}

impl Context {
    fn document(&self) -> Result<ThresholdDocument, CliError> {
        match &self.config {
            Some(path) => Ok(ThresholdDocument::load(path)?),
            None => Ok(ThresholdDocument::builtin_with_env()?),
        }
    }

    fn store(&self) -> Result<Arc<SqliteStore>, CliError> {
        Ok(Arc::new(SqliteStore::open(&self.db)?))
    }

    fn emit(&self, payload: &Value) -> Result<(), CliError> {
        emit_ok(self.output_mode, payload).map_err(|e| CliError::internal(&e))
    }

    fn orchestrator(&self) -> Result<Arc<Orchestrator>, CliError> {
        let document = Arc::new(self.document()?);
        let store: Arc<dyn ResultStore> = self.store()?;
        let judge_timeout = Duration::from_millis(document.pipeline.judge_timeout_ms);
        let judge = HttpJudge::from_env(judge_timeout)
            .map_err(|e| CliError::validation(&e.to_string()))?
            .map(|j| Arc::new(j) as Arc<dyn Judge>);
        let registry = ScorerRegistry::standard(&document.pipeline, judge)
            .map_err(|e| CliError::internal(&e.to_string()))?;
        let alerts = Arc::new(AlertEngine::new(
            Arc::clone(&store),
            Arc::clone(&document),
            Arc::new(LogNotifier),
        ));
        Ok(Arc::new(Orchestrator::new(
            Arc::new(registry),
            document,
            store,
            alerts,
            Arc::new(SystemClock),
        )))
    }
}

fn parse_metrics(raw: &[String], orch: &Orchestrator) -> Result<Vec<MetricName>, CliError> {
    if raw.is_empty() {
        return Ok(orch.default_metrics());
    }
    raw.iter()
        .map(|name| MetricName::new(name.trim()).map_err(|e| CliError::usage(&e.to_string())))
        .collect()
}

fn parse_model(raw: Option<String>) -> Result<Option<ModelId>, CliError> {
    raw.map(|m| ModelId::new(m).map_err(|e| CliError::usage(&e.to_string())))
        .transpose()
}

fn read_events(path: &Path) -> Result<Vec<InferenceEvent>, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CliError::validation(&format!("read {} failed: {e}", path.display()))
    })?;
    let mut events = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: InferenceEvent = serde_json::from_str(line).map_err(|e| {
            CliError::validation(&format!("{}:{}: invalid event: {e}", path.display(), idx + 1))
        })?;
        event
            .validate()
            .map_err(|e| CliError::validation(&e.to_string()))?;
        events.push(event);
    }
    Ok(events)
}

async fn run_events(
    ctx: &Context,
    command: &str,
    orch: Arc<Orchestrator>,
    events: Vec<InferenceEvent>,
    metrics: &[MetricName],
) -> Result<(), CliError> {
    let total = events.len();
    let reports = orch.evaluate_stream(events, metrics).await;
    let mut failures = Vec::new();
    let mut rows = Vec::with_capacity(reports.len());
    let (mut results, mut failed_results, mut fired, mut resolved) = (0usize, 0usize, 0usize, 0usize);
    for (event_id, report) in reports {
        match report {
            Ok(report) => {
                results += report.results.len();
                failed_results += report.results.iter().filter(|r| !r.passed).count();
                for outcome in &report.alerts {
                    match outcome.alert.as_ref().map(|a| a.kind) {
                        Some(AlertKind::Fired) => fired += 1,
                        Some(AlertKind::Resolved) => resolved += 1,
                        None => {}
                    }
                }
                rows.push(json!({
                    "event_id": event_id,
                    "status": "ok",
                    "results": report.results,
                    "alerts": report.alerts,
                    "alert_error": report.alert_error,
                }));
            }
            Err(e) => {
                rows.push(json!({
                    "event_id": event_id,
                    "status": "error",
                    "error": e.to_string(),
                }));
                failures.push(e);
            }
        }
    }
    info!(events = total, results, failed_results, fired, "{command} finished");
    ctx.emit(&json!({
        "command": command,
        "events": total,
        "results": results,
        "failed_results": failed_results,
        "alerts_fired": fired,
        "alerts_resolved": resolved,
        "event_errors": failures.len(),
        "reports": rows,
    }))?;
    match failures.into_iter().next() {
        Some(first) => Err(CliError::from(first)),
        None => Ok(()),
    }
}

pub(crate) async fn evaluate(ctx: &Context, events: &Path, metrics: &[String]) -> Result<(), CliError> {
    let orch = ctx.orchestrator()?;
    let metrics = parse_metrics(metrics, &orch)?;
    let events = read_events(events)?;
    run_events(ctx, "evaluate", orch, events, &metrics).await
}

/// Deterministic offline provider: echoes the prompt tagged with the model.
fn mock_generate(model: &ModelId, prompt: &str) -> String {
    format!("[mock:{model}] {prompt}")
}

pub(crate) async fn smoke(
    ctx: &Context,
    model: &str,
    prompts: &[String],
    metrics: &[String],
) -> Result<(), CliError> {
    let model = ModelId::new(model).map_err(|e| CliError::usage(&e.to_string()))?;
    let orch = ctx.orchestrator()?;
    let metrics = parse_metrics(metrics, &orch)?;
    let started_at = SystemClock.now();
    let mut events = Vec::with_capacity(prompts.len());
    for (i, prompt) in prompts.iter().enumerate() {
        let timer = Instant::now();
        let response = mock_generate(&model, prompt);
        let latency_ms = timer.elapsed().as_secs_f64() * 1000.0;
        let at = started_at.to_string();
        let index = i.to_string();
        let digest = sha256_parts_hex(&[model.as_str(), prompt.as_str(), at.as_str(), index.as_str()]);
        let id = EventId::new(format!("smoke-{}", &digest[..16]))
            .map_err(|e| CliError::internal(&e.to_string()))?;
        let timestamp = TimestampMs(started_at.as_millis() + i64::try_from(i).unwrap_or(0));
        events.push(
            InferenceEvent::new(id, timestamp, model.clone(), prompt.clone(), response)
                .with_latency_ms(latency_ms)
                .with_metadata("provider", "mock"),
        );
    }
    run_events(ctx, "smoke", orch, events, &metrics).await
}

pub(crate) struct ResultsArgs {
    pub model: Option<String>,
    pub metric: Option<String>,
    pub failed: bool,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: usize,
}

pub(crate) async fn results(ctx: &Context, args: ResultsArgs) -> Result<(), CliError> {
    let store = ctx.store()?;
    let filter = ResultFilter {
        since: args.since.map(TimestampMs),
        until: args.until.map(TimestampMs),
        model_id: parse_model(args.model)?,
        metric_name: args
            .metric
            .map(|m| MetricName::new(m).map_err(|e| CliError::usage(&e.to_string())))
            .transpose()?,
        event_id: None,
        passed: args.failed.then_some(false),
        limit: Some(args.limit),
        newest_first: true,
    };
    let rows = store.query_results(&filter).await?;
    ctx.emit(&json!({
        "command": "results",
        "count": rows.len(),
        "results": rows,
    }))
}

pub(crate) async fn latency(
    ctx: &Context,
    model: Option<String>,
    since: Option<i64>,
    until: Option<i64>,
) -> Result<(), CliError> {
    let document = ctx.document()?;
    let store = ctx.store()?;
    let metric = MetricName::new(METRIC_LATENCY).map_err(|e| CliError::internal(&e.to_string()))?;
    let window = LatencyWindow {
        metric_name: metric.clone(),
        since: since.map(TimestampMs),
        until: until.map(TimestampMs),
        model_id: parse_model(model)?,
    };
    let stats = store.latency_stats(&window).await?;
    let threshold = document.threshold_for(&metric);
    let p95_passed = match (&stats, &threshold) {
        (Some(stats), Some(threshold)) => Some(threshold.comparator.passes(stats.p95, threshold.bound)),
        _ => None,
    };
    ctx.emit(&json!({
        "command": "latency",
        "window": window,
        "stats": stats,
        "threshold": threshold,
        "p95_passed": p95_passed,
    }))
}

pub(crate) async fn summary(ctx: &Context, hours: u32) -> Result<(), CliError> {
    let store = ctx.store()?;
    let since = SystemClock
        .now()
        .saturating_sub_ms(i64::from(hours).saturating_mul(MS_PER_HOUR));
    let metrics = store.metrics_summary(Some(since)).await?;
    let total = store.count_results().await?;
    ctx.emit(&json!({
        "command": "summary",
        "hours": hours,
        "since": since,
        "total_results": total,
        "metrics": metrics,
    }))
}

pub(crate) async fn alerts(ctx: &Context, limit: usize) -> Result<(), CliError> {
    let store = ctx.store()?;
    let alerts = store
        .query_alerts(&AlertFilter {
            limit: Some(limit),
            ..AlertFilter::default()
        })
        .await?;
    ctx.emit(&json!({
        "command": "alerts",
        "count": alerts.len(),
        "alerts": alerts,
    }))
}

pub(crate) async fn alert_state(ctx: &Context) -> Result<(), CliError> {
    let store = ctx.store()?;
    let states = store.alert_states().await?;
    ctx.emit(&json!({
        "command": "alert-state",
        "states": states,
    }))
}

pub(crate) fn validate_config(ctx: &Context) -> Result<(), CliError> {
    let document = ctx.document()?;
    let fingerprint = document_fingerprint(&document)?;
    ctx.emit(&json!({
        "command": "validate-config",
        "status": "ok",
        "source": ctx.config.as_ref().map_or_else(|| "builtin".to_string(), |p| p.display().to_string()),
        "fingerprint": fingerprint,
        "metrics": document.metrics,
        "pipeline": document.pipeline,
        "notify": document.notify,
    }))
}

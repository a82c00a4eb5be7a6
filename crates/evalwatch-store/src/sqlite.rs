// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use evalwatch_core::TimestampMs;
use evalwatch_model::{
    AlertEvent, AlertId, AlertKey, AlertKind, AlertState, AlertStatus, EvaluationResult, EventId,
    InferenceEvent, MetricName, ModelId, ResultId, ResultOutcome, Score, Severity,
    ThresholdConfig,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};

use crate::{
    check_batch, AlertFilter, LatencyStats, LatencyWindow, MetricSummary, ResultFilter, ResultStore,
    StoreError, StoreErrorCode,
};

pub const SQLITE_SCHEMA_VERSION: i64 = 1;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS inference_events (
  id TEXT PRIMARY KEY,
  timestamp_ms INTEGER NOT NULL,
  model_id TEXT NOT NULL,
  prompt TEXT NOT NULL,
  response TEXT NOT NULL,
  latency_ms REAL,
  metadata_json TEXT NOT NULL,
  reference TEXT,
  golden_iocs_json TEXT
);
CREATE INDEX IF NOT EXISTS ix_events_ts_model ON inference_events(timestamp_ms, model_id);

CREATE TABLE IF NOT EXISTS evaluation_results (
  id TEXT PRIMARY KEY,
  event_id TEXT NOT NULL REFERENCES inference_events(id),
  model_id TEXT NOT NULL,
  event_timestamp_ms INTEGER NOT NULL,
  metric_name TEXT NOT NULL,
  outcome TEXT NOT NULL,
  score_json TEXT,
  observed_value REAL,
  passed INTEGER NOT NULL,
  threshold_json TEXT,
  detail TEXT,
  computed_at_ms INTEGER NOT NULL,
  UNIQUE (event_id, metric_name)
);
CREATE INDEX IF NOT EXISTS ix_results_ts_model ON evaluation_results(event_timestamp_ms, model_id);
CREATE INDEX IF NOT EXISTS ix_results_metric_ts ON evaluation_results(metric_name, event_timestamp_ms);

CREATE TABLE IF NOT EXISTS alert_events (
  id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  metric_name TEXT NOT NULL,
  model_id TEXT NOT NULL,
  fired_at_ms INTEGER NOT NULL,
  triggering_result_id TEXT NOT NULL REFERENCES evaluation_results(id),
  severity TEXT NOT NULL,
  threshold_value REAL,
  actual_value REAL,
  consecutive_failures INTEGER NOT NULL,
  message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_alerts_fired ON alert_events(fired_at_ms);

CREATE TABLE IF NOT EXISTS alert_state (
  metric_name TEXT NOT NULL,
  model_id TEXT NOT NULL,
  status TEXT NOT NULL,
  consecutive_failures INTEGER NOT NULL,
  last_fired_at_ms INTEGER,
  last_observed_at_ms INTEGER,
  last_observed_event TEXT,
  PRIMARY KEY (metric_name, model_id)
) WITHOUT ROWID;

CREATE TRIGGER IF NOT EXISTS evaluation_results_no_update BEFORE UPDATE ON evaluation_results
BEGIN SELECT RAISE(ABORT, 'evaluation_results is append-only'); END;
CREATE TRIGGER IF NOT EXISTS evaluation_results_no_delete BEFORE DELETE ON evaluation_results
BEGIN SELECT RAISE(ABORT, 'evaluation_results is append-only'); END;
CREATE TRIGGER IF NOT EXISTS alert_events_no_update BEFORE UPDATE ON alert_events
BEGIN SELECT RAISE(ABORT, 'alert_events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS alert_events_no_delete BEFORE DELETE ON alert_events
BEGIN SELECT RAISE(ABORT, 'alert_events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS inference_events_no_update BEFORE UPDATE ON inference_events
BEGIN SELECT RAISE(ABORT, 'inference_events is immutable'); END;
";

const RESULT_COLUMNS: &str = "id, event_id, model_id, event_timestamp_ms, metric_name, outcome, \
     score_json, observed_value, passed, threshold_json, detail, computed_at_ms";

const ALERT_COLUMNS: &str = "id, kind, metric_name, model_id, fired_at_ms, triggering_result_id, \
     severity, threshold_value, actual_value, consecutive_failures, message";

/// SQLite-backed store. Every operation opens its own connection on a
/// blocking thread; SQLite's own locking orders concurrent writers.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        let conn = store.connect()?;
        migrate(&conn)?;
        Ok(store)
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        open_connection(&self.path, self.busy_timeout)
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path, busy_timeout)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("store task failed: {e}")))?
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(|e| {
        StoreError::new(
            StoreErrorCode::Io,
            format!("open {} failed: {e}", path.display()),
        )
    })?;
    conn.busy_timeout(busy_timeout).map_err(sql_error)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(sql_error)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(sql_error)?;
    if version > SQLITE_SCHEMA_VERSION {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            format!("database schema version {version} is newer than supported {SQLITE_SCHEMA_VERSION}"),
        ));
    }
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .map_err(sql_error)?;
    conn.execute_batch(SCHEMA_SQL).map_err(sql_error)?;
    conn.execute_batch(&format!("PRAGMA user_version={SQLITE_SCHEMA_VERSION};"))
        .map_err(sql_error)?;
    Ok(())
}

fn sql_error(e: rusqlite::Error) -> StoreError {
    let code = match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreErrorCode::Conflict
        }
        _ => StoreErrorCode::Sql,
    };
    StoreError::new(code, e.to_string())
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::new(StoreErrorCode::Decode, format!("encode failed: {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::new(StoreErrorCode::Decode, format!("decode {what} failed: {e}")))
}

fn decode_id<T, E: std::fmt::Display>(parsed: Result<T, E>, what: &str) -> Result<T, StoreError> {
    parsed.map_err(|e| StoreError::new(StoreErrorCode::Decode, format!("stored {what}: {e}")))
}

fn insert_evaluation(
    conn: &mut Connection,
    event: &InferenceEvent,
    results: &[EvaluationResult],
) -> Result<(), StoreError> {
    let metadata_json = encode_json(&event.metadata)?;
    let golden_json = event.golden_iocs.as_ref().map(encode_json).transpose()?;
    check_batch(event, results)?;
    let mut rows = Vec::with_capacity(results.len());
    for r in results {
        let score_json = r.score.as_ref().map(encode_json).transpose()?;
        let threshold_json = r.threshold_used.as_ref().map(encode_json).transpose()?;
        rows.push((r, score_json, threshold_json));
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(sql_error)?;
    tx.execute(
        "INSERT INTO inference_events (id, timestamp_ms, model_id, prompt, response, latency_ms, \
         metadata_json, reference, golden_iocs_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(id) DO NOTHING",
        params![
            event.id.as_str(),
            event.timestamp.as_millis(),
            event.model_id.as_str(),
            event.prompt,
            event.response,
            event.latency_ms,
            metadata_json,
            event.reference,
            golden_json,
        ],
    )
    .map_err(sql_error)?;
    {
        let mut stmt = tx
            .prepare(&format!(
                "INSERT INTO evaluation_results ({RESULT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ))
            .map_err(sql_error)?;
        for (r, score_json, threshold_json) in &rows {
            stmt.execute(params![
                r.id.as_str(),
                r.event_id.as_str(),
                r.model_id.as_str(),
                r.event_timestamp.as_millis(),
                r.metric_name.as_str(),
                r.outcome.as_str(),
                score_json,
                r.observed_value,
                r.passed,
                threshold_json,
                r.detail,
                r.computed_at.as_millis(),
            ])
            .map_err(|e| {
                let err = sql_error(e);
                if err.code == StoreErrorCode::Conflict {
                    StoreError::new(
                        StoreErrorCode::Conflict,
                        format!("result for ({}, {}) already recorded", r.event_id, r.metric_name),
                    )
                } else {
                    err
                }
            })?;
        }
    }
    tx.commit().map_err(sql_error)
}

struct RawResult {
    id: String,
    event_id: String,
    model_id: String,
    event_timestamp_ms: i64,
    metric_name: String,
    outcome: String,
    score_json: Option<String>,
    observed_value: Option<f64>,
    passed: bool,
    threshold_json: Option<String>,
    detail: Option<String>,
    computed_at_ms: i64,
}

impl RawResult {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            model_id: row.get(2)?,
            event_timestamp_ms: row.get(3)?,
            metric_name: row.get(4)?,
            outcome: row.get(5)?,
            score_json: row.get(6)?,
            observed_value: row.get(7)?,
            passed: row.get(8)?,
            threshold_json: row.get(9)?,
            detail: row.get(10)?,
            computed_at_ms: row.get(11)?,
        })
    }

    fn decode(self) -> Result<EvaluationResult, StoreError> {
        let outcome = ResultOutcome::parse(&self.outcome).ok_or_else(|| {
            StoreError::new(
                StoreErrorCode::Decode,
                format!("unknown outcome `{}`", self.outcome),
            )
        })?;
        Ok(EvaluationResult {
            id: decode_id(ResultId::new(self.id), "result id")?,
            event_id: decode_id(EventId::new(self.event_id), "event id")?,
            model_id: decode_id(ModelId::new(self.model_id), "model id")?,
            event_timestamp: TimestampMs(self.event_timestamp_ms),
            metric_name: decode_id(MetricName::new(self.metric_name), "metric name")?,
            outcome,
            score: self
                .score_json
                .as_deref()
                .map(|raw| decode_json::<Score>(raw, "score"))
                .transpose()?,
            observed_value: self.observed_value,
            passed: self.passed,
            threshold_used: self
                .threshold_json
                .as_deref()
                .map(|raw| decode_json::<ThresholdConfig>(raw, "threshold"))
                .transpose()?,
            detail: self.detail,
            computed_at: TimestampMs(self.computed_at_ms),
        })
    }
}

fn push_time_range(
    clauses: &mut Vec<String>,
    params: &mut Vec<Value>,
    column: &str,
    since: Option<TimestampMs>,
    until: Option<TimestampMs>,
) {
    if let Some(since) = since {
        clauses.push(format!("{column} >= ?"));
        params.push(Value::Integer(since.as_millis()));
    }
    if let Some(until) = until {
        clauses.push(format!("{column} < ?"));
        params.push(Value::Integer(until.as_millis()));
    }
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn build_result_query(filter: &ResultFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    push_time_range(
        &mut clauses,
        &mut params,
        "event_timestamp_ms",
        filter.since,
        filter.until,
    );
    if let Some(model) = &filter.model_id {
        clauses.push("model_id = ?".to_string());
        params.push(Value::Text(model.as_str().to_string()));
    }
    if let Some(metric) = &filter.metric_name {
        clauses.push("metric_name = ?".to_string());
        params.push(Value::Text(metric.as_str().to_string()));
    }
    if let Some(event) = &filter.event_id {
        clauses.push("event_id = ?".to_string());
        params.push(Value::Text(event.as_str().to_string()));
    }
    if let Some(passed) = filter.passed {
        clauses.push("passed = ?".to_string());
        params.push(Value::Integer(i64::from(passed)));
    }
    let order = if filter.newest_first { "DESC" } else { "ASC" };
    let sql = format!(
        "SELECT {RESULT_COLUMNS} FROM evaluation_results{} \
         ORDER BY event_timestamp_ms {order}, event_id {order}, metric_name {order} LIMIT ?",
        where_sql(&clauses)
    );
    params.push(Value::Integer(
        i64::try_from(filter.effective_limit()).unwrap_or(i64::MAX),
    ));
    (sql, params)
}

fn select_results(conn: &Connection, filter: &ResultFilter) -> Result<Vec<EvaluationResult>, StoreError> {
    let (sql, params) = build_result_query(filter);
    let mut stmt = conn.prepare_cached(&sql).map_err(sql_error)?;
    let raw = stmt
        .query_map(params_from_iter(params.iter()), RawResult::from_row)
        .map_err(sql_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_error)?;
    raw.into_iter().map(RawResult::decode).collect()
}

fn decode_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAlert> {
    Ok(RawAlert {
        id: row.get(0)?,
        kind: row.get(1)?,
        metric_name: row.get(2)?,
        model_id: row.get(3)?,
        fired_at_ms: row.get(4)?,
        triggering_result_id: row.get(5)?,
        severity: row.get(6)?,
        threshold_value: row.get(7)?,
        actual_value: row.get(8)?,
        consecutive_failures: row.get(9)?,
        message: row.get(10)?,
    })
}

struct RawAlert {
    id: String,
    kind: String,
    metric_name: String,
    model_id: String,
    fired_at_ms: i64,
    triggering_result_id: String,
    severity: String,
    threshold_value: Option<f64>,
    actual_value: Option<f64>,
    consecutive_failures: u32,
    message: String,
}

impl RawAlert {
    fn decode(self) -> Result<AlertEvent, StoreError> {
        Ok(AlertEvent {
            id: decode_id(AlertId::new(self.id), "alert id")?,
            kind: AlertKind::parse(&self.kind).ok_or_else(|| {
                StoreError::new(StoreErrorCode::Decode, format!("unknown alert kind `{}`", self.kind))
            })?,
            metric_name: decode_id(MetricName::new(self.metric_name), "metric name")?,
            model_id: decode_id(ModelId::new(self.model_id), "model id")?,
            fired_at: TimestampMs(self.fired_at_ms),
            triggering_result_id: decode_id(ResultId::new(self.triggering_result_id), "result id")?,
            severity: Severity::parse(&self.severity).ok_or_else(|| {
                StoreError::new(StoreErrorCode::Decode, format!("unknown severity `{}`", self.severity))
            })?,
            threshold_value: self.threshold_value,
            actual_value: self.actual_value,
            consecutive_failures: self.consecutive_failures,
            message: self.message,
        })
    }
}

struct RawState {
    metric_name: String,
    model_id: String,
    status: String,
    consecutive_failures: u32,
    last_fired_at_ms: Option<i64>,
    last_observed_at_ms: Option<i64>,
    last_observed_event: Option<String>,
}

impl RawState {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            metric_name: row.get(0)?,
            model_id: row.get(1)?,
            status: row.get(2)?,
            consecutive_failures: row.get(3)?,
            last_fired_at_ms: row.get(4)?,
            last_observed_at_ms: row.get(5)?,
            last_observed_event: row.get(6)?,
        })
    }

    fn decode(self) -> Result<AlertState, StoreError> {
        Ok(AlertState {
            metric_name: decode_id(MetricName::new(self.metric_name), "metric name")?,
            model_id: decode_id(ModelId::new(self.model_id), "model id")?,
            status: AlertStatus::parse(&self.status).ok_or_else(|| {
                StoreError::new(StoreErrorCode::Decode, format!("unknown alert status `{}`", self.status))
            })?,
            consecutive_failures: self.consecutive_failures,
            last_fired_at: self.last_fired_at_ms.map(TimestampMs),
            last_observed_at: self.last_observed_at_ms.map(TimestampMs),
            last_observed_event: self
                .last_observed_event
                .map(|raw| decode_id(EventId::new(raw), "event id"))
                .transpose()?,
        })
    }
}

const STATE_COLUMNS: &str = "metric_name, model_id, status, consecutive_failures, last_fired_at_ms, \
     last_observed_at_ms, last_observed_event";

#[async_trait]
impl ResultStore for SqliteStore {
    #[instrument(name = "store_append_evaluation", skip_all, fields(event_id = %event.id, results = results.len()))]
    async fn append_evaluation(
        &self,
        event: &InferenceEvent,
        results: &[EvaluationResult],
    ) -> Result<(), StoreError> {
        let event = event.clone();
        let results = results.to_vec();
        self.run(move |conn| insert_evaluation(conn, &event, &results))
            .await?;
        debug!("evaluation batch committed");
        Ok(())
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<InferenceEvent>, StoreError> {
        let id = id.clone();
        self.run(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT id, timestamp_ms, model_id, prompt, response, latency_ms, metadata_json, \
                     reference, golden_iocs_json FROM inference_events WHERE id = ?1",
                    params![id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<f64>>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, Option<String>>(7)?,
                            row.get::<_, Option<String>>(8)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_error)?;
            let Some((ts, model, prompt, response, latency, metadata, reference, golden)) = raw
            else {
                return Ok(None);
            };
            Ok(Some(InferenceEvent {
                id,
                timestamp: TimestampMs(ts),
                model_id: decode_id(ModelId::new(model), "model id")?,
                prompt,
                response,
                latency_ms: latency,
                metadata: decode_json::<BTreeMap<String, String>>(&metadata, "metadata")?,
                reference,
                golden_iocs: golden
                    .as_deref()
                    .map(|raw| decode_json::<Vec<String>>(raw, "golden iocs"))
                    .transpose()?,
            }))
        })
        .await
    }

    async fn query_results(&self, filter: &ResultFilter) -> Result<Vec<EvaluationResult>, StoreError> {
        let filter = filter.clone();
        self.run(move |conn| select_results(conn, &filter)).await
    }

    async fn count_results(&self) -> Result<u64, StoreError> {
        self.run(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM evaluation_results", [], |row| row.get(0))
                .map_err(sql_error)?;
            Ok(u64::try_from(n).unwrap_or(0))
        })
        .await
    }

    async fn latency_stats(&self, window: &LatencyWindow) -> Result<Option<LatencyStats>, StoreError> {
        let window = window.clone();
        self.run(move |conn| {
            let mut clauses = vec![
                "metric_name = ?".to_string(),
                "outcome = 'scored'".to_string(),
                "observed_value IS NOT NULL".to_string(),
            ];
            let mut params = vec![Value::Text(window.metric_name.as_str().to_string())];
            push_time_range(
                &mut clauses,
                &mut params,
                "event_timestamp_ms",
                window.since,
                window.until,
            );
            if let Some(model) = &window.model_id {
                clauses.push("model_id = ?".to_string());
                params.push(Value::Text(model.as_str().to_string()));
            }
            let sql = format!(
                "SELECT observed_value FROM evaluation_results{}",
                where_sql(&clauses)
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(sql_error)?;
            let values = stmt
                .query_map(params_from_iter(params.iter()), |row| row.get::<_, f64>(0))
                .map_err(sql_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_error)?;
            Ok(LatencyStats::from_values(values))
        })
        .await
    }

    async fn metrics_summary(&self, since: Option<TimestampMs>) -> Result<Vec<MetricSummary>, StoreError> {
        self.run(move |conn| {
            let mut clauses = vec![
                "outcome = 'scored'".to_string(),
                "observed_value IS NOT NULL".to_string(),
            ];
            let mut params = Vec::new();
            push_time_range(&mut clauses, &mut params, "event_timestamp_ms", since, None);
            let sql = format!(
                "SELECT metric_name, COUNT(*), AVG(observed_value), MIN(observed_value), MAX(observed_value) \
                 FROM evaluation_results{} GROUP BY metric_name ORDER BY metric_name",
                where_sql(&clauses)
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(sql_error)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                })
                .map_err(sql_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_error)?;
            rows.into_iter()
                .map(|(metric, count, avg, min, max)| {
                    Ok(MetricSummary {
                        metric_name: decode_id(MetricName::new(metric), "metric name")?,
                        count: u64::try_from(count).unwrap_or(0),
                        avg,
                        min,
                        max,
                    })
                })
                .collect()
        })
        .await
    }

    async fn query_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertEvent>, StoreError> {
        let filter = filter.clone();
        self.run(move |conn| {
            let mut clauses = Vec::new();
            let mut params = Vec::new();
            push_time_range(&mut clauses, &mut params, "fired_at_ms", filter.since, filter.until);
            if let Some(model) = &filter.model_id {
                clauses.push("model_id = ?".to_string());
                params.push(Value::Text(model.as_str().to_string()));
            }
            if let Some(metric) = &filter.metric_name {
                clauses.push("metric_name = ?".to_string());
                params.push(Value::Text(metric.as_str().to_string()));
            }
            params.push(Value::Integer(
                i64::try_from(filter.effective_limit()).unwrap_or(i64::MAX),
            ));
            let sql = format!(
                "SELECT {ALERT_COLUMNS} FROM alert_events{} ORDER BY fired_at_ms ASC, id ASC LIMIT ?",
                where_sql(&clauses)
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(sql_error)?;
            let raw = stmt
                .query_map(params_from_iter(params.iter()), decode_alert)
                .map_err(sql_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_error)?;
            raw.into_iter().map(RawAlert::decode).collect()
        })
        .await
    }

    async fn load_alert_state(&self, key: &AlertKey) -> Result<Option<AlertState>, StoreError> {
        let key = key.clone();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {STATE_COLUMNS} FROM alert_state WHERE metric_name = ?1 AND model_id = ?2"),
                params![key.metric_name.as_str(), key.model_id.as_str()],
                RawState::from_row,
            )
            .optional()
            .map_err(sql_error)?
            .map(RawState::decode)
            .transpose()
        })
        .await
    }

    async fn commit_alert_state(
        &self,
        state: &AlertState,
        alert: Option<&AlertEvent>,
    ) -> Result<(), StoreError> {
        let state = state.clone();
        let alert = alert.cloned();
        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_error)?;
            if let Some(a) = &alert {
                tx.execute(
                    &format!(
                        "INSERT INTO alert_events ({ALERT_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                    ),
                    params![
                        a.id.as_str(),
                        a.kind.as_str(),
                        a.metric_name.as_str(),
                        a.model_id.as_str(),
                        a.fired_at.as_millis(),
                        a.triggering_result_id.as_str(),
                        a.severity.as_str(),
                        a.threshold_value,
                        a.actual_value,
                        a.consecutive_failures,
                        a.message,
                    ],
                )
                .map_err(sql_error)?;
            }
            tx.execute(
                &format!(
                    "INSERT INTO alert_state ({STATE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(metric_name, model_id) DO UPDATE SET \
                     status = excluded.status, \
                     consecutive_failures = excluded.consecutive_failures, \
                     last_fired_at_ms = excluded.last_fired_at_ms, \
                     last_observed_at_ms = excluded.last_observed_at_ms, \
                     last_observed_event = excluded.last_observed_event"
                ),
                params![
                    state.metric_name.as_str(),
                    state.model_id.as_str(),
                    state.status.as_str(),
                    state.consecutive_failures,
                    state.last_fired_at.map(TimestampMs::as_millis),
                    state.last_observed_at.map(TimestampMs::as_millis),
                    state.last_observed_event.as_ref().map(EventId::as_str),
                ],
            )
            .map_err(sql_error)?;
            tx.commit().map_err(sql_error)
        })
        .await
    }

    async fn alert_states(&self) -> Result<Vec<AlertState>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {STATE_COLUMNS} FROM alert_state ORDER BY metric_name, model_id"
                ))
                .map_err(sql_error)?;
            let raw = stmt
                .query_map([], RawState::from_row)
                .map_err(sql_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_error)?;
            raw.into_iter().map(RawState::decode).collect()
        })
        .await
    }
}

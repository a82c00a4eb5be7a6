use std::sync::Arc;
use std::time::Duration;

use evalwatch_core::TimestampMs;
use evalwatch_model::{
    AlertEvent, AlertId, AlertKey, AlertKind, AlertState, AlertStatus, Comparator,
    EvaluationResult, EventId, InferenceEvent, MetricName, ModelId, ResultOutcome, Score,
    Severity, ThresholdConfig,
};
use evalwatch_store::{
    AlertFilter, LatencyWindow, MemoryStore, ResultFilter, ResultStore, SqliteStore,
    StoreErrorCode,
};

fn metric(name: &str) -> MetricName {
    MetricName::new(name).unwrap()
}

fn event(id: &str, ts: i64, model: &str, latency: f64) -> InferenceEvent {
    InferenceEvent::new(
        EventId::new(id).unwrap(),
        TimestampMs(ts),
        ModelId::new(model).unwrap(),
        "prompt",
        "response",
    )
    .with_latency_ms(latency)
    .with_metadata("region", "eu-west-1")
    .with_golden_iocs(["1.2.3.4"])
}

fn scored(e: &InferenceEvent, name: &str, value: f64, bound: f64) -> EvaluationResult {
    let threshold = ThresholdConfig::new(metric(name), Comparator::Lt, bound);
    let computed_at = TimestampMs(e.timestamp.as_millis() + 5);
    let mut r = EvaluationResult::for_event(e, metric(name), ResultOutcome::Scored, computed_at);
    r.score = Some(Score::Value { value });
    r.observed_value = Some(value);
    r.passed = threshold.comparator.passes(value, threshold.bound);
    r.threshold_used = Some(threshold);
    r
}

fn stores() -> (tempfile::TempDir, Vec<Arc<dyn ResultStore>>) {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteStore::open(dir.path().join("evalwatch.db")).unwrap();
    (dir, vec![Arc::new(sqlite), Arc::new(MemoryStore::new())])
}

#[tokio::test]
async fn evaluation_round_trips_through_the_database() {
    let (_dir, stores) = stores();
    for store in stores {
        let e = event("evt-1", 1_000, "model-a", 120.0);
        let mut na = EvaluationResult::for_event(
            &e,
            metric("factuality"),
            ResultOutcome::NotApplicable,
            TimestampMs(1_001),
        );
        na.passed = true;
        na.detail = Some("no reference".to_string());
        let results = vec![scored(&e, "latency", 120.0, 2000.0), na];
        store.append_evaluation(&e, &results).await.unwrap();

        assert_eq!(store.get_event(&e.id).await.unwrap(), Some(e.clone()));
        let back = store
            .query_results(&ResultFilter {
                event_id: Some(e.id.clone()),
                ..ResultFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].metric_name, metric("factuality"));
        assert_eq!(back[0].detail.as_deref(), Some("no reference"));
        assert_eq!(back[1], results[0]);
        assert_eq!(store.count_results().await.unwrap(), 2);
    }
}

#[tokio::test]
async fn re_evaluating_the_same_metric_conflicts_and_writes_nothing() {
    let (_dir, stores) = stores();
    for store in stores {
        let e = event("evt-dup", 1_000, "model-a", 100.0);
        store
            .append_evaluation(&e, &[scored(&e, "latency", 100.0, 2000.0)])
            .await
            .unwrap();
        let err = store
            .append_evaluation(
                &e,
                &[
                    scored(&e, "toxicity", 0.1, 0.7),
                    scored(&e, "latency", 100.0, 2000.0),
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, StoreErrorCode::Conflict);
        assert_eq!(store.count_results().await.unwrap(), 1);
    }
}

#[tokio::test]
async fn non_finite_values_are_rejected_before_anything_is_written() {
    let (_dir, stores) = stores();
    for store in stores {
        let e = event("evt-nan", 1_000, "model-a", 120.0);
        let results = vec![
            scored(&e, "latency", 120.0, 2000.0),
            scored(&e, "toxicity", f64::NAN, 0.7),
        ];
        let err = store.append_evaluation(&e, &results).await.unwrap_err();
        assert_eq!(err.code, StoreErrorCode::Validation);
        assert!(err.message.contains("non-finite"));
        assert_eq!(store.count_results().await.unwrap(), 0);
        assert!(store.query_results(&ResultFilter::default()).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn stored_results_cannot_be_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("append.db");
    let store = SqliteStore::open(&path).unwrap();
    let e = event("evt-imm", 1_000, "model-a", 100.0);
    store
        .append_evaluation(&e, &[scored(&e, "latency", 100.0, 2000.0)])
        .await
        .unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    assert!(conn
        .execute("UPDATE evaluation_results SET passed = 0", [])
        .is_err());
    assert!(conn.execute("DELETE FROM evaluation_results", []).is_err());
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM evaluation_results", [], |row| row.get(0))
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn filters_select_by_model_metric_and_half_open_window() {
    let (_dir, stores) = stores();
    for store in stores {
        for (i, model) in ["model-a", "model-b", "model-a", "model-a"].iter().enumerate() {
            let ts = 1_000 * (i as i64 + 1);
            let e = event(&format!("evt-{i}"), ts, model, 500.0 * (i as f64 + 1.0));
            store
                .append_evaluation(
                    &e,
                    &[
                        scored(&e, "latency", 500.0 * (i as f64 + 1.0), 1200.0),
                        scored(&e, "toxicity", 0.1, 0.7),
                    ],
                )
                .await
                .unwrap();
        }
        let latency_a = store
            .query_results(&ResultFilter {
                model_id: Some(ModelId::new("model-a").unwrap()),
                metric_name: Some(metric("latency")),
                since: Some(TimestampMs(1_000)),
                until: Some(TimestampMs(4_000)),
                ..ResultFilter::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = latency_a.iter().map(|r| r.event_id.as_str()).collect();
        assert_eq!(ids, vec!["evt-0", "evt-2"]);

        let failed = store
            .query_results(&ResultFilter {
                passed: Some(false),
                ..ResultFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| r.metric_name == metric("latency")));

        let recent = store.recent_results(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].event_id.as_str(), "evt-3");
        assert_eq!(recent[0].metric_name, metric("toxicity"));
    }
}

#[tokio::test]
async fn latency_window_percentiles_and_summary() {
    let (_dir, stores) = stores();
    for store in stores {
        for i in 0..20_i64 {
            let latency = 100.0 * (i as f64 + 1.0);
            let e = event(&format!("lat-{i:02}"), 10_000 + i * 1_000, "model-a", latency);
            store
                .append_evaluation(&e, &[scored(&e, "latency", latency, 1500.0)])
                .await
                .unwrap();
        }
        let full = store
            .latency_stats(&LatencyWindow::new(metric("latency")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full.n, 20);
        assert_eq!(full.p95, 1900.0);
        assert_eq!(full.max, 2000.0);

        let window = LatencyWindow::new(metric("latency"))
            .between(TimestampMs(10_000), TimestampMs(20_000))
            .for_model(ModelId::new("model-a").unwrap());
        let first_ten = store.latency_stats(&window).await.unwrap().unwrap();
        assert_eq!(first_ten.n, 10);
        assert_eq!(first_ten.p95, 1000.0);
        assert!((first_ten.mean - 550.0).abs() < 1e-9);

        let empty = LatencyWindow::new(metric("latency")).between(TimestampMs(0), TimestampMs(1));
        assert!(store.latency_stats(&empty).await.unwrap().is_none());

        let summary = store.metrics_summary(Some(TimestampMs(25_000))).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 5);
        assert_eq!(summary[0].min, 1600.0);
    }
}

fn fired(key: &AlertKey, result: &EvaluationResult, at: i64) -> AlertEvent {
    AlertEvent {
        id: AlertId::derive(&key.metric_name, &key.model_id, TimestampMs(at), &result.id, "fired"),
        kind: AlertKind::Fired,
        metric_name: key.metric_name.clone(),
        model_id: key.model_id.clone(),
        fired_at: TimestampMs(at),
        triggering_result_id: result.id.clone(),
        severity: Severity::High,
        threshold_value: Some(2000.0),
        actual_value: Some(2800.0),
        consecutive_failures: 2,
        message: "latency above bound".to_string(),
    }
}

#[tokio::test]
async fn alert_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alerts.db");
    let key = AlertKey::new(metric("latency"), ModelId::new("model-a").unwrap());
    {
        let store = SqliteStore::open(&path).unwrap();
        let e = event("evt-slow", 5_000, "model-a", 2800.0);
        let r = scored(&e, "latency", 2800.0, 2000.0);
        store.append_evaluation(&e, &[r.clone()]).await.unwrap();
        let state = AlertState {
            status: AlertStatus::Alerting,
            consecutive_failures: 2,
            last_fired_at: Some(TimestampMs(5_000)),
            last_observed_at: Some(TimestampMs(5_000)),
            last_observed_event: Some(e.id.clone()),
            ..AlertState::healthy(&key)
        };
        store
            .commit_alert_state(&state, Some(&fired(&key, &r, 5_000)))
            .await
            .unwrap();
        let err = store
            .commit_alert_state(&state, Some(&fired(&key, &r, 5_000)))
            .await
            .unwrap_err();
        assert_eq!(err.code, StoreErrorCode::Conflict);
    }

    let reopened = SqliteStore::open(&path)
        .unwrap()
        .with_busy_timeout(Duration::from_millis(250));
    assert_eq!(reopened.path(), path.as_path());
    let state = reopened.load_alert_state(&key).await.unwrap().unwrap();
    assert_eq!(state.status, AlertStatus::Alerting);
    assert_eq!(state.consecutive_failures, 2);
    assert_eq!(state.last_fired_at, Some(TimestampMs(5_000)));
    assert_eq!(reopened.alert_states().await.unwrap().len(), 1);

    let alerts = reopened.query_alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::High);

    let healthy = AlertState {
        last_observed_at: Some(TimestampMs(6_000)),
        ..AlertState::healthy(&key)
    };
    reopened.save_alert_state(&healthy).await.unwrap();
    let state = reopened.load_alert_state(&key).await.unwrap().unwrap();
    assert_eq!(state.status, AlertStatus::Healthy);
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn alerts_must_reference_stored_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("fk.db")).unwrap();
    let key = AlertKey::new(metric("latency"), ModelId::new("model-a").unwrap());
    let e = event("evt-orphan", 1_000, "model-a", 2800.0);
    let r = scored(&e, "latency", 2800.0, 2000.0);
    let err = store
        .commit_alert_state(&AlertState::healthy(&key), Some(&fired(&key, &r, 1_000)))
        .await
        .unwrap_err();
    assert_eq!(err.code, StoreErrorCode::Conflict);
    assert!(store.load_alert_state(&key).await.unwrap().is_none());
}

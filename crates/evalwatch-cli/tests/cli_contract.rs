// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;

fn evalwatch(db: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_evalwatch"));
    cmd.env_remove("EVALWATCH_JUDGE_URL")
        .env_remove("EVALWATCH_SCORER_TIMEOUT_MS")
        .env_remove("EVALWATCH_JUDGE_TIMEOUT_MS")
        .env("EVALWATCH_LOG", "error")
        .arg("--json")
        .arg("--db")
        .arg(db);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    let text = String::from_utf8(output.stdout.clone()).expect("utf8 stdout");
    serde_json::from_str(text.trim()).expect("json stdout")
}

fn last_stderr_json(output: &std::process::Output) -> Value {
    let text = String::from_utf8(output.stderr.clone()).expect("utf8 stderr");
    let line = text.lines().last().expect("stderr line");
    serde_json::from_str(line).expect("json stderr")
}

const EVENTS: &str = r#"{"id":"evt-1","timestamp":1700000000000,"model_id":"analyst-v1","prompt":"p1","response":"Traffic to 1.2.3.4 observed.","latency_ms":120.0,"golden_iocs":["1.2.3.4"]}
{"id":"evt-2","timestamp":1700000001000,"model_id":"analyst-v1","prompt":"p2","response":"All clear.","latency_ms":2500.0}

{"id":"evt-3","timestamp":1700000002000,"model_id":"analyst-v1","prompt":"p3","response":"Paris","latency_ms":300.0,"reference":"Paris"}
"#;

const SEQUENTIAL_CONFIG: &str = "\
schema_version: 1
metrics:
  latency:
    comparator: lt
    bound: 2000
    field: latency_ms
  exact_match:
    comparator: gte
    bound: 1.0
pipeline:
  max_concurrent_events: 1
";

#[test]
fn help_lists_every_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_evalwatch"))
        .arg("--help")
        .output()
        .expect("run help");
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).expect("utf8 help");
    let mut observed = Vec::new();
    let mut in_commands = false;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed == "Commands:" {
            in_commands = true;
            continue;
        }
        if in_commands {
            if trimmed.is_empty() || !trimmed.starts_with(' ') {
                break;
            }
            let name = trimmed.trim_start().split_whitespace().next().unwrap_or("");
            if !name.is_empty() && name != "help" {
                observed.push(name.to_string());
            }
        }
    }
    observed.sort();
    assert_eq!(
        observed,
        vec![
            "alert-state",
            "alerts",
            "evaluate",
            "latency",
            "results",
            "smoke",
            "summary",
            "validate-config",
        ]
    );
}

#[test]
fn unknown_flag_returns_usage_exit_code_with_machine_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = evalwatch(&dir.path().join("x.db"))
        .arg("--unknown-flag")
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
    let err = last_stderr_json(&output);
    assert_eq!(err["code"], "usage_error");
}

#[test]
fn builtin_config_validates() {
    let dir = tempfile::tempdir().unwrap();
    let output = evalwatch(&dir.path().join("x.db"))
        .arg("validate-config")
        .output()
        .expect("run");
    assert!(output.status.success());
    let payload = stdout_json(&output);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["source"], "builtin");
    assert_eq!(payload["metrics"]["latency"]["bound"], 2000.0);
    assert_eq!(payload["fingerprint"].as_str().map(str::len), Some(64));
}

#[test]
fn zero_timeout_overrides_fail_builtin_validation() {
    let dir = tempfile::tempdir().unwrap();
    for var in ["EVALWATCH_SCORER_TIMEOUT_MS", "EVALWATCH_JUDGE_TIMEOUT_MS"] {
        let output = evalwatch(&dir.path().join("x.db"))
            .env(var, "0")
            .arg("validate-config")
            .output()
            .expect("run");
        assert_eq!(output.status.code(), Some(3), "{var}");
        let err = last_stderr_json(&output);
        assert_eq!(err["code"], "validation_error");
        assert!(err["message"].as_str().unwrap().contains("timeouts must be > 0"));
    }
}

#[test]
fn invalid_config_is_a_validation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("thresholds.yaml");
    std::fs::write(
        &config,
        "schema_version: 1\nmetrics:\n  latency:\n    comparator: lt\n    bound: 2000\n    failures_to_alert: 0\n",
    )
    .unwrap();
    let output = evalwatch(&dir.path().join("x.db"))
        .arg("--config")
        .arg(&config)
        .arg("validate-config")
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(last_stderr_json(&output)["code"], "validation_error");
}

#[test]
fn evaluate_then_query_results_alerts_and_latency() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("evalwatch.db");
    let events = dir.path().join("events.jsonl");
    std::fs::write(&events, EVENTS).unwrap();
    let config = dir.path().join("thresholds.yaml");
    std::fs::write(&config, SEQUENTIAL_CONFIG).unwrap();

    let output = evalwatch(&db)
        .arg("--config")
        .arg(&config)
        .arg("evaluate")
        .arg("--events")
        .arg(&events)
        .arg("--metrics")
        .arg("latency,exact_match")
        .output()
        .expect("run evaluate");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let payload = stdout_json(&output);
    assert_eq!(payload["events"], 3);
    assert_eq!(payload["results"], 6);
    assert_eq!(payload["failed_results"], 1);
    assert_eq!(payload["alerts_fired"], 1);
    assert_eq!(payload["alerts_resolved"], 1);

    let output = evalwatch(&db)
        .args(["results", "--failed", "--metric", "latency"])
        .output()
        .expect("run results");
    assert!(output.status.success());
    let payload = stdout_json(&output);
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["results"][0]["event_id"], "evt-2");

    let output = evalwatch(&db).arg("alerts").output().expect("run alerts");
    let payload = stdout_json(&output);
    assert_eq!(payload["count"], 2);
    assert_eq!(payload["alerts"][0]["kind"], "fired");
    assert_eq!(payload["alerts"][1]["kind"], "resolved");

    let output = evalwatch(&db).arg("latency").output().expect("run latency");
    let payload = stdout_json(&output);
    assert_eq!(payload["stats"]["n"], 3);
    assert_eq!(payload["stats"]["p95"], 2500.0);
    assert_eq!(payload["p95_passed"], false);

    let output = evalwatch(&db).arg("alert-state").output().expect("run alert-state");
    let payload = stdout_json(&output);
    let states = payload["states"].as_array().unwrap();
    assert!(states
        .iter()
        .any(|s| s["metric_name"] == "latency" && s["status"] == "healthy"));
}

#[test]
fn re_evaluating_the_same_events_is_a_dependency_failure() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("evalwatch.db");
    let events = dir.path().join("events.jsonl");
    std::fs::write(&events, EVENTS).unwrap();
    let run = || {
        evalwatch(&db)
            .arg("evaluate")
            .arg("--events")
            .arg(&events)
            .arg("--metrics")
            .arg("latency")
            .output()
            .expect("run evaluate")
    };
    assert!(run().status.success());
    let second = run();
    assert_eq!(second.status.code(), Some(4));
    assert_eq!(stdout_json(&second)["event_errors"], 3);
}

#[test]
fn malformed_event_line_reports_its_position() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join("events.jsonl");
    std::fs::write(&events, "{\"id\":\"evt-1\",\"unexpected\":true}\n").unwrap();
    let output = evalwatch(&dir.path().join("x.db"))
        .arg("evaluate")
        .arg("--events")
        .arg(&events)
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(3));
    let err = last_stderr_json(&output);
    assert!(err["message"].as_str().unwrap().contains("events.jsonl:1"));
}

#[test]
fn smoke_uses_mock_provider() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("evalwatch.db");
    let output = evalwatch(&db)
        .args([
            "smoke",
            "--model",
            "demo-model",
            "--prompt",
            "What is 2+2?",
            "--prompt",
            "Name a color.",
            "--metrics",
            "latency,toxicity",
        ])
        .output()
        .expect("run smoke");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let payload = stdout_json(&output);
    assert_eq!(payload["events"], 2);
    assert_eq!(payload["failed_results"], 0);

    let output = evalwatch(&db)
        .args(["summary", "--hours", "100000"])
        .output()
        .expect("run summary");
    let payload = stdout_json(&output);
    assert_eq!(payload["total_results"], 4);
}

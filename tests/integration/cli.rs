//! Command-line tests.
//!
//! Each test writes a repository snapshot into a temp directory and runs the
//! testrollup binary against it.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use uuid::Uuid;

use testrollup::model::{ExecutionRequest, LogRecord, Run};
use testrollup::repository::Snapshot;
use testrollup::{ExecutionStatus, TestingStatus};

/// Get a Command instance for the testrollup binary
#[allow(deprecated)]
fn testrollup_cmd() -> Command {
    Command::cargo_bin("testrollup").expect("Failed to find testrollup binary")
}

fn finished_run(request: &ExecutionRequest, status: TestingStatus) -> Run {
    Run::new(request.id, Uuid::new_v4(), "case")
        .with_testing_status(status)
        .with_execution_status(ExecutionStatus::Finished)
}

fn write_snapshot(dir: &TempDir, snapshot: &Snapshot) -> PathBuf {
    let path = dir.path().join("snapshot.json");
    fs::write(&path, serde_json::to_string_pretty(snapshot).expect("serialize snapshot"))
        .expect("Failed to write snapshot");
    path
}

/// Request with two passed runs and one failed run.
fn rated_snapshot() -> (Snapshot, ExecutionRequest) {
    let request = ExecutionRequest::new("nightly-er");
    let runs = vec![
        finished_run(&request, TestingStatus::Passed),
        finished_run(&request, TestingStatus::Passed),
        finished_run(&request, TestingStatus::Failed),
    ];
    let snapshot = Snapshot {
        execution_requests: vec![request.clone()],
        runs,
        log_records: Vec::new(),
    };
    (snapshot, request)
}

/// Run with a three-level record chain: root, child, leaf.
fn record_chain() -> (Snapshot, Run, Vec<LogRecord>) {
    let request = ExecutionRequest::new("er");
    let run = Run::new(request.id, Uuid::new_v4(), "case");
    let root = LogRecord::new(run.id, "root").section();
    let child = LogRecord::new(run.id, "child").child_of(&root);
    let leaf = LogRecord::new(run.id, "leaf").child_of(&child);
    let records = vec![root, child, leaf];
    let snapshot = Snapshot {
        execution_requests: vec![request],
        runs: vec![run.clone()],
        log_records: records.clone(),
    };
    (snapshot, run, records)
}

#[test]
fn test_rates_prints_request_rates() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (snapshot, request) = rated_snapshot();
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);

    let output = testrollup_cmd()
        .arg("rates")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--request")
        .arg(request.id.to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let rates: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(rates["count_of_test_runs"], 3);
    assert_eq!(rates["passed_rate"], 66.7);
    assert_eq!(rates["warning_rate"], 0.0);
    assert_eq!(rates["failed_rate"], 33.3);
}

#[test]
fn test_rates_unknown_request_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (snapshot, _) = rated_snapshot();
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);

    testrollup_cmd()
        .arg("rates")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--request")
        .arg(Uuid::new_v4().to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_histogram_lists_present_statuses() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (snapshot, request) = rated_snapshot();
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);

    testrollup_cmd()
        .arg("histogram")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--request")
        .arg(request.id.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"PASSED\""))
        .stdout(predicate::str::contains("\"FAILED\""))
        .stdout(predicate::str::contains("\"WARNING\"").not());
}

#[test]
fn test_path_lists_run_then_ancestors() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (snapshot, run, records) = record_chain();
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);

    let output = testrollup_cmd()
        .arg("path")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--record")
        .arg(records[2].id.to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let path: Vec<Uuid> = serde_json::from_slice(&output).expect("json output");
    assert_eq!(path, vec![run.id, records[0].id, records[1].id, records[2].id]);
}

#[test]
fn test_path_of_missing_record_is_empty() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (snapshot, _, _) = record_chain();
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);

    let output = testrollup_cmd()
        .arg("path")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--record")
        .arg(Uuid::new_v4().to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let path: Vec<Uuid> = serde_json::from_slice(&output).expect("json output");
    assert!(path.is_empty());
}

#[test]
fn test_path_depth_from_environment() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (snapshot, run, records) = record_chain();
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);

    let output = testrollup_cmd()
        .env("TESTROLLUP__PATHS__MAX_DEPTH", "2")
        .arg("path")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--record")
        .arg(records[2].id.to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let path: Vec<Uuid> = serde_json::from_slice(&output).expect("json output");
    assert_eq!(path, vec![run.id, records[1].id, records[2].id]);
}

#[test]
fn test_invalid_priority_config_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (snapshot, request) = rated_snapshot();
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);
    let config_path = temp_dir.path().join("testrollup.toml");
    fs::write(&config_path, "status_priority = [\"PASSED\", \"PASSED\"]\n")
        .expect("Failed to write config");

    testrollup_cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("rates")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--request")
        .arg(request.id.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load settings"));
}

#[test]
fn test_replay_completes_joint_request() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let first = ExecutionRequest::new("first").with_join_key("nightly");
    let second = ExecutionRequest::new("second").with_join_key("nightly");
    let run = Run::new(first.id, Uuid::new_v4(), "case")
        .with_execution_status(ExecutionStatus::InProgress);
    let snapshot = Snapshot {
        execution_requests: vec![first.clone(), second.clone()],
        runs: vec![run.clone()],
        log_records: Vec::new(),
    };
    let snapshot_path = write_snapshot(&temp_dir, &snapshot);

    let events = serde_json::json!([
        {"type": "joint_member_started", "join_key": "nightly",
         "execution_request_id": first.id, "required_count": 2},
        {"type": "joint_member_started", "join_key": "nightly",
         "execution_request_id": second.id, "required_count": 2, "timeout_secs": 60},
        {"type": "run_status_changed", "run_id": run.id, "status": "WARNING"},
        {"type": "run_finished", "run_id": run.id, "execution_status": "FINISHED"},
        {"type": "member_event", "join_key": "nightly",
         "execution_request_id": second.id, "status": "FINISHED"},
        {"type": "run_finished", "run_id": Uuid::new_v4(), "execution_status": "FINISHED"}
    ]);
    let events_path = temp_dir.path().join("events.json");
    fs::write(&events_path, events.to_string()).expect("Failed to write events");

    let output = testrollup_cmd()
        .arg("replay")
        .arg("--snapshot")
        .arg(&snapshot_path)
        .arg("--events")
        .arg(&events_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let replay: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(replay["events"]["handled"], 5);
    assert_eq!(replay["events"]["failed"], 1);
    assert_eq!(replay["joint_requests"][0]["status"], "COMPLETED");
    assert_eq!(replay["joint_requests"][0]["runs"].as_array().map(Vec::len), Some(2));

    let notifications = replay["notifications"].as_array().expect("notifications");
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].get("ReportTriggered").is_some());

    let requests = replay["execution_requests"].as_array().expect("requests");
    assert_eq!(requests[0]["name"], "first");
    assert_eq!(requests[0]["status"], "FINISHED");
    assert_eq!(requests[0]["testing_status"], "WARNING");
    assert_eq!(requests[0]["rates"]["warning_rate"], 100.0);
}

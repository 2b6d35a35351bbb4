//! End-to-end integration tests for the coalesce CLI
//!
//! These tests drive the built binary:
//! - `plan`: pure timing predictions
//! - `simulate`: a real loader against the in-memory store

use std::process::{Command, Output};

const CONFIG_VARS: [&str; 4] = [
    "COALESCE_NAME",
    "COALESCE_POLICY",
    "COALESCE_DELAY_MS",
    "COALESCE_MAX_WAIT_MS",
];

fn coalesce_with_env(args: &[&str], vars: &[(&str, &str)]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_coalesce"));
    command.args(args).env_remove("RUST_LOG");
    for var in CONFIG_VARS {
        command.env_remove(var);
    }
    command
        .envs(vars.iter().copied())
        .output()
        .expect("Failed to run coalesce")
}

fn coalesce(args: &[&str]) -> Output {
    coalesce_with_env(args, &[])
}

fn json_output(args: &[&str]) -> serde_json::Value {
    let output = coalesce(args);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "Command failed: {}", stderr);
    serde_json::from_str(stdout.trim()).expect("Invalid JSON output")
}

/// Test the `coalesce plan` command with a window policy
#[test]
fn test_plan_window() {
    let json = json_output(&["plan", "--policy", "window", "--delay-ms", "10", "--arrivals", "0,2,5,5", "--json"]);

    assert_eq!(json["policy"], "window");
    let batches = json["batches"].as_array().expect("batches array");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0]["fires_at_ms"], 10);
    assert_eq!(batches[0]["arrivals_ms"], serde_json::json!([0, 2, 5, 5]));
}

/// A buffer keeps deferring while queries keep arriving
#[test]
fn test_plan_buffer() {
    let json = json_output(&["plan", "-p", "buffer", "-d", "10", "-a", "0,2,5,10", "--json"]);

    let batches = json["batches"].as_array().expect("batches array");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0]["fires_at_ms"], 20);
}

#[test]
fn test_plan_splits_late_arrivals() {
    let json = json_output(&["plan", "--delay-ms", "10", "--arrivals", "12,0,4", "--json"]);

    let batches = json["batches"].as_array().expect("batches array");
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0]["arrivals_ms"], serde_json::json!([0, 4]));
    assert_eq!(batches[1]["arrivals_ms"], serde_json::json!([12]));
    assert_eq!(batches[1]["fires_at_ms"], 22);
}

#[test]
fn test_plan_text_output() {
    let output = coalesce(&["plan", "--policy", "capped", "--delay-ms", "10", "--max-wait-ms", "25", "--arrivals", "0,8,16,24"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Policy: capped"), "Missing policy line: {}", stdout);
    assert!(stdout.contains("fires at 25ms"), "Missing fire time: {}", stdout);
}

#[test]
fn test_rejects_unknown_policy() {
    let output = coalesce(&["plan", "--policy", "eager", "--arrivals", "0"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("eager"), "Missing policy in error: {}", stderr);
}

#[test]
fn test_rejects_short_max_wait() {
    let output = coalesce(&["plan", "--policy", "capped", "--delay-ms", "20", "--max-wait-ms", "5", "--arrivals", "0"]);

    assert!(!output.status.success());
}

/// Unset flags fall back to the COALESCE_* environment
#[test]
fn test_plan_reads_environment_defaults() {
    let output = coalesce_with_env(
        &["plan", "--arrivals", "0,2,5,10", "--json"],
        &[("COALESCE_POLICY", "buffer"), ("COALESCE_DELAY_MS", "10")],
    );
    assert!(output.status.success(), "Command failed: {}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("Invalid JSON output");
    assert_eq!(json["policy"], "buffer");
    assert_eq!(json["batches"][0]["fires_at_ms"], 20);
}

#[test]
fn test_flags_override_environment() {
    let output = coalesce_with_env(
        &["plan", "--policy", "window", "--arrivals", "0,2,5,10", "--json"],
        &[("COALESCE_POLICY", "buffer"), ("COALESCE_DELAY_MS", "garbage")],
    );
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("Invalid JSON output");
    assert_eq!(json["policy"], "window");
    // Unparseable delay keeps the 10ms default
    assert_eq!(json["delay_ms"], 10);
    assert_eq!(json["batches"].as_array().map(Vec::len), Some(2));
}

/// Test the `coalesce simulate` command coalescing duplicate queries
#[test]
fn test_simulate_coalesces_queries() {
    let json = json_output(&[
        "simulate",
        "--delay-ms",
        "200",
        "--arrivals",
        "0,1,2,3",
        "--distinct",
        "2",
        "--json",
    ]);

    assert_eq!(json["queries"], 4);
    assert_eq!(json["resolved"], 4);
    assert_eq!(json["failed"], 0);

    let batches = json["batches"].as_array().expect("batches array");
    assert_eq!(batches.len(), 1, "All queries should share one batch");
    assert_eq!(batches[0]["queries"], serde_json::json!([0, 1]));

    let metrics = &json["metrics"];
    assert_eq!(metrics["queries_received"], 4);
    assert_eq!(metrics["queries_deduplicated"], 2);
    assert_eq!(metrics["batches_dispatched"], 1);
    assert_eq!(metrics["batches_succeeded"], 1);
}

#[test]
fn test_simulate_failure_reaches_every_query() {
    let json = json_output(&[
        "simulate",
        "--delay-ms",
        "200",
        "--arrivals",
        "0,1,2,3",
        "--fail",
        "--json",
    ]);

    assert_eq!(json["resolved"], 0);
    assert_eq!(json["failed"], 4);
    assert_eq!(json["metrics"]["batches_failed"], 1);
}

#[test]
fn test_simulate_text_output() {
    let output = coalesce(&["simulate", "--delay-ms", "20", "--arrivals", "0,5"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("=== Batches ==="), "Missing batches section");
    assert!(stdout.contains("Resolved: 2"), "Missing results: {}", stdout);
    assert!(stdout.contains("=== Metrics ==="), "Missing metrics section");
}

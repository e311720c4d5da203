//! Runs the `fleet` binary against temporary config and workflow files.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::{Command, Output};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const FLEET_TOML: &str = r#"
[agent]
id = "boss"

[orchestrator]
retry_backoff_ms = 10

[[workers]]
id = "w1"
capabilities = ["fetch", "summarize"]

[[workers]]
id = "w2"
capabilities = ["fetch"]
latency_ms = 5

[[workers]]
id = "w3"
capabilities = ["fetch"]
"#;

fn fleet(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleet"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn test_strategies_lists_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let output = fleet(&dir.path().join("missing.toml"), &["strategies"]);
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    for name in ["capability-based", "load-balanced", "round-robin"] {
        assert!(stdout.contains(name), "{name} missing from:\n{stdout}");
    }
    assert!(stdout.contains("Default: load-balanced"));
}

#[test]
fn test_run_completes_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("fleet.toml");
    std::fs::write(&config, FLEET_TOML).unwrap();
    let workflow = dir.path().join("report.toml");
    std::fs::write(
        &workflow,
        r#"
name = "report"
strategy = "capability-based"

[[tasks]]
key = "fetch"
type = "fetch"
input = "https://example.com"

[[tasks]]
key = "sum"
type = "summarize"
depends_on = ["fetch"]
"#,
    )
    .unwrap();

    let output = fleet(&config, &["run", workflow.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let snapshot = stdout_json(&output);
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["progress"], 100);
    let tasks = snapshot["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1]["assignedAgent"], "w1");
}

#[test]
fn test_vote_reports_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("fleet.toml");
    std::fs::write(&config, FLEET_TOML).unwrap();

    let output = fleet(&config, &["vote", "--reject", "w3"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let outcome = stdout_json(&output);
    assert_eq!(outcome["status"], "reached");
    assert_eq!(outcome["result"], true);

    let output = fleet(
        &config,
        &["vote", "--participants", "w1,w2", "--kind", "unanimous", "--reject", "w2"],
    );
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["status"], "failed");
}

#[test]
fn test_run_rejects_bad_workflow_file() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = dir.path().join("broken.toml");
    std::fs::write(&workflow, "tasks = 3").unwrap();

    let output = fleet(&dir.path().join("fleet.toml"), &["run", workflow.to_str().unwrap()]);
    assert!(!output.status.success());
}

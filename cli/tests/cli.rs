//! End-to-end tests for the `vizstream` binary.

use std::path::Path;

use anyhow::Result;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::method;
use wiremock::matchers::path;

const ENV_OVERRIDES: [&str; 5] = [
    "VIZSTREAM_BASE_URL",
    "VIZSTREAM_STREAM_PATH",
    "VIZSTREAM_TIMEOUT_SECS",
    "VIZSTREAM_MERGE_UNKNOWN_STAGES",
    "RUST_LOG",
];

const FIB_TRANSCRIPT: &str = concat!(
    ": keep-alive\n\n",
    "data: {\"stage\": \"classification\", \"payload\": {\"type\": \"recursion\"}}\n\n",
    "data: {\"stage\": \"recursion\", \"payload\": {\"events\": [",
    "{\"event\": \"call\", \"func_name\": \"fib\", \"locals\": {\"n\": 2}},",
    "{\"event\": \"call\", \"func_name\": \"fib\", \"locals\": {\"n\": 1}},",
    "{\"event\": \"return\", \"return_value\": 1},",
    "{\"event\": \"call\", \"func_name\": \"fib\", \"locals\": {\"n\": 0}},",
    "{\"event\": \"return\", \"return_value\": 0},",
    "{\"event\": \"return\", \"return_value\": 1}",
    "]}}\n\n",
    "data: {\"stage\": \"dp_step\", \"payload\": {\"table\": {\"1\": 1, \"0\": 0}}}\n\n",
    "data: {\"stage\": \"done\", \"payload\": null}\n\n",
);

/// `vizstream` with an isolated home and no inherited overrides.
fn vizstream(home: &Path) -> Result<assert_cmd::Command> {
    let mut cmd = assert_cmd::Command::cargo_bin("vizstream")?;
    cmd.env("VIZSTREAM_HOME", home);
    for var in ENV_OVERRIDES {
        cmd.env_remove(var);
    }
    Ok(cmd)
}

#[test]
fn replay_prints_summary() -> Result<()> {
    let home = TempDir::new()?;
    let transcript = home.path().join("fib.sse");
    std::fs::write(&transcript, FIB_TRANSCRIPT)?;

    vizstream(home.path())?
        .arg("replay")
        .arg(&transcript)
        .assert()
        .success()
        .stdout(predicate::str::contains("phase: completed"))
        .stdout(predicate::str::contains("recursion: 3 calls, depth 2, root fib"))
        .stdout(predicate::str::contains("dp: [0=0, 1=1]"));
    Ok(())
}

#[test]
fn replay_json_exposes_state() -> Result<()> {
    let home = TempDir::new()?;
    let transcript = home.path().join("fib.sse");
    std::fs::write(&transcript, FIB_TRANSCRIPT)?;

    let output = vizstream(home.path())?
        .args(["replay", "--json"])
        .arg(&transcript)
        .output()?;
    assert!(output.status.success());

    let snapshot: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(snapshot["phase"], "completed");
    assert_eq!(snapshot["events"], 4);
    assert_eq!(snapshot["state"]["complete"], true);
    assert_eq!(snapshot["state"]["dp"]["table"], serde_json::json!([[0, 1], [0, 1]]));
    assert_eq!(snapshot["state"]["recursion"]["tree"]["return"], 1);
    Ok(())
}

#[test]
fn replay_missing_transcript_fails() -> Result<()> {
    let home = TempDir::new()?;
    vizstream(home.path())?
        .args(["replay", "does-not-exist.sse"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
    Ok(())
}

#[test]
fn invalid_env_override_is_reported() -> Result<()> {
    let home = TempDir::new()?;
    let transcript = home.path().join("empty.sse");
    std::fs::write(&transcript, "")?;

    vizstream(home.path())?
        .env("VIZSTREAM_MERGE_UNKNOWN_STAGES", "sometimes")
        .arg("replay")
        .arg(&transcript)
        .assert()
        .failure()
        .stderr(predicate::str::contains("VIZSTREAM_MERGE_UNKNOWN_STAGES"));
    Ok(())
}

#[test]
fn config_file_enables_unknown_stage_merging() -> Result<()> {
    let home = TempDir::new()?;
    std::fs::write(home.path().join("config.toml"), "merge_unknown_stages = true\n")?;
    let transcript = home.path().join("heatmap.sse");
    std::fs::write(
        &transcript,
        concat!(
            "data: {\"stage\": \"heatmap\", \"payload\": {\"cells\": [1]}}\n\n",
            "data: {\"stage\": \"heatmap\", \"payload\": {\"cells\": [2]}}\n\n",
        ),
    )?;

    let output = vizstream(home.path())?
        .args(["replay", "--json"])
        .arg(&transcript)
        .output()?;
    assert!(output.status.success());
    let snapshot: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(
        snapshot["state"]["extensions"]["heatmap"],
        serde_json::json!({"cells": [1, 2]})
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_streams_from_backend() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/debug/stream"))
        .and(body_json(serde_json::json!({"code": "print(fib(2))\n", "input": "2"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(FIB_TRANSCRIPT, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new()?;
    let program = home.path().join("fib.py");
    std::fs::write(&program, "print(fib(2))\n")?;

    let mut cmd = vizstream(home.path())?;
    cmd.arg("run")
        .arg(&program)
        .args(["--input", "2", "--json", "--base-url"])
        .arg(server.uri());
    let output = tokio::task::spawn_blocking(move || cmd.output()).await??;
    assert!(output.status.success());

    let snapshot: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(snapshot["phase"], "completed");
    assert_eq!(snapshot["state"]["classification"]["type"], "recursion");
    assert_eq!(snapshot["state"]["recursion"]["tree"]["children"][1]["return"], 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_exits_non_zero_on_backend_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string(r#"{"error": "sandbox down"}"#))
        .mount(&server)
        .await;

    let home = TempDir::new()?;
    let program = home.path().join("prog.py");
    std::fs::write(&program, "print(1)\n")?;

    let mut cmd = vizstream(home.path())?;
    cmd.arg("run").arg(&program).arg("--base-url").arg(server.uri());
    let output = tokio::task::spawn_blocking(move || cmd.output()).await??;

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("phase: failed"));
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Backend error (500): sandbox down"));
    Ok(())
}

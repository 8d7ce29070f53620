//! Integration tests for the shaderfarm CLI.
//!
//! These run the real binary against manifests in a temporary directory.
//! Console platforms go through worker processes, which are the same binary
//! launched with the hidden `worker` subcommand.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn shaderfarm() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("shaderfarm").unwrap()
}

/// Command running in `dir` with an isolated worker root and no colors.
fn shaderfarm_in(dir: &Path) -> Command {
    let mut cmd = shaderfarm();
    cmd.current_dir(dir)
        .env("SHADERFARM_WORKING_ROOT", dir.join("work"))
        .env("SHADERFARM_WORKER_IDLE_SECS", "2")
        .env("NO_COLOR", "1")
        .env_remove("SHADERFARM_LOG")
        .env_remove("RUST_LOG");
    cmd
}

/// Shader sources under `dir/shaders`, plus a config pointing at them.
fn write_fixtures(dir: &Path, remote: &[&str]) {
    let shaders = dir.join("shaders");
    std::fs::create_dir_all(&shaders).unwrap();
    std::fs::write(shaders.join("Common.usf"), "float4 Tint;\n").unwrap();
    std::fs::write(
        shaders.join("BasePass.usf"),
        "#include \"Common.usf\"\nvoid MainVertexShader() {}\nvoid MainPixelShader() {}\n",
    )
    .unwrap();

    let config = serde_json::json!({
        "shader_dir": shaders,
        "remote_platforms": remote,
        "parallel_threshold": 1,
        "hardware_threads": 3,
        "response_timeout_secs": 30,
    });
    std::fs::write(dir.join("config.json"), config.to_string()).unwrap();
}

fn job(entry: &str, platform: &str, stage: &str) -> serde_json::Value {
    serde_json::json!({
        "source": "BasePass.usf",
        "entry_point": entry,
        "platform": platform,
        "stage": stage,
    })
}

fn write_manifest(dir: &Path, jobs: Vec<serde_json::Value>) {
    let manifest = serde_json::json!({ "name": "BasePass", "jobs": jobs });
    std::fs::write(dir.join("batch.json"), manifest.to_string()).unwrap();
}

fn json_stdout(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_help() {
    shaderfarm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("completions"))
        .stdout(predicate::str::contains("worker").not());
}

#[test]
fn test_version() {
    shaderfarm()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shaderfarm"));
}

#[test]
fn test_completions_bash() {
    shaderfarm()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("shaderfarm"));
}

#[test]
fn test_compile_in_process_json() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), &[]);
    write_manifest(
        dir.path(),
        vec![
            job("MainVertexShader", "PcD3dSm3", "Vertex"),
            job("MainPixelShader", "PcD3dSm3", "Pixel"),
            job("MainPixelShader", "PcD3dSm4", "Pixel"),
        ],
    );

    let output = shaderfarm_in(dir.path())
        .args(["--config", "config.json", "compile", "batch.json", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report = json_stdout(&output);
    assert_eq!(report["success"], true);
    assert_eq!(report["first_failure"], serde_json::Value::Null);
    let jobs = report["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j["status"] == "succeeded"));
    assert_eq!(jobs[0]["output"]["parameters"]["includes"], "1");
}

#[test]
fn test_compile_table_output() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), &[]);
    write_manifest(dir.path(), vec![job("MainPixelShader", "PcD3dSm3", "Pixel")]);

    shaderfarm_in(dir.path())
        .args(["--config", "config.json", "compile", "batch.json", "--ascii"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BasePass.usf"))
        .stdout(predicate::str::contains("succeeded"))
        .stderr(predicate::str::contains("1 succeeded, 0 failed, 0 not started"));
}

#[test]
fn test_compile_failure_exits_2() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), &[]);
    write_manifest(
        dir.path(),
        vec![
            job("MainVertexShader", "PcD3dSm3", "Vertex"),
            job("MissingEntry", "PcD3dSm3", "Pixel"),
        ],
    );

    shaderfarm_in(dir.path())
        .args([
            "--config",
            "config.json",
            "compile",
            "batch.json",
            "--single-threaded",
            "--format",
            "plain",
        ])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("batch failed, first failure = job 1"));
}

#[test]
fn test_compile_through_workers() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), &["Xbox360", "Ps3"]);
    write_manifest(
        dir.path(),
        vec![
            job("MainVertexShader", "Xbox360", "Vertex"),
            job("MainPixelShader", "Xbox360", "Pixel"),
            job("MainVertexShader", "Ps3", "Vertex"),
            job("MainPixelShader", "Ps3", "Pixel"),
            job("MainPixelShader", "PcD3dSm3", "Pixel"),
        ],
    );

    let output = shaderfarm_in(dir.path())
        .args(["--config", "config.json", "compile", "batch.json", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report = json_stdout(&output);
    let jobs = report["jobs"].as_array().unwrap();
    assert!(jobs.iter().all(|j| j["status"] == "succeeded"));
    // Common.usf only reaches the worker through the copied fixtures
    assert_eq!(jobs[0]["output"]["parameters"]["includes"], "1");
    assert_eq!(jobs[3]["output"]["parameters"]["platform"], "PS3");

    let work = dir.path().join("work");
    assert!(work.is_dir());
}

#[test]
fn test_invalid_manifest() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("batch.json"), "{ \"jobs\": [ { \"source\": 1 } ] }").unwrap();

    shaderfarm_in(dir.path())
        .args(["compile", "batch.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error"))
        .stderr(predicate::str::contains("Invalid batch manifest"));
}

#[test]
fn test_missing_manifest() {
    let dir = tempdir().unwrap();
    shaderfarm_in(dir.path())
        .args(["compile", "nope.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope.json"));
}

#[test]
fn test_invalid_config() {
    let dir = tempdir().unwrap();
    write_manifest(dir.path(), Vec::new());
    std::fs::write(dir.path().join("config.json"), r#"{"poll_interval_ms": 0}"#).unwrap();

    shaderfarm_in(dir.path())
        .args(["--config", "config.json", "compile", "batch.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("poll_interval_ms"));
}

#[test]
fn test_empty_batch_succeeds() {
    let dir = tempdir().unwrap();
    write_manifest(dir.path(), Vec::new());

    shaderfarm_in(dir.path())
        .args(["compile", "batch.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No jobs submitted."));
}

//! Runs the built binary against the loopback provider.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

/// Binary with `HOME` pointed at `home` so no real config or `.env` is read.
fn cli(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("socialconnector").expect("binary should be built");
    cmd.env("HOME", home).env_remove("RUST_LOG");
    cmd
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn providers_lists_builtin_adapters() {
    let home = tempfile::tempdir().expect("should create temp dir");
    let output = cli(home.path())
        .arg("providers")
        .output()
        .expect("binary runs");
    assert!(output.status.success());

    let stdout = stdout_of(&output);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["loopback", "telegram\trequires: bot_token"]);
}

#[test]
fn send_over_loopback_prints_the_response() {
    let home = tempfile::tempdir().expect("should create temp dir");
    let output = cli(home.path())
        .args(["send", "--provider", "loopback", "--chat", "general", "hello there"])
        .output()
        .expect("binary runs");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let response: serde_json::Value =
        serde_json::from_str(stdout_of(&output).trim()).expect("stdout is one JSON object");
    assert_eq!(response["success"], true);
    assert_eq!(response["platform"], "loopback");
    assert_eq!(response["message_id"], "1");
}

#[test]
fn send_rejects_blank_text_through_validation() {
    let home = tempfile::tempdir().expect("should create temp dir");
    let output = cli(home.path())
        .args(["send", "-p", "loopback", "-c", "general", "   "])
        .output()
        .expect("binary runs");
    assert!(!output.status.success());
    assert!(stdout_of(&output).is_empty());
}

#[test]
fn telegram_without_a_token_fails_before_connecting() {
    let home = tempfile::tempdir().expect("should create temp dir");
    let output = cli(home.path())
        .args(["send", "-p", "telegram", "-c", "100", "hi"])
        .output()
        .expect("binary runs");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bot_token"), "stderr: {stderr}");
}

#[test]
fn config_file_drives_provider_settings() {
    let home = tempfile::tempdir().expect("should create temp dir");
    let config = home.path().join("custom.toml");
    let write = fs::write(
        &config,
        "[retry]\nenabled = false\n\n[providers.loopback]\nextra = { fail_sends = 1 }\n",
    );
    assert!(write.is_ok());

    // Retry is disabled, so the single injected failure surfaces.
    let output = cli(home.path())
        .args(["send", "-p", "loopback", "-c", "general", "hi", "--config"])
        .arg(&config)
        .output()
        .expect("binary runs");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("injected send failure"), "stderr: {stderr}");
}

#[test]
fn health_checks_named_providers() {
    let home = tempfile::tempdir().expect("should create temp dir");
    let output = cli(home.path())
        .args(["health", "loopback"])
        .output()
        .expect("binary runs");
    assert!(output.status.success());
    let status: serde_json::Value =
        serde_json::from_str(stdout_of(&output).trim()).expect("one JSON status line");
    assert_eq!(status["provider"], "loopback");
    assert_eq!(status["healthy"], true);
}

#[test]
fn unknown_provider_is_reported() {
    let home = tempfile::tempdir().expect("should create temp dir");
    let output = cli(home.path())
        .args(["send", "-p", "carrier-pigeon", "-c", "x", "coo"])
        .output()
        .expect("binary runs");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("carrier-pigeon"), "stderr: {stderr}");
}

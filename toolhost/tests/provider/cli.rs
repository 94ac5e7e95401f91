//! The `toolhost` binary end to end

use std::io::Write;
use std::process::Command;

use crate::helpers::config_document;

fn toolhost() -> Command {
    Command::new(env!("CARGO_BIN_EXE_toolhost"))
}

fn config_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("Failed to create temp config");
    write!(file, "{}", config_document()).unwrap();
    file
}

#[test]
fn test_status_lists_providers() {
    let config = config_file();
    let output = toolhost()
        .arg("--config")
        .arg(config.path())
        .args(["status", "--tools"])
        .output()
        .expect("Failed to run toolhost status");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("echo"), "{}", stdout);
    assert!(stdout.contains("disabled"));
    assert!(stdout.contains("- search_echo"));
    assert!(stdout.contains("Total: 6 providers (5 enabled)"), "{}", stdout);
}

#[test]
fn test_call_prints_result() {
    let config = config_file();
    let output = toolhost()
        .arg("--config")
        .arg(config.path())
        .args(["call", "echo", "echo", "--args", r#"{"greeting":"hello"}"#])
        .output()
        .expect("Failed to run toolhost call");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""greeting": "hello""#), "{}", stdout);
}

#[test]
fn test_call_prints_text_content() {
    let config = config_file();
    let output = toolhost()
        .arg("--config")
        .arg(config.path())
        .args(["call", "echo", "noise"])
        .output()
        .expect("Failed to run toolhost call");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "done");
}

#[test]
fn test_check_reports_failures() {
    let config = config_file();

    let ok = toolhost()
        .arg("--config")
        .arg(config.path())
        .args(["check", "--provider", "echo"])
        .output()
        .expect("Failed to run toolhost check");
    assert!(ok.status.success());
    assert!(String::from_utf8_lossy(&ok.stdout).contains("initialized"));

    let failed = toolhost()
        .arg("--config")
        .arg(config.path())
        .args(["check", "--provider", "rejects"])
        .output()
        .expect("Failed to run toolhost check");
    assert!(!failed.status.success());
}

#[test]
fn test_missing_config_is_an_error() {
    let output = toolhost()
        .args(["--config", "/nonexistent/mcp_config.json", "status"])
        .output()
        .expect("Failed to run toolhost");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}

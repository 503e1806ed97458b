//! CLI Integration Tests for ares-rag
//!
//! Runs the built binary. Only commands that need no embedding backend are
//! exercised end to end.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run ares-rag with arguments, colors off
fn run_ares(args: &[&str], working_dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ares-rag"))
        .args(args)
        .arg("--no-color")
        .current_dir(working_dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("ares-rag.toml");
    fs::write(&path, body).expect("Failed to write config");
    path.to_string_lossy().into_owned()
}

const MEMORY_DB: &str = r#"
[database]
url = ":memory:"

[vector]
provider = "memory"
dimensions = 8
"#;

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = run_ares(&["--help"], dir.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["config", "ingest", "search", "delete", "sweep", "reconcile"] {
        assert!(stdout.contains(cmd), "missing {} in help", cmd);
    }
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let output = run_ares(&["--version"], dir.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

// =============================================================================
// Config Command Tests
// =============================================================================

#[test]
fn test_config_without_file_shows_defaults() {
    let dir = TempDir::new().unwrap();
    let output = run_ares(&["config"], dir.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("./data/ares-rag.db"));
    assert!(stdout.contains("text-embedding-v3"));
}

#[test]
fn test_config_full_prints_toml() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), MEMORY_DB);
    let output = run_ares(&["config", "--full", "--config", &config], dir.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[allocator]"));
    assert!(stdout.contains("dimensions = 8"));
}

#[test]
fn test_config_validate() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), MEMORY_DB);
    let output = run_ares(&["config", "--validate", "--config", &config], dir.path());
    assert!(output.status.success());

    let bad = write_config(dir.path(), "[document]\nwindow_size = 2\nwindow_stride = 3\n");
    let output = run_ares(&["config", "--validate", "--config", &bad], dir.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("window_stride"));
}

#[test]
fn test_config_validate_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let output = run_ares(&["config", "--validate", "--config", "nope.toml"], dir.path());
    assert!(!output.status.success());
}

// =============================================================================
// Maintenance Command Tests
// =============================================================================

#[test]
fn test_sweep_and_reconcile_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), MEMORY_DB);

    let output = run_ares(&["sweep", "--config", &config], dir.path());
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Removed 0 expired memories"));

    let output = run_ares(&["reconcile", "--config", &config], dir.path());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Re-indexed 0 documents"));
}

#[test]
fn test_ingest_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), MEMORY_DB);

    let output = run_ares(
        &["ingest", "--owner", "1", "--config", &config, "missing.txt"],
        dir.path(),
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.txt"));
}

#[test]
fn test_delete_unknown_document_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), MEMORY_DB);

    let output = run_ares(&["delete", "--owner", "1", "--config", &config, "42"], dir.path());
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

//! Integration tests for the `sorel` CLI binary.
//!
//! These cover argument parsing, offline decoding, the metadata cache and
//! config handling. None of them need a broker or the metadata service.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `sorel` binary with env isolation.
///
/// Clears all `SOREL_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn sorel_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("sorel");
    cmd.env("HOME", "/tmp/sorel-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/sorel-cli-test-nonexistent")
        .env("XDG_CACHE_HOME", "/tmp/sorel-cli-test-nonexistent")
        .env_remove("SOREL_CONFIG")
        .env_remove("SOREL_PROFILE")
        .env_remove("SOREL_BROKER")
        .env_remove("SOREL_BROKER_PORT")
        .env_remove("SOREL_API_URL")
        .env_remove("SOREL_CACHE_DIR")
        .env_remove("SOREL_OUTPUT")
        .env_remove("SOREL_INSECURE")
        .env_remove("SOREL_TIMEOUT");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

const METADATA: &str = r#"{
    "datapoints": [
        {"address": 44003, "length": 2, "type": "uns16", "step": 0.1, "name": "Sensor 1"},
        {"address": 43010, "length": 4, "type": "float32", "name": "Power"},
        {"address": 43020, "length": 2, "type": "uint16", "name": "Mode",
         "format": {"0": "Off", "1": "Auto", "2": "Manual"}}
    ]
}"#;

const CACHE_FILE: &str = "meta_0000_00a6_en_latest.json";

fn write_metadata(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = sorel_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    sorel_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Sorel Connect")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("decode"))
            .and(predicate::str::contains("metadata")),
    );
}

#[test]
fn test_version_flag() {
    sorel_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sorel"));
}

#[test]
fn test_invalid_subcommand() {
    sorel_cmd().arg("frobnicate").assert().failure().code(2);
}

#[test]
fn test_invalid_output_format() {
    sorel_cmd()
        .args(["-o", "xml", "config", "path"])
        .assert()
        .failure()
        .code(2);
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    sorel_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    sorel_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_completions_fish() {
    sorel_cmd()
        .args(["completions", "fish"])
        .assert()
        .success()
        .stdout(predicate::str::contains("complete"));
}

// ── Offline decode ──────────────────────────────────────────────────

#[test]
fn test_decode_scaled_register() {
    let dir = TempDir::new().unwrap();
    let file = write_metadata(dir.path(), "doc.json", METADATA);

    sorel_cmd()
        .args(["-o", "plain", "decode", "-m"])
        .arg(&file)
        .args(["-r", "44003=930"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sensor 1\t93.0"));
}

#[test]
fn test_decode_json_combines_registers() {
    let dir = TempDir::new().unwrap();
    let file = write_metadata(dir.path(), "doc.json", METADATA);

    let output = sorel_cmd()
        .args(["-o", "json", "decode", "-m"])
        .arg(&file)
        .args(["-r", "43010=16968", "-r", "43011=0", "-r", "43020=1"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "Power");
    assert_eq!(rows[0]["value"], 50.0);
    assert_eq!(rows[1]["name"], "Mode");
    assert_eq!(rows[1]["value"], "Auto");
}

#[test]
fn test_decode_all_lists_missing_datapoints() {
    let dir = TempDir::new().unwrap();
    let file = write_metadata(dir.path(), "doc.json", METADATA);

    sorel_cmd()
        .args(["-o", "plain", "decode", "--all", "-m"])
        .arg(&file)
        .args(["-r", "44003=930"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Power").and(predicate::str::contains("Mode")));
}

#[test]
fn test_decode_rejects_not_found_marker() {
    let dir = TempDir::new().unwrap();
    let file = write_metadata(dir.path(), "doc.json", r#"{"error": "Device not found"}"#);

    sorel_cmd()
        .args(["decode", "-m"])
        .arg(&file)
        .args(["-r", "44003=930"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Device not found"));
}

#[test]
fn test_decode_rejects_bare_register_value() {
    let dir = TempDir::new().unwrap();
    let file = write_metadata(dir.path(), "doc.json", METADATA);

    sorel_cmd()
        .args(["decode", "-m"])
        .arg(&file)
        .args(["-r", "930"])
        .assert()
        .failure()
        .code(2);
}

// ── Metadata ────────────────────────────────────────────────────────

#[test]
fn test_metadata_url_uses_api_override() {
    let dir = TempDir::new().unwrap();
    sorel_cmd()
        .arg("--cache-dir")
        .arg(dir.path())
        .args(["--api-url", "http://mirror.local:8080"])
        .args(["metadata", "url", "0000", "00a6", "-l", "de"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "http://mirror.local:8080/api/public/0000/device/00a6/metadata?language=de",
        ));
}

#[test]
fn test_metadata_fetch_served_from_cache() {
    let dir = TempDir::new().unwrap();
    write_metadata(dir.path(), CACHE_FILE, METADATA);

    // Nothing listens on the discard port; a request would fail.
    let output = sorel_cmd()
        .arg("--cache-dir")
        .arg(dir.path())
        .args(["--api-url", "http://127.0.0.1:9"])
        .args(["-o", "json", "metadata", "fetch", "0000", "00a6"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "ok");
    assert_eq!(report["datapoints"].as_array().unwrap().len(), 3);
}

#[test]
fn test_metadata_fetch_cached_not_found() {
    let dir = TempDir::new().unwrap();
    write_metadata(dir.path(), CACHE_FILE, r#"{"error": "Device not found"}"#);

    sorel_cmd()
        .arg("--cache-dir")
        .arg(dir.path())
        .args(["--api-url", "http://127.0.0.1:9"])
        .args(["metadata", "fetch", "0000", "00a6"])
        .assert()
        .failure()
        .code(4);
}

// ── Cache ───────────────────────────────────────────────────────────

#[test]
fn test_cache_list_json() {
    let dir = TempDir::new().unwrap();
    write_metadata(dir.path(), CACHE_FILE, METADATA);

    let output = sorel_cmd()
        .arg("--cache-dir")
        .arg(dir.path())
        .args(["-o", "json", "cache", "list"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entries[0]["file_name"], CACHE_FILE);
}

#[test]
fn test_cache_clear_removes_files() {
    let dir = TempDir::new().unwrap();
    write_metadata(dir.path(), CACHE_FILE, METADATA);

    sorel_cmd()
        .arg("--cache-dir")
        .arg(dir.path())
        .args(["cache", "clear"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed 1"));

    assert!(!dir.path().join(CACHE_FILE).exists());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_without_file() {
    sorel_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_profile"));
}

#[test]
fn test_config_path_honors_flag() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    sorel_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    sorel_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[profiles.default"), "{written}");

    sorel_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .failure()
        .code(6);

    sorel_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_profiles_marks_active() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "default_profile = \"home\"\n\n[profiles.home.broker]\nhost = \"10.0.0.5\"\n",
    )
    .unwrap();

    sorel_cmd()
        .arg("--config")
        .arg(&path)
        .args(["-o", "json", "config", "profiles"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"active\": true")
                .and(predicate::str::contains("10.0.0.5:1883")),
        );
}

//! Integration tests for the `autoarm` CLI binary.
//!
//! Config files live in temp dirs and every reconciliation runs against the
//! in-memory host, so nothing here touches a real home or user config.
#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `autoarm` binary with env isolation.
fn autoarm_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("autoarm");
    cmd.env("HOME", "/tmp/autoarm-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/autoarm-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("AUTOARM_CONFIG")
        .env_remove("AUTOARM_ALARM_PANEL")
        .env_remove("AUTOARM_ARM_AWAY_DELAY")
        .env_remove("RUST_LOG");
    cmd
}

const HOUSE: &str = r#"
alarm_panel = "alarm_control_panel.home"

[occupancy]
entity_id = ["person.alex", "person.sam"]
"#;

fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("autoarm.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = autoarm_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_flag() {
    autoarm_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("config")
            .and(predicate::str::contains("reset"))
            .and(predicate::str::contains("states")),
    );
}

#[test]
fn test_version_flag() {
    autoarm_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("autoarm"));
}

#[test]
fn test_unknown_subcommand_is_usage_error() {
    autoarm_cmd().arg("rearm").assert().code(2);
}

// ── States ──────────────────────────────────────────────────────────

#[test]
fn test_states_table() {
    autoarm_cmd().arg("states").assert().success().stdout(
        predicate::str::contains("armed_away")
            .and(predicate::str::contains("Zombie"))
            .and(predicate::str::contains("unavailable")),
    );
}

#[test]
fn test_states_plain_one_per_line() {
    let output = autoarm_cmd()
        .args(["states", "-o", "plain"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().next(), Some("disarmed"));
    assert!(stdout.lines().any(|l| l == "armed_vacation"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    autoarm_cmd()
        .args(["config", "path", "--config", "/srv/autoarm/house.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/srv/autoarm/house.yaml"));
}

#[test]
fn test_config_validate_accepts_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, HOUSE);
    autoarm_cmd()
        .args(["config", "validate", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Configuration valid")
                .and(predicate::str::contains("alarm_control_panel.home")),
        );
}

#[test]
fn test_config_validate_missing_file() {
    autoarm_cmd()
        .args(["config", "validate", "--config", "/tmp/autoarm-none/autoarm.toml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_validate_names_bad_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "arm_away_delay = 30\n");
    autoarm_cmd()
        .args(["config", "validate", "--config"])
        .arg(&path)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("alarm_panel"));
}

#[test]
fn test_config_env_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, HOUSE);
    autoarm_cmd()
        .env("AUTOARM_ARM_AWAY_DELAY", "240")
        .args(["config", "show", "-o", "json", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"arm_away_delay\": 240"));
}

#[test]
fn test_config_show_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, HOUSE);
    autoarm_cmd()
        .args(["config", "show", "-o", "yaml", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("alarm_panel: alarm_control_panel.home"));
}

// ── Reset ───────────────────────────────────────────────────────────

#[test]
fn test_reset_with_someone_home_arms_home() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, HOUSE);
    autoarm_cmd()
        .args(["reset", "--home", "person.alex", "-o", "plain", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout("armed_home\n");
}

#[test]
fn test_reset_nobody_home_arms_away() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, HOUSE);
    let output = autoarm_cmd()
        .args(["reset", "-o", "json", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["before"], "disarmed");
    assert_eq!(report["after"], "armed_away");
    assert_eq!(report["result"], "armed_away");
    assert_eq!(report["calculation"]["occupied"], false);
}

#[test]
fn test_reset_rejects_unknown_panel_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, HOUSE);
    autoarm_cmd()
        .args(["reset", "--panel", "sleepy", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--panel"));
}

#[test]
fn test_reset_rejects_malformed_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, HOUSE);
    autoarm_cmd()
        .args(["reset", "--event", "calendar.house", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("CALENDAR=SUMMARY"));
}

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

fn valid_config_json() -> &'static str {
    r#"
{
  "version": 1,
  "channel": "alarm_channel",
  "key_scheme": "legacy",
  "sounds": {
    "alarm": "/opt/sounds/wake.ogg"
  },
  "notification": {
    "app_name": "Alarm",
    "channel_id": "alarm_channel",
    "channel_name": "Alarm Notifications"
  },
  "launch_command": ["alarm-app", "--foreground"]
}
"#
}

#[test]
fn check_succeeds_with_valid_config() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("bridge.json");
    fs::write(&config, valid_config_json()).expect("write json");

    let mut cmd = cargo_bin_cmd!("alarm-bridge");
    cmd.arg("--check")
        .arg("--config")
        .arg(config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Channel: alarm_channel"))
        .stdout(predicate::str::contains("Key scheme: legacy"))
        .stdout(predicate::str::contains("Launch command: alarm-app --foreground"));
}

#[test]
fn check_without_config_uses_defaults() {
    let mut cmd = cargo_bin_cmd!("alarm-bridge");
    cmd.arg("--check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Key scheme: sha256"))
        .stdout(predicate::str::contains("Launch command: none"));
}

#[test]
fn malformed_json_fails_with_clear_error() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("bridge.json");
    fs::write(&config, "{ not-valid-json ").expect("write invalid json");

    let mut cmd = cargo_bin_cmd!("alarm-bridge");
    cmd.arg("--check")
        .arg("--config")
        .arg(config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn unsupported_version_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("bridge.json");
    fs::write(&config, r#"{ "version": 3 }"#).expect("write json");

    let mut cmd = cargo_bin_cmd!("alarm-bridge");
    cmd.arg("--check")
        .arg("--config")
        .arg(config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported config version 3"));
}

#[test]
fn missing_config_file_fails() {
    let dir = tempdir().expect("tempdir");

    let mut cmd = cargo_bin_cmd!("alarm-bridge");
    cmd.arg("--check")
        .arg("--config")
        .arg(dir.path().join("absent.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unable to read config file"));
}

#[test]
fn key_for_uses_configured_scheme() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("bridge.json");
    fs::write(&config, valid_config_json()).expect("write json");

    let mut cmd = cargo_bin_cmd!("alarm-bridge");
    cmd.arg("--config")
        .arg(config)
        .arg("--key-for")
        .arg("morning")
        .assert()
        .success()
        .stdout("1240152004\n");
}

#[test]
fn key_for_defaults_to_non_negative_digest_key() {
    let mut cmd = cargo_bin_cmd!("alarm-bridge");
    cmd.arg("--key-for")
        .arg("morning")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^[0-9]+\n$").expect("regex"));
}

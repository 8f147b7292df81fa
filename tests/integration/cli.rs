#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use sha2::{Digest, Sha512};
use tempfile::tempdir;

#[test]
fn help_documents_the_password_flag() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("condr"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--set-password"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn set_password_persists_the_hash_and_exits_cleanly() {
    let temp = tempdir().expect("failed to create tempdir");
    let state_dir = temp.path().join("state");
    let config_path = temp.path().join("conductor.yaml");
    fs::write(
        &config_path,
        format!(
            r#"state_dir: {}
liveness:
  timeout_ms: 500
shutdown:
  reply_timeout_ms: 1000
"#,
            state_dir.display()
        ),
    )
    .expect("failed to write config");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("condr"));
    cmd.arg("--config")
        .arg(&config_path)
        .arg("--set-password")
        .arg("correct horse")
        .arg("--log-level")
        .arg("debug")
        .assert()
        .success();

    let settings_path = state_dir.join("settings.json");
    assert!(settings_path.exists(), "settings store should exist");

    let settings: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&settings_path).unwrap()).unwrap();

    let digest = Sha512::digest("correct horse".as_bytes());
    let expected: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    assert_eq!(
        settings["password"]["value"],
        serde_json::Value::String(expected)
    );
    assert!(settings["password"]["updated_at"].is_string());
}

#[test]
fn bogus_config_path_fails() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("condr"));
    cmd.arg("--config")
        .arg("/nonexistent/conductor.yaml")
        .arg("--set-password")
        .arg("x")
        .assert()
        .failure();
}

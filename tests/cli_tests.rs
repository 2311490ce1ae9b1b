//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the persona-relay binary, isolated from any config
/// files or environment on the host.
fn relay_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("persona-relay").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("PERSONA_RELAY_CONFIG")
        .env_remove("PERSONA_RELAY_TOKEN")
        .env_remove("PERSONA_RELAY_ROSTER");
    cmd
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Persona Relay"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("roster"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("persona-relay"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("persona-relay"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("[bot]"))
        .stdout(predicate::str::contains("[gateway]"))
        .stdout(predicate::str::contains("[delivery]"))
        .stdout(predicate::str::contains("[dispatch]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_config_show_redacts_token() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .env("PERSONA_RELAY_TOKEN", "super-secret-token")
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("super-secret-token").not());
}

#[test]
fn test_config_validate_default() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("config")
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_fixture() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .assert()
        .success();
}

#[test]
fn test_config_validate_invalid_fixture() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::invalid_config_fixture())
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("gateway.url"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/config.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found").or(predicate::str::contains("Error")));
}

#[test]
fn test_config_init_then_validate() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("relay.toml");

    relay_cmd(&home)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("relay.toml"));
    assert!(path.exists());

    relay_cmd(&home)
        .args(["config", "validate", "--config"])
        .arg(&path)
        .assert()
        .success();

    // Second init without --force refuses to overwrite
    relay_cmd(&home)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    relay_cmd(&home)
        .args(["config", "init", "--force", "--path"])
        .arg(&path)
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Roster Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_roster_check_fixture() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .args(["roster", "check"])
        .arg(common::roster_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("Personas:   3"))
        .stdout(predicate::str::contains("Grants:     1"))
        .stdout(predicate::str::contains("Overrides:  1"))
        .stdout(predicate::str::contains("Trigger conflicts (1)"))
        .stdout(predicate::str::contains("Mira"))
        .stdout(predicate::str::contains("shadowed"));
}

#[test]
fn test_roster_check_invalid() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("bad.toml");
    std::fs::write(
        &path,
        "[[grant]]\nowner = \"1\"\nguild = \"100\"\nviewer = \"2\"\npersona = \"Nobody\"\n",
    )
    .unwrap();

    relay_cmd(&home)
        .args(["roster", "check"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nobody"));
}

#[test]
fn test_roster_check_missing_file() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .args(["roster", "check", "/nonexistent/roster.toml"])
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────
// Run Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_help() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run the relay"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--roster"));
}

#[test]
fn test_run_with_invalid_config() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("run")
        .arg("--config")
        .arg("/nonexistent/config.toml")
        .assert()
        .failure();
}

#[test]
fn test_run_without_token() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("run")
        .arg("--config")
        .arg(common::valid_config_fixture())
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("bot.token"));
}

// ─────────────────────────────────────────────────────────────────
// Flags and Errors
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbosity_flags() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home).arg("-v").arg("version").assert().success();
    relay_cmd(&home).arg("-vv").arg("version").assert().success();
    relay_cmd(&home).arg("--quiet").arg("version").assert().success();
}

#[test]
fn test_unknown_command() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home)
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    let home = TempDir::new().unwrap();
    relay_cmd(&home).assert().failure();
}

//! Integration tests for the Tidemark CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get the tidemark binary
#[allow(deprecated)]
fn tidemark_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tidemark").unwrap();
    cmd.env_remove("TIDEMARK_DB_URL");
    cmd
}

#[test]
fn test_help_command() {
    tidemark_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tidemark"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("seed"));
}

#[test]
fn test_version_command() {
    tidemark_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("Version"))
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_migrate_help() {
    tidemark_cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("new"));
}

#[test]
fn test_migrate_up_help() {
    tidemark_cmd()
        .args(["migrate", "up", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--skip-seed"));
}

#[test]
fn test_migrate_new_creates_file() {
    let temp_dir = TempDir::new().unwrap();

    tidemark_cmd()
        .current_dir(temp_dir.path())
        .args(["migrate", "new", "create_users"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created new migration"));

    let files: Vec<String> = fs::read_dir(temp_dir.path().join("migrations"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("_create_users.sql"));
}

#[test]
fn test_migrate_new_uses_configured_directory() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("tidemark.toml"),
        "[migrations]\ndirectory = \"db/migrations\"\n",
    )
    .unwrap();

    tidemark_cmd()
        .current_dir(temp_dir.path())
        .args(["migrate", "new", "add_index"])
        .assert()
        .success();

    assert!(temp_dir.path().join("db/migrations").is_dir());
}

#[test]
fn test_migrate_new_rejects_invalid_name() {
    let temp_dir = TempDir::new().unwrap();

    tidemark_cmd()
        .current_dir(temp_dir.path())
        .args(["migrate", "new", "drop table users"])
        .assert()
        .failure();

    assert!(!temp_dir.path().join("migrations").exists());
}

#[test]
fn test_migrate_up_without_database_url() {
    let temp_dir = TempDir::new().unwrap();

    tidemark_cmd()
        .current_dir(temp_dir.path())
        .args(["migrate", "up"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Database URL"));
}

#[test]
fn test_unreachable_database_shows_help() {
    let temp_dir = TempDir::new().unwrap();

    tidemark_cmd()
        .current_dir(temp_dir.path())
        .args(["migrate", "list", "--db-url", "postgres://tidemark@127.0.0.1:1/tidemark"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Database error"))
        .stderr(predicate::str::contains(
            "check the database URL and that the server is reachable",
        ));
}

#[test]
fn test_migrate_up_rejects_non_numeric_target() {
    tidemark_cmd()
        .args(["migrate", "up", "--target", "latest"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_config_file() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("tidemark.toml"), "[migrations\n").unwrap();

    tidemark_cmd()
        .current_dir(temp_dir.path())
        .args(["migrate", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

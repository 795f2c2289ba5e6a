use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("tweety")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("clear"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_help_shows_subcommands() {
    cargo_bin_cmd!("tweety")
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("path"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("tweety")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}

#[test]
fn test_models_lists_catalog() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("tweety")
        .env("TWEETY_HOME", dir.path())
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("meta-llama3-8b"))
        .stdout(predicate::str::contains("mistral-7b"))
        .stdout(predicate::str::contains("gemma-2b"))
        .stdout(predicate::str::contains("* configured default"));
}

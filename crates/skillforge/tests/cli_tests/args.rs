//! CLI argument tests.

use super::skillforge;
use predicates::prelude::*;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn test_arg_help() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Terminal simulator and exercise checker",
        ));
    Ok(())
}

#[test]
fn test_arg_version() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("skillforge"));
    Ok(())
}

#[test]
fn test_arg_missing_subcommand() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path()).assert().failure();
    Ok(())
}

#[test]
fn test_arg_invalid_format() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["--format", "invalid", "exec", "pwd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));
    Ok(())
}

#[test]
fn test_arg_threshold_out_of_range() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["--threshold", "1.5", "exec", "pwd"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("pass-threshold"));
    Ok(())
}

#[test]
fn test_arg_bad_config_file() -> TestResult {
    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("skillforge.config.yaml"), "threshold: 0.5\n")?;
    skillforge(dir.path())
        .args(["exec", "pwd"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load config"));
    Ok(())
}

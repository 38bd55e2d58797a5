//! `skillforge replay` tests.

use super::{fixtures_dir, skillforge};
use predicates::prelude::*;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn fixture(name: &str) -> String {
    fixtures_dir().join(name).to_string_lossy().to_string()
}

#[test]
fn test_replay_git_setup() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["replay", &fixture("git_setup.yaml")])
        .assert()
        .success()
        .stdout(predicate::str::contains("exercise setup ... ok"))
        .stdout(predicate::str::contains("Initialized empty Git repository in /project/.git/"))
        .stdout(predicate::str::contains("replay result: ok. 4 passed; 0 failed"));
    Ok(())
}

#[test]
fn test_replay_saves_final_state() -> TestResult {
    let dir = TempDir::new()?;
    let state = dir.path().join("final.json");
    let state_arg = state.to_string_lossy().to_string();
    skillforge(dir.path())
        .args(["replay", &fixture("git_setup.yaml"), "--save-state", &state_arg])
        .assert()
        .success();

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&state)?)?;
    assert!(saved["git"].to_string().contains("/project"));

    // The saved state resumes where the scenario ended.
    skillforge(dir.path())
        .args(["exec", "git log --oneline", "--state", &state_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("first"));
    Ok(())
}

#[test]
fn test_replay_failure_exit_code() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["replay", &fixture("failing.yaml")])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("exercise where ... FAILED"));
    Ok(())
}

#[test]
fn test_replay_verbose_table() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["--verbose", "replay", &fixture("git_setup.yaml")])
        .assert()
        .success()
        .stdout(predicate::str::contains("Verdict"))
        .stdout(predicate::str::contains("Pass"));
    Ok(())
}

#[test]
fn test_replay_json_report() -> TestResult {
    let dir = TempDir::new()?;
    let output = skillforge(dir.path())
        .args(["--format", "json", "replay", &fixture("git_setup.yaml")])
        .output()?;
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["passed"], 4);
    assert_eq!(json["failed"], 0);
    assert_eq!(json["steps"][1]["result"]["exit_code"], 128);
    assert_eq!(json["steps"][1]["expected_exit"], 128);
    assert_eq!(json["steps"][2]["exercise"], "init");
    Ok(())
}

#[test]
fn test_replay_missing_file() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["replay", "/nonexistent/scenario.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load scenario"));
    Ok(())
}

//! `skillforge check` tests.

use super::{fixtures_dir, skillforge};
use predicates::prelude::*;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn exercise_arg() -> String {
    fixtures_dir()
        .join("list_all.yaml")
        .to_string_lossy()
        .to_string()
}

#[test]
fn test_check_exact_answer_passes() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["check", &exercise_arg(), "ls -la"])
        .assert()
        .success()
        .stdout(predicate::str::contains("exercise list-all ... ok"))
        .stdout(predicate::str::contains("Correct! Well done."));
    Ok(())
}

#[test]
fn test_check_reordered_flags_pass() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["--verbose", "check", &exercise_arg(), "ls -al"])
        .assert()
        .success()
        .stdout(predicate::str::contains("strategy: token_set"));
    Ok(())
}

#[test]
fn test_check_wrong_answer_fails_with_encouragement() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["check", &exercise_arg(), "pwd"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("exercise list-all ... FAILED"))
        .stdout(predicate::str::contains("Not quite. Give it another try!"));
    Ok(())
}

#[test]
fn test_check_hints_escalate_across_runs() -> TestResult {
    let dir = TempDir::new()?;
    let attempts = dir.path().join("attempts.json");
    let attempts_arg = attempts.to_string_lossy().to_string();
    let exercise = exercise_arg();

    skillforge(dir.path())
        .args(["check", &exercise, "pwd", "--attempts", &attempts_arg])
        .assert()
        .code(1);
    skillforge(dir.path())
        .args(["check", &exercise, "ls", "--attempts", &attempts_arg])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "Hidden files start with a dot; ls needs a flag to show them",
        ));

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&attempts)?)?;
    assert_eq!(saved["sessions"]["default"]["list-all"]["count"], 2);
    assert_eq!(saved["current"]["default"], "list-all");
    Ok(())
}

#[test]
fn test_check_reentered_exercise_starts_over() -> TestResult {
    let dir = TempDir::new()?;
    let attempts = dir.path().join("attempts.json");
    let attempts_arg = attempts.to_string_lossy().to_string();
    let other = dir.path().join("whoami.yaml");
    std::fs::write(
        &other,
        "id: whoami\nobjective: Show the current user\nexpected_patterns: [whoami]\n",
    )?;
    let other_arg = other.to_string_lossy().to_string();

    let earlier = [
        (exercise_arg(), "pwd"),
        (exercise_arg(), "ls"),
        (other_arg, "pwd"),
    ];
    for (exercise, answer) in earlier {
        skillforge(dir.path())
            .args(["check", &exercise, answer, "--attempts", &attempts_arg])
            .assert()
            .code(1);
    }
    skillforge(dir.path())
        .args(["check", &exercise_arg(), "pwd", "--attempts", &attempts_arg])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Not quite. Give it another try!"));

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&attempts)?)?;
    assert_eq!(saved["sessions"]["default"]["list-all"]["count"], 1);
    Ok(())
}

#[test]
fn test_check_json_output() -> TestResult {
    let dir = TempDir::new()?;
    let output = skillforge(dir.path())
        .args(["--format", "json", "check", &exercise_arg(), "ls -la"])
        .output()?;
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["exercise"], "list-all");
    assert_eq!(json["validation"]["passed"], true);
    assert_eq!(json["validation"]["strategy"], "exact");
    assert!(json["timestamp"].as_str().is_some_and(|t| t.ends_with('Z')));
    Ok(())
}

#[test]
fn test_check_empty_answer() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["check", &exercise_arg(), "   "])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("No answer provided"));
    Ok(())
}

#[test]
fn test_check_missing_exercise_file() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["check", "/nonexistent/exercise.yaml", "ls"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load exercise"));
    Ok(())
}

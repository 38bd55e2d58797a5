//! `skillforge exec` tests.

use super::skillforge;
use predicates::prelude::*;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn test_exec_echo() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["exec", "echo hello world"])
        .assert()
        .success()
        .stdout("hello world\n");
    Ok(())
}

#[test]
fn test_exec_starts_in_home() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["exec", "pwd"])
        .assert()
        .success()
        .stdout("/home/user\n");
    Ok(())
}

#[test]
fn test_exec_empty_root() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["--empty", "exec", "pwd"])
        .assert()
        .success()
        .stdout("/\n");
    Ok(())
}

#[test]
fn test_exec_propagates_exit_code() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["exec", "cat nope.txt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "cat: nope.txt: No such file or directory",
        ));
    Ok(())
}

#[test]
fn test_exec_unknown_command_without_llm() -> TestResult {
    let dir = TempDir::new()?;
    skillforge(dir.path())
        .args(["exec", "cowsay moo"])
        .assert()
        .code(127)
        .stderr(predicate::str::contains("cowsay: command not found"));
    Ok(())
}

#[test]
fn test_exec_state_file_carries_over() -> TestResult {
    let dir = TempDir::new()?;
    let state = dir.path().join("state.json");
    let state_arg = state.to_string_lossy().to_string();

    skillforge(dir.path())
        .args(["exec", "mkdir demo && cd demo && touch app.py", "--state", &state_arg])
        .assert()
        .success();
    assert!(state.exists());

    skillforge(dir.path())
        .args(["exec", "pwd && ls", "--state", &state_arg])
        .assert()
        .success()
        .stdout("/home/user/demo\napp.py\n");
    Ok(())
}

#[test]
fn test_exec_json_output() -> TestResult {
    let dir = TempDir::new()?;
    let output = skillforge(dir.path())
        .args(["--format", "json", "exec", "mkdir notes"])
        .output()?;
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["origin"], "emulated");
    assert_eq!(json["mutations"][0]["kind"], "dir_created");
    assert_eq!(json["mutations"][0]["path"], "/home/user/notes");
    Ok(())
}

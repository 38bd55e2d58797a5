//! Tests that drive the real Claude CLI through `--llm`.
#![cfg(feature = "integration-test")]

use super::skillforge;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn claude_available() -> bool {
    which::which("claude").is_ok()
}

#[test]
fn test_llm_synthesizes_unknown_command() -> TestResult {
    if !claude_available() {
        eprintln!("skipping: claude CLI not found");
        return Ok(());
    }
    let dir = TempDir::new()?;
    let output = skillforge(dir.path())
        .args(["--llm", "--format", "json", "exec", "uname -s"])
        .output()?;

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["origin"], "synthesized");
    assert!(json["mutations"].as_array().is_some_and(Vec::is_empty));
    Ok(())
}

#[test]
fn test_llm_deterministic_match_skips_judge() -> TestResult {
    if !claude_available() {
        eprintln!("skipping: claude CLI not found");
        return Ok(());
    }
    let dir = TempDir::new()?;
    let exercise = super::fixtures_dir().join("list_all.yaml");
    let output = skillforge(dir.path())
        .args(["--llm", "--format", "json", "check"])
        .arg(&exercise)
        .arg("ls -la")
        .output()?;

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["validation"]["strategy"], "exact");
    Ok(())
}

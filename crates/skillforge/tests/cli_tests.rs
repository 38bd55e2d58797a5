//! Integration tests for the skillforge CLI.
//!
//! Each test targets a specific feature to ensure failures clearly identify what broke.
//!
//! ## Test Categories
//!
//! ### CLI Arguments
//! - help, version, invalid args
//!
//! ### exec
//! - output and exit codes, state files, JSON output
//!
//! ### check
//! - pass/fail exit codes, hint ladder across runs, config errors
//!
//! ### replay
//! - scenario fixtures, saved state, JSON report
//!
//! ### llm (require Claude CLI)
//! - synthesized output, judge bypass on deterministic matches
//!
//! Run with: `cargo test --features integration-test`

#[path = "cli_tests/args.rs"]
mod args;
#[path = "cli_tests/check.rs"]
mod check;
#[path = "cli_tests/exec.rs"]
mod exec;
#[path = "cli_tests/llm.rs"]
mod llm;
#[path = "cli_tests/replay.rs"]
mod replay;

use std::path::{Path, PathBuf};

#[must_use]
pub fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_skillforge"))
}

/// Create a skillforge command isolated in `dir`.
///
/// The working directory and config directory both point at `dir` so a
/// stray `skillforge.config.yaml` elsewhere cannot leak in.
#[must_use]
pub fn skillforge(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(binary_path());
    cmd.current_dir(dir)
        .env_remove("SKILLFORGE_LOG")
        .arg("--no-color")
        .arg("--config-dir")
        .arg(dir);
    cmd
}

#[must_use]
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

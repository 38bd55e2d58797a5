//! Deterministic tool emulators.
//!
//! Each module registers its grammar and rules with a
//! [`RuleTable`](crate::router::RuleTable). Handlers validate before they
//! mutate and report malformed usage as stderr with a non-zero exit code.

pub mod docker;
pub mod git;
pub mod kubectl;
pub mod pip;
pub mod python;
pub mod shell;

use crate::router::Outcome;
use crate::types::CommandResult;
use crate::vfs::VfsError;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Failed result as an outcome.
pub(crate) fn fail(code: i32, message: impl Into<String>) -> Outcome {
    CommandResult::error(code, message).into()
}

/// `tool: <vfs error>` with exit code 1.
pub(crate) fn fs_error(tool: &str, error: &VfsError) -> Outcome {
    fail(1, format!("{tool}: {error}"))
}

/// First `len` hex digits of the SHA-256 of `seed`.
pub(crate) fn short_hash(seed: &str, len: usize) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex.truncate(len);
    hex
}

/// Split `name:tag`, defaulting the tag to `latest`.
pub(crate) fn image_ref(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

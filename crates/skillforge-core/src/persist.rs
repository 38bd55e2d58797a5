//! Atomic JSON save and load for the serializable shapes.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to replace {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Write `value` as pretty JSON to `path`, creating parent directories.
///
/// The content goes to a temporary file beside `path` that is then renamed
/// over it, so readers never observe a partial file.
///
/// # Errors
/// Returns an error if serialization or any filesystem step fails.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PersistError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Read a value saved by [`save_json`].
///
/// # Errors
/// `NotFound` when `path` does not exist, otherwise IO or JSON errors.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    if !path.exists() {
        return Err(PersistError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

//! Artifact files on disk.
//!
//! Stage outputs are staged next to their final name and renamed into place,
//! so a reader never sees a half-written CSV, array or model.

use crate::error::MlError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Staging name for `path`: the full file name plus `.tmp`, so `model.json`
/// and `model.arr` in one directory never share a staging file.
pub fn staging_path(path: &Path) -> Result<PathBuf, MlError> {
    let name = path
        .file_name()
        .ok_or_else(|| MlError::config(format!("artifact path {} has no file name", path.display())))?;
    let mut staged = name.to_os_string();
    staged.push(".tmp");
    Ok(path.with_file_name(staged))
}

/// Write `bytes` to `path` through its staging file, creating parent directories.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), MlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staged = staging_path(path)?;
    std::fs::write(&staged, bytes)?;
    if let Err(e) = std::fs::rename(&staged, path) {
        let _ = std::fs::remove_file(&staged);
        return Err(e.into());
    }
    tracing::trace!(path = %path.display(), bytes = bytes.len(), "Artifact written");
    Ok(())
}

/// Pretty-printed JSON artifact.
pub fn write_json_artifact<T: Serialize>(path: &Path, value: &T) -> Result<(), MlError> {
    let json = serde_json::to_vec_pretty(value)?;
    write_artifact(path, &json)
}

/// Read a JSON artifact; `Ok(None)` when the file does not exist.
pub fn read_json_artifact<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, MlError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

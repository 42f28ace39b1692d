//! Crash-safe file persistence.
//!
//! Writes go to a temporary file in the destination directory, are fsynced,
//! then renamed over the target. A crash mid-write leaves either the old file
//! or the new one, never a truncated mix.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::persistence(format!("create {}: {e}", dir.display())))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::persistence(format!("temp file in {}: {e}", dir.display())))?;
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::persistence(format!("write {}: {e}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| Error::persistence(format!("rename onto {}: {}", path.display(), e.error)))?;

    debug!(path = %path.display(), bytes = contents.len(), "persisted");
    Ok(())
}

/// Serialize as pretty JSON (trailing newline) and write atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::persistence(format!("serialize {}: {e}", path.display())))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Read a JSON file. A missing file is `Ok(None)`; an unreadable or corrupt
/// file is a `PersistenceFailure`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::persistence(format!("read {}: {e}", path.display()))),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::persistence(format!("parse {}: {e}", path.display())))
}

//! JSON snapshots of engine state, written atomically.
//!
//! A snapshot is written to a `.tmp` sibling and renamed over the target, so
//! a crash mid-write leaves the previous snapshot intact.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::Path;
use tracing::debug;

/// Version of the snapshot envelope.
pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a, T> {
    format: u32,
    saved_at: DateTime<Utc>,
    state: &'a T,
}

#[derive(serde::Deserialize)]
struct SnapshotIn<T> {
    format: u32,
    state: T,
}

/// Atomically write `state` to `path` inside a versioned envelope.
pub fn write_snapshot<T: Serialize>(path: &Path, state: &T) -> Result<(), StoreError> {
    let envelope = SnapshotOut {
        format: SNAPSHOT_FORMAT,
        saved_at: Utc::now(),
        state,
    };
    atomic_write_json(path, &envelope).map_err(|e| StoreError::PersistFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "Wrote state snapshot");
    Ok(())
}

/// Read a snapshot written by [`write_snapshot`].
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let load_failed = |message: String| StoreError::LoadFailed {
        path: path.to_path_buf(),
        message,
    };
    let Some(envelope) = load_json::<SnapshotIn<T>>(path).map_err(|e| load_failed(e.to_string()))?
    else {
        return Ok(None);
    };
    if envelope.format != SNAPSHOT_FORMAT {
        return Err(load_failed(format!(
            "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT})",
            envelope.format
        )));
    }
    Ok(Some(envelope.state))
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write to a `.tmp` sibling, then rename over `path`. Creates parent
/// directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load JSON from `path`, or `Ok(None)` when it does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

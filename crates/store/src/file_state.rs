//! File-backed instance storage under a state directory.
//!
//! Layout for one sync object:
//!
//! ```text
//! <state_dir>/<object>/pack.json               cached pack snapshot
//! <state_dir>/<object>/decompose/<hash>.done   RFC 3339 completion time
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! crash never leaves a half-written snapshot behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctxpack_core::error::StorageError;
use ctxpack_core::store::{PackSnapshot, StateStorage};
use std::path::{Path, PathBuf};
use tracing::debug;

/// State storage for one sync object, rooted at `<state_dir>/<object>`.
pub struct FileStateStorage {
    dir: PathBuf,
}

impl FileStateStorage {
    pub fn new(state_dir: impl AsRef<Path>, object: &str) -> Self {
        Self {
            dir: state_dir.as_ref().join(object),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("pack.json")
    }

    fn marker_path(&self, stamp_hash: &str) -> PathBuf {
        self.dir.join("decompose").join(format!("{stamp_hash}.done"))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Read a file, mapping "not found" to `None`.
async fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Write via a temporary sibling and rename.
async fn write_atomic(path: &Path, content: &str) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))
}

#[async_trait]
impl StateStorage for FileStateStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn load_snapshot(&self) -> Result<Option<PackSnapshot>, StorageError> {
        let path = self.snapshot_path();
        let Some(raw) = read_optional(&path).await? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_str(&raw).map_err(|e| StorageError::Corrupted {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(snapshot))
    }

    async fn save_snapshot(&self, snapshot: &PackSnapshot) -> Result<(), StorageError> {
        let path = self.snapshot_path();
        let raw = serde_json::to_string_pretty(snapshot).map_err(|e| StorageError::Corrupted {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &raw).await?;
        debug!(path = %path.display(), version = %snapshot.version_id, "Saved pack snapshot");
        Ok(())
    }

    async fn marker(&self, stamp_hash: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let path = self.marker_path(stamp_hash);
        let Some(raw) = read_optional(&path).await? else {
            return Ok(None);
        };
        let at = DateTime::parse_from_rfc3339(raw.trim()).map_err(|e| StorageError::Corrupted {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(at.with_timezone(&Utc)))
    }

    async fn write_marker(&self, stamp_hash: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let path = self.marker_path(stamp_hash);
        write_atomic(&path, &format!("{}\n", at.to_rfc3339())).await?;
        debug!(path = %path.display(), "Wrote decompose marker");
        Ok(())
    }
}

//! Store traits — the remote version-controlled store and durable
//! per-instance storage.
//!
//! The remote store is non-transactional except for one primitive: a
//! multi-file commit whose final reference update fails when the branch has
//! advanced since it was observed. That failure is reported as
//! [`StoreError::RefConflict`] so the coordinator can tell it apart from
//! everything else.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StoreError};

/// Content of one file as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Blob hash of the content in the store
    pub sha: String,
}

/// One file of an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

/// The remote store trait.
///
/// Implementations: GitHub Git Data API, in-memory (for testing and dry runs).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// The backend name (e.g., "github", "in_memory").
    fn name(&self) -> &str;

    /// The branch all reads and commits target.
    fn branch(&self) -> &str;

    /// Current commit id of the branch. Cheap; used as a freshness probe.
    async fn head(&self) -> Result<String, StoreError>;

    /// Read one file at the branch head. `Ok(None)` when it does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<FileContent>, StoreError>;

    /// Write every file in one commit layered on the current tree.
    ///
    /// Returns the new commit id. Fails with [`StoreError::RefConflict`]
    /// when the branch moved between observing its head and updating it.
    async fn commit_files(&self, files: &[FileWrite], message: &str) -> Result<String, StoreError>;
}

/// Cached copy of the pack and the commit it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSnapshot {
    pub content: String,
    pub version_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Durable per-instance storage: the pack snapshot and decompose markers.
///
/// Implementations: file-backed (state directory), in-memory.
#[async_trait]
pub trait StateStorage: Send + Sync {
    fn name(&self) -> &str;

    async fn load_snapshot(&self) -> Result<Option<PackSnapshot>, StorageError>;

    async fn save_snapshot(&self, snapshot: &PackSnapshot) -> Result<(), StorageError>;

    /// When the decompose for `stamp_hash` completed, if it did.
    async fn marker(&self, stamp_hash: &str) -> Result<Option<DateTime<Utc>>, StorageError>;

    async fn write_marker(&self, stamp_hash: &str, at: DateTime<Utc>) -> Result<(), StorageError>;
}

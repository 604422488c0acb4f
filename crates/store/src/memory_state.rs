//! In-memory instance storage — for tests and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctxpack_core::error::StorageError;
use ctxpack_core::store::{PackSnapshot, StateStorage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Snapshot and markers kept in process memory.
#[derive(Default)]
pub struct InMemoryStateStorage {
    snapshot: Arc<RwLock<Option<PackSnapshot>>>,
    markers: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStorage for InMemoryStateStorage {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load_snapshot(&self) -> Result<Option<PackSnapshot>, StorageError> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save_snapshot(&self, snapshot: &PackSnapshot) -> Result<(), StorageError> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn marker(&self, stamp_hash: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.markers.read().await.get(stamp_hash).copied())
    }

    async fn write_marker(&self, stamp_hash: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.markers.write().await.insert(stamp_hash.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_and_markers() {
        let storage = InMemoryStateStorage::new();
        assert!(storage.load_snapshot().await.unwrap().is_none());

        let snapshot = PackSnapshot {
            content: "# P\n".into(),
            version_id: "c1".into(),
            updated_at: Utc::now(),
        };
        storage.save_snapshot(&snapshot).await.unwrap();
        assert_eq!(storage.load_snapshot().await.unwrap(), Some(snapshot));

        let at = Utc::now();
        storage.write_marker("h1", at).await.unwrap();
        assert_eq!(storage.marker("h1").await.unwrap(), Some(at));
        assert!(storage.marker("h2").await.unwrap().is_none());
    }
}

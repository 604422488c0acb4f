//! Pack cache — the last known pack and the commit it was read at.
//!
//! The cache is owned by one sync object and is only trusted while the
//! store head still equals its version id. Durable storage is a warm-start
//! optimization: failures there are logged, never surfaced.

use chrono::Utc;
use ctxpack_core::error::Result;
use ctxpack_core::store::{PackSnapshot, RemoteStore, StateStorage};
use tracing::{debug, warn};

pub struct PackCache {
    pack_path: String,
    current: Option<PackSnapshot>,
    warmed: bool,
}

impl PackCache {
    pub fn new(pack_path: impl Into<String>) -> Self {
        Self {
            pack_path: pack_path.into(),
            current: None,
            warmed: false,
        }
    }

    pub fn current(&self) -> Option<&PackSnapshot> {
        self.current.as_ref()
    }

    pub fn version_id(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.version_id.as_str())
    }

    /// Load the durable snapshot once, on first use.
    async fn warm(&mut self, state: &dyn StateStorage) {
        if self.warmed {
            return;
        }
        self.warmed = true;
        match state.load_snapshot().await {
            Ok(snapshot) => self.current = snapshot,
            Err(e) => {
                warn!(storage = state.name(), error = %e, "Ignoring unreadable pack snapshot")
            }
        }
    }

    /// The pack as of `head`, re-reading the store when the head moved.
    ///
    /// `Ok(None)` means the pack does not exist at `head`.
    pub async fn ensure_fresh(
        &mut self,
        store: &dyn RemoteStore,
        state: &dyn StateStorage,
        head: &str,
    ) -> Result<Option<String>> {
        self.warm(state).await;

        if let Some(snapshot) = &self.current
            && snapshot.version_id == head
        {
            debug!(version = head, "Pack cache hit");
            return Ok(Some(snapshot.content.clone()));
        }

        debug!(
            cached = self.version_id().unwrap_or("<none>"),
            head, "Pack cache stale, reading store"
        );
        match store.read_file(&self.pack_path).await? {
            Some(file) => {
                self.store_snapshot(state, file.content.clone(), head).await;
                Ok(Some(file.content))
            }
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    /// Replace the cache after a confirmed commit.
    pub async fn update(&mut self, state: &dyn StateStorage, content: String, version_id: &str) {
        self.warmed = true;
        self.store_snapshot(state, content, version_id).await;
    }

    async fn store_snapshot(
        &mut self,
        state: &dyn StateStorage,
        content: String,
        version_id: &str,
    ) {
        let snapshot = PackSnapshot {
            content,
            version_id: version_id.to_string(),
            updated_at: Utc::now(),
        };
        if let Err(e) = state.save_snapshot(&snapshot).await {
            warn!(storage = state.name(), error = %e, "Failed to persist pack snapshot");
        }
        self.current = Some(snapshot);
    }
}

//! In-memory remote store — useful for testing and dry runs.
//!
//! Commits are recorded in a log and the head advances through `c1`, `c2`,
//! ... so tests can assert exactly what was written. Reference conflicts can
//! be injected to exercise the coordinator's retry path.

use async_trait::async_trait;
use ctxpack_core::error::StoreError;
use ctxpack_core::store::{FileContent, FileWrite, RemoteStore};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One recorded commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: String,
    pub message: String,
    pub files: Vec<FileWrite>,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, String>,
    commits: Vec<CommitRecord>,
    pending_conflicts: u32,
    conflicts_raised: u32,
}

impl State {
    fn head(&self) -> String {
        self.commits
            .last()
            .map(|c| c.id.clone())
            .unwrap_or_else(|| "c0".to_string())
    }
}

/// A branch held in memory.
pub struct InMemoryStore {
    branch: String,
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            branch: "main".into(),
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Seed the branch with files (the initial `c0` tree).
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let state = State {
            files: files
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
            ..State::default()
        };
        Self {
            branch: "main".into(),
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Make the next `count` commit submissions fail with a reference conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.write().await.pending_conflicts = count;
    }

    /// How many injected conflicts have been raised so far.
    pub async fn conflicts_raised(&self) -> u32 {
        self.state.read().await.conflicts_raised
    }

    /// Current content of a file, bypassing the trait.
    pub async fn file(&self, path: &str) -> Option<String> {
        self.state.read().await.files.get(path).cloned()
    }

    /// Every successful commit, oldest first.
    pub async fn commits(&self) -> Vec<CommitRecord> {
        self.state.read().await.commits.clone()
    }

    /// Simulate another writer advancing the branch.
    pub async fn external_commit(&self, path: &str, content: &str) -> String {
        let mut state = self.state.write().await;
        record_commit(
            &mut state,
            vec![FileWrite {
                path: path.into(),
                content: content.into(),
            }],
            "external edit",
        )
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn record_commit(state: &mut State, files: Vec<FileWrite>, message: &str) -> String {
    let id = format!("c{}", state.commits.len() + 1);
    for file in &files {
        state.files.insert(file.path.clone(), file.content.clone());
    }
    state.commits.push(CommitRecord {
        id: id.clone(),
        message: message.to_string(),
        files,
    });
    id
}

/// Stable content hash standing in for a blob id.
pub fn content_sha(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn head(&self) -> Result<String, StoreError> {
        Ok(self.state.read().await.head())
    }

    async fn read_file(&self, path: &str) -> Result<Option<FileContent>, StoreError> {
        let state = self.state.read().await;
        Ok(state.files.get(path).map(|content| FileContent {
            path: path.to_string(),
            content: content.clone(),
            sha: content_sha(content),
        }))
    }

    async fn commit_files(&self, files: &[FileWrite], message: &str) -> Result<String, StoreError> {
        let mut state = self.state.write().await;
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            state.conflicts_raised += 1;
            return Err(StoreError::RefConflict {
                branch: self.branch.clone(),
                message: "Update is not a fast forward".into(),
            });
        }
        if files.is_empty() {
            return Ok(state.head());
        }
        Ok(record_commit(&mut state, files.to_vec(), message))
    }
}

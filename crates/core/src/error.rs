//! Error types for the ctxpack domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (patching, remote store, instance storage) has its
//! own enum; [`Error`] is what a commit, rebuild or decompose returns.

use thiserror::Error;

use crate::intent::RejectedIntent;

/// The top-level error type for all ctxpack operations.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more intents in the batch failed validation. Nothing was written.
    #[error("Invalid batch: {} of {total} intents rejected ({})", .rejected.len(), summarize(.rejected))]
    InvalidBatch {
        total: usize,
        rejected: Vec<RejectedIntent>,
    },

    /// A patch could not be applied while resolving `path`. Nothing was written.
    #[error("Patch failed for {path}: {source}")]
    Patch {
        path: String,
        #[source]
        source: PatchError,
    },

    // --- Remote store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Durable instance storage errors ---
    #[error("State storage error: {0}")]
    Storage(#[from] StorageError),

    /// The pack is not in a state that allows the requested operation.
    #[error("Context pack error: {0}")]
    Pack(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

fn summarize(rejected: &[RejectedIntent]) -> String {
    rejected
        .iter()
        .map(|r| format!("#{} {}: {}", r.index, r.intent.path, r.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Whether this error was caused by the caller's input rather than the store.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidBatch { .. } | Self::Patch { .. })
    }
}

// --- Bounded context errors ---

/// Failures of the section patch engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("Section not found: {heading}")]
    SectionNotFound { heading: String },

    #[error("Item not found: {item}")]
    ItemNotFound { item: String },
}

/// Failures talking to the remote, version-controlled store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The branch reference advanced since it was observed. Safe to retry.
    #[error("Reference conflict on {branch}: {message}")]
    RefConflict { branch: String, message: String },

    #[error("Store API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode store payload: {0}")]
    Decode(String),

    #[error("Store not configured: {0}")]
    NotConfigured(String),
}

impl StoreError {
    /// Only reference conflicts are retried by the commit coordinator.
    pub fn is_ref_conflict(&self) -> bool {
        matches!(self, Self::RefConflict { .. })
    }
}

/// Failures of the durable per-instance storage (pack snapshot, markers).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupted state at {path}: {reason}")]
    Corrupted { path: String, reason: String },
}

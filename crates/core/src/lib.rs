//! # ctxpack Core
//!
//! Domain types, traits, and error definitions for the ctxpack document
//! synchronization engine. This crate has **no I/O of its own** — it defines
//! the model that the patch engine, the store adapters and the sync layer
//! implement against.
//!
//! ## Layout
//!
//! - [`intent`] — write intents and batch validation
//! - [`path`] — document-root path rules
//! - [`pack`] — context pack markers, version stamps and layout
//! - [`store`] — remote store and durable instance storage traits
//! - [`error`] — error taxonomy shared by every crate

pub mod error;
pub mod intent;
pub mod pack;
pub mod path;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, PatchError, Result, StorageError, StoreError};
pub use intent::{
    BatchValidation, Edit, PatchKind, PatchOp, RejectedIntent, ValidatedIntent, WriteIntent,
    validate_batch,
};
pub use pack::{
    CombinedPart, Direction, PackLayout, Provenance, SectionSource, SectionSpec, VersionStamp,
};
pub use path::PathRules;
pub use store::{FileContent, FileWrite, PackSnapshot, RemoteStore, StateStorage};

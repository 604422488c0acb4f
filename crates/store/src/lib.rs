//! Remote store adapters and durable instance storage for ctxpack.

pub mod file_state;
pub mod github;
pub mod in_memory;
pub mod memory_state;

pub use file_state::FileStateStorage;
pub use github::GitHubStore;
pub use in_memory::{CommitRecord, InMemoryStore, content_sha};
pub use memory_state::InMemoryStateStorage;

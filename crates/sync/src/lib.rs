//! Commit coordination and bidirectional context pack sync.
//!
//! - [`coordinator`] turns a batch of write intents into one atomic commit
//! - [`aggregate`] builds the context pack from its canonical sources
//! - [`decompose`] writes edited pack sections back to their files
//! - [`prune`] fits a copy of the pack into a size budget
//! - [`session`] ties them together for one sync object

pub mod aggregate;
pub mod cache;
pub mod coordinator;
pub mod decompose;
pub mod prune;
pub mod session;

pub use cache::PackCache;
pub use coordinator::{CommitCoordinator, CommitReceipt, Resolution, Submitted};
pub use decompose::{DecomposeOutcome, DecomposeStatus, SkipReason, SkippedSection};
pub use prune::{PruneReport, PruneStep, Pruner};
pub use session::{PackSession, PackStatus, RebuildReport};

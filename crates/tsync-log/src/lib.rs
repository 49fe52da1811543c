//! Commit/branch log for the task synchronization core.
//!
//! Every submission and consolidation is recorded as an immutable
//! [`Commit`] holding a snapshot of the task set. Commits form a DAG per
//! project ([`CommitGraph`]); each [`Branch`] points at its head commit.
//!
//! Backends implement [`CommitLog`]; [`InMemoryCommitLog`] keeps everything
//! in process memory.

pub mod commit;
pub mod error;
pub mod graph;
pub mod log;
pub mod memory;

pub use commit::{snapshot_hash, Branch, Commit, CommitKind, NewCommit, CANONICAL_PLATFORM};
pub use error::{LogError, LogResult};
pub use graph::CommitGraph;
pub use log::CommitLog;
pub use memory::InMemoryCommitLog;

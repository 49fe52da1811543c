//! High-level SDK for the task synchronization core.
//!
//! [`SyncCore`] is the single entry point for embedding applications. It
//! wires the session registry, the project consolidator, the topic
//! classifier and the commit log behind one API, and folds every lower-level
//! error into the [`SyncError`] taxonomy.

pub mod config;
pub mod error;
pub mod sync_core;

pub use config::{ConfigError, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use sync_core::{CanonicalState, SubmitOutcome, SyncCore, TaskDraft, TaskSubmission};

// Re-export key types
pub use tsync_consolidate::{ConsolidationResult, ResolutionOutcome, RollbackOutcome};
pub use tsync_log::{Commit, CommitKind};
pub use tsync_merge::{Conflict, ConflictKind, ConflictState, KeepBothPolicy, MergeStrategy, Side};
pub use tsync_mint::{IdMinter, InMemoryMinter, MintRequest};
pub use tsync_session::{RegisterSession, Registration};
pub use tsync_topics::TopicMatch;
pub use tsync_types::{
    CommitId, ConflictId, Contributor, ProjectId, Session, SessionId, Task, TaskId, TaskStatus,
    Timestamp, TopicId,
};

//! Error types for the commit log.

use tsync_types::{BranchId, CommitId, TypeError};

/// Errors that can occur while recording or reading commits.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A referenced branch does not exist.
    #[error("branch not found: {0}")]
    BranchNotFound(BranchId),

    /// A referenced commit does not exist.
    #[error("commit not found: {0}")]
    CommitNotFound(CommitId),

    /// A branch with this id already exists.
    #[error("duplicate branch: {0}")]
    DuplicateBranch(BranchId),

    /// A commit with this id already exists.
    #[error("duplicate commit: {0}")]
    DuplicateCommit(CommitId),

    /// The commit's first parent is not the branch's current head.
    #[error("stale head on branch {branch}: expected {expected:?}, got {found:?}")]
    StaleHead {
        branch: BranchId,
        expected: Option<CommitId>,
        found: Option<CommitId>,
    },

    /// A commit references a parent that is not in the project's graph.
    #[error("commit {commit} references missing parent {parent}")]
    DanglingParent { commit: CommitId, parent: CommitId },

    /// The stored snapshot no longer matches its recorded hash.
    #[error("snapshot hash mismatch for commit {0}")]
    HashMismatch(CommitId),

    /// A branch or commit field failed validation.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend failure (including lock poisoning).
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenience alias for log results.
pub type LogResult<T> = Result<T, LogError>;

use tsync_log::LogError;
use tsync_merge::MergeError;
use tsync_mint::MintError;
use tsync_session::SessionError;
use tsync_store::StoreError;
use tsync_types::{CommitId, ConflictId, ProjectId, TypeError};

/// Errors from consolidation, resolution and rollback.
#[derive(Debug, thiserror::Error)]
pub enum ConsolidateError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    #[error("commit not found: {0}")]
    CommitNotFound(CommitId),

    /// The commit exists but belongs to another project.
    #[error("commit {commit} is not part of project {project}")]
    ForeignCommit { commit: CommitId, project: ProjectId },

    /// Every CAS attempt lost to a concurrent writer.
    #[error("canonical state of {project} is contended; gave up after {attempts} attempts")]
    Concurrency { project: ProjectId, attempts: u32 },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Mint(#[from] MintError),
}

/// Result alias for consolidation operations.
pub type ConsolidateResult<T> = Result<T, ConsolidateError>;

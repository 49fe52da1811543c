use thiserror::Error;
use tsync_consolidate::ConsolidateError;
use tsync_log::LogError;
use tsync_merge::MergeError;
use tsync_mint::MintError;
use tsync_session::SessionError;
use tsync_store::StoreError;
use tsync_types::{ProjectId, TaskId, TypeError};

use crate::config::ConfigError;

/// Error taxonomy surfaced to callers of [`SyncCore`](crate::SyncCore).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request is malformed or not allowed in the current state.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("canonical state of {project} is contended after {attempts} attempts")]
    Concurrency { project: ProjectId, attempts: u32 },

    /// A clean state was requested while conflicts await a decision.
    #[error("{count} unresolved conflict(s), first on task {first}")]
    UnresolvedConflict { count: usize, first: TaskId },

    /// The identifier service failed.
    #[error("external dependency failed: {0}")]
    ExternalDependency(#[from] MintError),

    /// A storage backend failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency { .. } | Self::ExternalDependency(_))
    }

    fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

impl From<TypeError> for SyncError {
    fn from(e: TypeError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<ConfigError> for SyncError {
    fn from(e: ConfigError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<MergeError> for SyncError {
    fn from(e: MergeError) -> Self {
        match e {
            MergeError::UnresolvedConflicts { count, first } => {
                Self::UnresolvedConflict { count, first }
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::AlreadyExists { .. } => Self::Validation(e.to_string()),
            StoreError::Backend(msg) => Self::Storage(msg),
        }
    }
}

impl From<LogError> for SyncError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::BranchNotFound(id) => Self::not_found("branch", id),
            LogError::CommitNotFound(id) => Self::not_found("commit", id),
            LogError::DuplicateBranch(_)
            | LogError::DuplicateCommit(_)
            | LogError::DanglingParent { .. } => Self::Validation(e.to_string()),
            LogError::Type(e) => e.into(),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<SessionError> for SyncError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => Self::not_found("session", id),
            SessionError::ProjectNotFound(id) => Self::not_found("project", id),
            SessionError::NotActive { .. }
            | SessionError::Expired(_)
            | SessionError::ProjectMismatch { .. } => Self::Validation(e.to_string()),
            SessionError::Type(e) => e.into(),
            SessionError::Store(e) => e.into(),
            SessionError::Log(e) => e.into(),
            SessionError::Mint(e) => e.into(),
        }
    }
}

impl From<ConsolidateError> for SyncError {
    fn from(e: ConsolidateError) -> Self {
        match e {
            ConsolidateError::ProjectNotFound(id) => Self::not_found("project", id),
            ConsolidateError::ConflictNotFound(id) => Self::not_found("conflict", id),
            ConsolidateError::CommitNotFound(id) => Self::not_found("commit", id),
            ConsolidateError::ForeignCommit { .. } => Self::Validation(e.to_string()),
            ConsolidateError::Concurrency { project, attempts } => {
                Self::Concurrency { project, attempts }
            }
            ConsolidateError::Type(e) => e.into(),
            ConsolidateError::Merge(e) => e.into(),
            ConsolidateError::Session(e) => e.into(),
            ConsolidateError::Store(e) => e.into(),
            ConsolidateError::Log(e) => e.into(),
            ConsolidateError::Mint(e) => e.into(),
        }
    }
}

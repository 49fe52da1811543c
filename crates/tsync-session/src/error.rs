use tsync_log::LogError;
use tsync_mint::MintError;
use tsync_store::StoreError;
use tsync_types::{ProjectId, SessionId, SessionStatus, TypeError};

/// Errors from session registry operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// The session exists but can no longer be used.
    #[error("session {id} is {status}")]
    NotActive { id: SessionId, status: SessionStatus },

    /// The session's heartbeat lapsed; it has now been marked inactive.
    #[error("session {0} expired")]
    Expired(SessionId),

    /// A session tried to move to a different project.
    #[error("session {session} belongs to project {expected}, not {found}")]
    ProjectMismatch {
        session: SessionId,
        expected: ProjectId,
        found: ProjectId,
    },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Mint(#[from] MintError),
}

/// Result alias for session registry operations.
pub type SessionResult<T> = Result<T, SessionError>;

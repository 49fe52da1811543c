use thiserror::Error;

/// Errors produced by type construction and entity state transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },

    #[error("task content must not be empty")]
    EmptyContent,

    #[error("unknown task status: {0}")]
    InvalidStatus(String),

    #[error("invalid project path: {0:?}")]
    InvalidProjectPath(String),

    #[error("illegal {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
}

use crate::minter::EntityKind;

/// Errors from the identifier-minting service.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MintError {
    /// The service could not be reached or timed out.
    #[error("minting service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request.
    #[error("minting of {kind} rejected: {reason}")]
    Rejected { kind: EntityKind, reason: String },

    /// The service returned something that is not a valid identifier.
    #[error("minted {kind} id {value:?} is invalid: {reason}")]
    InvalidId {
        kind: EntityKind,
        value: String,
        reason: String,
    },
}

/// Result alias for minting operations.
pub type MintResult<T> = Result<T, MintError>;

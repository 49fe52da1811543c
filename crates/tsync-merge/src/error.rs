use thiserror::Error;
use tsync_types::TaskId;

/// Errors produced by merge strategy parsing and conflict handling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    /// A strategy name from a request did not match any known strategy.
    #[error("unknown merge strategy: {0:?}")]
    UnknownStrategy(String),

    /// A clean merged value was requested while manual conflicts are pending.
    #[error("{count} unresolved conflict(s), first on task {first}")]
    UnresolvedConflicts { count: usize, first: TaskId },

    /// The strategy cannot settle a conflict on its own (e.g. `manual`).
    #[error("strategy {0} cannot resolve a conflict")]
    NonResolvingStrategy(String),

    /// The conflict state machine does not allow this transition.
    #[error("illegal conflict transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Neither side of the conflict carries a value to choose.
    #[error("conflict on task {0} has no candidate values")]
    NoCandidates(TaskId),
}

/// Convenience alias for merge results.
pub type MergeResult<T> = Result<T, MergeError>;

//! Project consolidation for the task synchronization core.
//!
//! [`ProjectConsolidator`] gathers the task sets of a project's live
//! sessions, folds them through the merge engine against the canonical
//! state, and writes the result back with an optimistic compare-and-swap on
//! the project version. The same write path serves conflict resolution and
//! rollback.

pub mod consolidator;
pub mod error;
pub mod resolve;
pub mod rollback;

#[cfg(test)]
mod testkit;

pub use consolidator::{ConsolidationResult, ConsolidatorSettings, ProjectConsolidator};
pub use error::{ConsolidateError, ConsolidateResult};
pub use resolve::ResolutionOutcome;
pub use rollback::RollbackOutcome;

//! Merge engine for the task synchronization core.
//!
//! Implements three-way merge of task sets with vector-clock causality,
//! conflict detection, and configurable automatic resolution strategies.
//! The engine is a pure function of its inputs: it never mints identifiers,
//! reads the clock, or touches storage.
//!
//! # Modules
//!
//! - [`strategy`]: [`MergeStrategy`], [`KeepBothPolicy`], [`Side`]
//! - [`conflict`]: the persisted [`Conflict`] record and its state machine
//! - [`engine`]: [`MergeEngine`] and [`three_way_merge`]
//! - [`error`]: [`MergeError`]

pub mod conflict;
pub mod engine;
pub mod error;
pub mod strategy;

pub use conflict::{
    AutoResolution, Conflict, ConflictKind, ConflictState, DetectedConflict, Dispute, Resolution,
};
pub use engine::{changed_since, three_way_merge, MergeEngine, MergeOutcome, TaskMerge};
pub use error::{MergeError, MergeResult};
pub use strategy::{KeepBothPolicy, MergeStrategy, Side};

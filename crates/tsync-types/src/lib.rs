//! Foundation types for the task synchronization core.
//!
//! Every other `tsync-*` crate depends on this one. It defines the entities
//! that flow between sessions, the consolidator, and the commit log.
//!
//! # Key Types
//!
//! - [`Task`]: the synchronized unit, with its [`TaskStatus`] and vector clock
//! - [`Session`]: a contributor's short-lived editing scope
//! - [`Project`]: canonical task state plus its version counter
//! - [`TaskId`], [`SessionId`], [`ProjectId`], [`BranchId`], [`CommitId`],
//!   [`ConflictId`]: opaque identifiers minted by an external service
//! - [`Contributor`], [`TopicId`]: validated tags
//! - [`Timestamp`], [`TimeSource`]: wall-clock milliseconds

pub mod error;
pub mod ids;
pub mod project;
pub mod session;
pub mod task;
pub mod temporal;

pub use error::TypeError;
pub use ids::{BranchId, CommitId, ConflictId, Contributor, ProjectId, SessionId, TaskId, TopicId};
pub use project::Project;
pub use session::{Session, SessionStatus};
pub use task::{FieldChanges, Task, TaskStatus};
pub use temporal::{ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};
pub use tsync_clock::{ClockOrdering, VectorClock};

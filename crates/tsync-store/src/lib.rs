//! Storage contract for the task synchronization core.
//!
//! The core assumes a row-oriented store with read, write and
//! compare-and-swap. [`SyncStore`] is that contract; the canonical task state
//! of a project is only ever replaced through
//! [`SyncStore::cas_canonical`], guarded by the project's version counter.
//!
//! [`InMemorySyncStore`] is a complete in-process implementation.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemorySyncStore;
pub use traits::{CasOutcome, SyncStore};

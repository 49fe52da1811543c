//! Identifier minting for the task synchronization core.
//!
//! The core never fabricates identifiers. Every new task, session, project,
//! branch, commit and conflict gets its id from an external service reached
//! through [`IdMinter`]. [`Minter`] wraps a minter and returns validated,
//! typed ids; [`InMemoryMinter`] stands in for the service in tests and
//! single-process deployments.

pub mod error;
pub mod memory;
pub mod minter;

pub use error::{MintError, MintResult};
pub use memory::InMemoryMinter;
pub use minter::{EntityKind, IdMinter, MintRequest, Minter};

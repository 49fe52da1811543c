//! Session registry for the task synchronization core.
//!
//! Tracks which contributors are working against which project, creating
//! projects lazily on first registration and flipping sessions to
//! `inactive` once their heartbeat lapses.

pub mod error;
pub mod registry;

pub use error::{SessionError, SessionResult};
pub use registry::{Registration, RegisterSession, SessionRegistry, SessionSettings};

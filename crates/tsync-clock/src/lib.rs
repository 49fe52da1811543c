//! Vector clocks for the task synchronization core.
//!
//! Every task carries one logical counter per contributor that has edited it.
//! Comparing two clocks tells whether one edit causally happened before the
//! other, or whether they were made concurrently without knowledge of each
//! other. Everything here is pure: no I/O, no shared state.
//!
//! # Key Types
//!
//! - [`VectorClock`]: contributor to counter map with increment/compare/merge
//! - [`ClockOrdering`]: result of comparing two clocks

pub mod vector;

pub use vector::{ClockOrdering, VectorClock};

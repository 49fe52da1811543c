//! Keyword-based topic detection for tasks.
//!
//! A [`TopicTable`] maps topic ids to keywords. [`TopicClassifier::detect`]
//! scores task text against it, and [`TopicClassifier::assign`] grows a
//! task's topic set with the results. Assignment never removes topics.

pub mod classifier;
pub mod error;
pub mod table;

pub use classifier::{TopicClassifier, TopicMatch};
pub use error::{TopicError, TopicResult};
pub use table::TopicTable;

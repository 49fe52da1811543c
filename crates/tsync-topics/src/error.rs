use std::path::PathBuf;

use tsync_types::TypeError;

/// Errors from loading or validating a topic table.
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("failed to read topic table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid topic table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid topic id {id:?}: {source}")]
    InvalidTopic {
        id: String,
        #[source]
        source: TypeError,
    },

    #[error("topic {0} has no keywords")]
    NoKeywords(String),
}

/// Result alias for topic operations.
pub type TopicResult<T> = Result<T, TopicError>;

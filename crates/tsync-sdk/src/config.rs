use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tsync_consolidate::ConsolidatorSettings;
use tsync_merge::{KeepBothPolicy, MergeStrategy};
use tsync_session::SessionSettings;
use tsync_topics::{TopicError, TopicTable};

/// Errors from loading a [`SyncConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Topics(#[from] TopicError),
}

/// Runtime configuration of a [`SyncCore`](crate::SyncCore).
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration:
///
/// ```toml
/// heartbeat_timeout_ms = 300000
/// default_strategy = "status_priority"
/// keep_both = "hold_as_conflict"
///
/// [topics]
/// infra = ["terraform", "k8s"]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sessions silent for longer than this are stale.
    pub heartbeat_timeout_ms: u64,
    /// Inactive sessions are archived after this long.
    pub archive_grace_ms: u64,
    /// CAS retries after the first attempt.
    pub max_cas_retries: u32,
    /// Linear backoff unit between CAS attempts.
    pub retry_backoff_ms: u64,
    /// Strategy used when a caller does not name one.
    pub default_strategy: MergeStrategy,
    pub keep_both: KeepBothPolicy,
    /// Classify submitted tasks before recording them.
    pub auto_classify: bool,
    /// Topic table file replacing the built-in table.
    pub topics_path: Option<PathBuf>,
    /// Inline topic table; wins over `topics_path`.
    pub topics: Option<BTreeMap<String, Vec<String>>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 5 * 60 * 1000,
            archive_grace_ms: 24 * 60 * 60 * 1000,
            max_cas_retries: 5,
            retry_backoff_ms: 50,
            default_strategy: MergeStrategy::Timestamp,
            keep_both: KeepBothPolicy::MintDuplicate,
            auto_classify: true,
            topics_path: None,
            topics: None,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeat_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            archive_grace: Duration::from_millis(self.archive_grace_ms),
        }
    }

    pub fn consolidator_settings(&self) -> ConsolidatorSettings {
        ConsolidatorSettings {
            max_retries: self.max_cas_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            keep_both: self.keep_both,
        }
    }

    /// The topic table this configuration selects.
    pub fn topic_table(&self) -> Result<TopicTable, ConfigError> {
        if let Some(inline) = &self.topics {
            return Ok(TopicTable::from_pairs(inline.clone())?);
        }
        match &self.topics_path {
            Some(path) => Ok(TopicTable::load(path)?),
            None => Ok(TopicTable::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tsync_types::TopicId;

    #[test]
    fn empty_document_is_default() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.session_settings(), SessionSettings::default());
        assert_eq!(config.consolidator_settings().max_retries, 5);
    }

    #[test]
    fn parses_overrides() {
        let config = SyncConfig::from_toml_str(
            r#"
            heartbeat_timeout_ms = 1000
            max_cas_retries = 2
            default_strategy = "status_priority"
            keep_both = "hold_as_conflict"
            auto_classify = false

            [topics]
            infra = ["Terraform"]
            "#,
        )
        .unwrap();
        assert_eq!(config.session_settings().heartbeat_timeout, Duration::from_secs(1));
        assert_eq!(config.default_strategy, MergeStrategy::StatusPriority);
        assert_eq!(config.keep_both, KeepBothPolicy::HoldAsConflict);
        assert!(!config.auto_classify);

        let table = config.topic_table().unwrap();
        assert_eq!(table.len(), 1);
        let infra = table.keywords(&TopicId::new("infra").unwrap()).unwrap();
        assert!(infra.contains("terraform"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            SyncConfig::from_toml_str("default_strategy = \"newest\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("heartbeat_timeout_ms = 0"),
            Err(ConfigError::Invalid { field: "heartbeat_timeout_ms", .. })
        ));
    }

    #[test]
    fn loads_config_and_topic_table_from_disk() {
        let mut topics = tempfile::NamedTempFile::new().unwrap();
        writeln!(topics, "[topics]\nops = [\"oncall\"]").unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retry_backoff_ms = 5\ntopics_path = {:?}", topics.path()).unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.consolidator_settings().retry_backoff, Duration::from_millis(5));
        assert_eq!(config.topic_table().unwrap().len(), 1);

        assert!(matches!(
            SyncConfig::load("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}

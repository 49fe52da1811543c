use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tsync_types::TopicId;

use crate::error::{TopicError, TopicResult};

/// Built-in keyword table.
const DEFAULT_TOPICS: &[(&str, &[&str])] = &[
    (
        "testing",
        &[
            "test", "tests", "testing", "unittest", "coverage", "assert", "fixture", "mock", "e2e",
        ],
    ),
    (
        "documentation",
        &[
            "doc",
            "docs",
            "documentation",
            "readme",
            "guide",
            "changelog",
            "comment",
            "comments",
        ],
    ),
    ("bugfix", &["bug", "fix", "fixes", "crash", "error", "regression", "broken", "issue"]),
    ("feature", &["add", "implement", "feature", "support", "new", "introduce"]),
    ("refactor", &["refactor", "cleanup", "rename", "simplify", "extract", "restructure"]),
    ("performance", &["performance", "perf", "slow", "optimize", "latency", "cache", "speed"]),
    (
        "security",
        &["security", "auth", "token", "permission", "vulnerability", "secret", "encrypt"],
    ),
    ("database", &["database", "db", "sql", "migration", "schema", "query", "index"]),
    ("api", &["api", "endpoint", "route", "request", "response", "http", "rest", "graphql"]),
    ("ui", &["ui", "ux", "css", "layout", "button", "page", "component", "style"]),
    ("deployment", &["deploy", "deployment", "release", "ci", "pipeline", "docker", "build"]),
];

/// On-disk shape: `[topics]` mapping topic ids to keyword arrays.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawTable {
    #[serde(default)]
    topics: BTreeMap<String, Vec<String>>,
}

/// Mapping from topic ids to the keywords that signal them.
///
/// Keywords are stored lowercase and matched against whole tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicTable {
    topics: BTreeMap<TopicId, BTreeSet<String>>,
    index: HashMap<String, Vec<TopicId>>,
}

impl TopicTable {
    /// Build a table from `(topic, keywords)` pairs.
    pub fn from_pairs<I, K, W>(pairs: I) -> TopicResult<Self>
    where
        I: IntoIterator<Item = (K, W)>,
        K: Into<String>,
        W: IntoIterator,
        W::Item: AsRef<str>,
    {
        let mut topics = BTreeMap::new();
        for (topic, keywords) in pairs {
            let topic = topic.into();
            let keywords: BTreeSet<String> = keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                return Err(TopicError::NoKeywords(topic));
            }
            let id = TopicId::new(topic.clone())
                .map_err(|source| TopicError::InvalidTopic { id: topic, source })?;
            topics
                .entry(id)
                .or_insert_with(BTreeSet::new)
                .extend(keywords);
        }
        Ok(Self::indexed(topics))
    }

    fn indexed(topics: BTreeMap<TopicId, BTreeSet<String>>) -> Self {
        let mut index: HashMap<String, Vec<TopicId>> = HashMap::new();
        for (topic, keywords) in &topics {
            for keyword in keywords {
                index.entry(keyword.clone()).or_default().push(topic.clone());
            }
        }
        Self { topics, index }
    }

    /// Parse a TOML table:
    ///
    /// ```toml
    /// [topics]
    /// testing = ["test", "coverage"]
    /// ```
    pub fn from_toml_str(s: &str) -> TopicResult<Self> {
        let raw: RawTable = toml::from_str(s)?;
        Self::from_pairs(raw.topics)
    }

    /// Load a TOML table from disk.
    pub fn load(path: impl AsRef<Path>) -> TopicResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopicError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = &TopicId> {
        self.topics.keys()
    }

    pub fn keywords(&self, topic: &TopicId) -> Option<&BTreeSet<String>> {
        self.topics.get(topic)
    }

    /// Topics signalled by a single lowercase token.
    pub(crate) fn lookup(&self, token: &str) -> &[TopicId] {
        self.index.get(token).map(Vec::as_slice).unwrap_or_default()
    }
}

impl Default for TopicTable {
    fn default() -> Self {
        let topics = DEFAULT_TOPICS
            .iter()
            .filter_map(|(topic, keywords)| {
                let id = TopicId::new(*topic).ok()?;
                let words: BTreeSet<String> = keywords.iter().map(|k| k.to_string()).collect();
                Some((id, words))
            })
            .collect();
        Self::indexed(topics)
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tsync_types::{Task, TopicId};

use crate::table::TopicTable;

/// A detected topic with its confidence in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicMatch {
    pub topic: TopicId,
    pub confidence: f64,
}

/// Scores text against a [`TopicTable`].
#[derive(Clone, Debug, Default)]
pub struct TopicClassifier {
    table: TopicTable,
}

impl TopicClassifier {
    pub fn new(table: TopicTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TopicTable {
        &self.table
    }

    /// Detect topics in `content`.
    ///
    /// Confidence is the share of tokens that are keywords of the topic.
    /// Results are ordered by confidence, highest first, then by topic id.
    pub fn detect(&self, content: &str) -> Vec<TopicMatch> {
        let tokens = tokenize(content);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut hits: BTreeMap<&TopicId, usize> = BTreeMap::new();
        for token in &tokens {
            for topic in self.table.lookup(token) {
                *hits.entry(topic).or_default() += 1;
            }
        }

        let total = tokens.len() as f64;
        let mut matches: Vec<TopicMatch> = hits
            .into_iter()
            .map(|(topic, count)| TopicMatch {
                topic: topic.clone(),
                confidence: (count as f64 / total).clamp(0.0, 1.0),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        matches
    }

    /// Add detected topics to `task`. Existing topics are kept. Returns
    /// `true` if the topic set grew.
    pub fn assign(&self, task: &mut Task) -> bool {
        let detected = self.detect(&task.content);
        let grew = task.add_topics(detected.into_iter().map(|m| m.topic));
        if grew {
            debug!(task = %task.id, topics = task.topics.len(), "assigned topics");
        }
        grew
    }
}

/// Lowercase alphanumeric tokens of `text`.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsync_types::{Contributor, ProjectId, SessionId, TaskId, Timestamp};

    fn topic(s: &str) -> TopicId {
        TopicId::new(s).unwrap()
    }

    #[test]
    fn tokenizer_splits_on_punctuation() {
        assert_eq!(
            tokenize("Fix the API-endpoint, now!"),
            vec!["fix", "the", "api", "endpoint", "now"]
        );
        assert!(tokenize("  -- ").is_empty());
    }

    #[test]
    fn confidence_is_match_density() {
        let classifier = TopicClassifier::default();
        let matches = classifier.detect("write tests for the api endpoint");
        // 6 tokens: "tests" -> testing, "api" + "endpoint" -> api
        assert_eq!(matches[0].topic, topic("api"));
        assert!((matches[0].confidence - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(matches[1].topic, topic("testing"));
        assert!((matches[1].confidence - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn ties_are_ordered_by_topic_id() {
        let classifier = TopicClassifier::default();
        let matches = classifier.detect("refactor docs");
        let ids: Vec<&str> = matches.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(ids, vec!["documentation", "refactor"]);
    }

    #[test]
    fn nothing_detected_in_plain_text() {
        let classifier = TopicClassifier::default();
        assert!(classifier.detect("water the plants").is_empty());
        assert!(classifier.detect("").is_empty());
    }

    #[test]
    fn single_keyword_is_full_confidence() {
        let classifier = TopicClassifier::default();
        let matches = classifier.detect("Docker");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].confidence, 1.0);
    }

    #[test]
    fn assign_is_additive() {
        let classifier = TopicClassifier::default();
        let mut task = Task::new(
            TaskId::new("T1").unwrap(),
            "fix flaky tests",
            Contributor::new("claude").unwrap(),
            SessionId::new("S1").unwrap(),
            ProjectId::new("P1").unwrap(),
            Timestamp::zero(),
        )
        .unwrap();
        task.add_topics([topic("manual")]);
        let clock = task.clock.clone();

        assert!(classifier.assign(&mut task));
        assert!(task.topics.contains(&topic("manual")));
        assert!(task.topics.contains(&topic("bugfix")));
        assert!(task.topics.contains(&topic("testing")));
        assert_eq!(task.clock, clock);

        assert!(!classifier.assign(&mut task));
    }

    #[test]
    fn custom_table() {
        let table = TopicTable::from_toml_str("[topics]\ngarden = [\"plants\"]").unwrap();
        let classifier = TopicClassifier::new(table);
        let matches = classifier.detect("water the plants");
        assert_eq!(matches[0].topic, topic("garden"));
    }
}

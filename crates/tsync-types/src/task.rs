//! The synchronized task record.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tsync_clock::VectorClock;

use crate::error::TypeError;
use crate::ids::{Contributor, ProjectId, SessionId, TaskId, TopicId};
use crate::temporal::Timestamp;

/// Workflow status of a task.
///
/// Transitions are not required to be monotonic: a completed task may move
/// back to in-progress when a contributor corrects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    /// Priority rank used by the `status_priority` merge strategy:
    /// completed > in_progress > pending.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
        }
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" | "in-progress" | "inprogress" => Ok(Self::InProgress),
            "completed" | "done" => Ok(Self::Completed),
            other => Err(TypeError::InvalidStatus(other.to_string())),
        }
    }
}

/// Which user-visible fields differ between two versions of a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldChanges {
    pub content: bool,
    pub status: bool,
    pub deleted: bool,
}

impl FieldChanges {
    /// Returns `true` if nothing differs.
    pub fn is_empty(&self) -> bool {
        !(self.content || self.status || self.deleted)
    }

    /// Number of differing fields.
    pub fn count(&self) -> usize {
        usize::from(self.content) + usize::from(self.status) + usize::from(self.deleted)
    }
}

/// A task record ("todo") synchronized across sessions.
///
/// Every mutating method advances the editing contributor's entry in
/// [`clock`](Task::clock); a task is never physically removed, only
/// tombstoned through [`soft_delete`](Task::soft_delete).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Externally minted identifier; immutable.
    pub id: TaskId,
    /// Free-form task text.
    pub content: String,
    /// Workflow status.
    pub status: TaskStatus,
    /// Contributor/platform that created the task.
    pub contributor: Contributor,
    /// Session that owns the task.
    pub session_id: SessionId,
    /// Project the task belongs to.
    pub project_id: ProjectId,
    /// Topic buckets; only grown by classification.
    pub topics: BTreeSet<TopicId>,
    /// Per-contributor causal clock.
    pub clock: VectorClock,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Tombstone; `Some` once soft-deleted.
    pub deleted_at: Option<Timestamp>,
}

impl Task {
    /// Create a pending task. Creation counts as the contributor's first edit.
    pub fn new(
        id: TaskId,
        content: impl Into<String>,
        contributor: Contributor,
        session_id: SessionId,
        project_id: ProjectId,
        at: Timestamp,
    ) -> Result<Self, TypeError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(TypeError::EmptyContent);
        }
        let mut clock = VectorClock::new();
        clock.increment(contributor.as_str());
        Ok(Self {
            id,
            content,
            status: TaskStatus::Pending,
            contributor,
            session_id,
            project_id,
            topics: BTreeSet::new(),
            clock,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        })
    }

    /// Check field-level invariants of a task received from a client.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.content.trim().is_empty() {
            return Err(TypeError::EmptyContent);
        }
        Ok(())
    }

    /// Returns `true` if the task carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Fields whose values differ from `other`. Clocks, timestamps and
    /// topics are not part of the comparison.
    pub fn changes_from(&self, other: &Task) -> FieldChanges {
        FieldChanges {
            content: self.content != other.content,
            status: self.status != other.status,
            deleted: self.is_deleted() != other.is_deleted(),
        }
    }

    /// Returns `true` if `other` holds the same user-visible value.
    pub fn same_value(&self, other: &Task) -> bool {
        self.changes_from(other).is_empty()
    }

    /// Record an edit by `by` at `at`.
    pub fn touch(&mut self, by: &Contributor, at: Timestamp) {
        self.clock.increment(by.as_str());
        self.updated_at = self.updated_at.max(at);
    }

    /// Change the status.
    pub fn set_status(&mut self, status: TaskStatus, by: &Contributor, at: Timestamp) {
        self.status = status;
        self.touch(by, at);
    }

    /// Replace the content.
    pub fn set_content(
        &mut self,
        content: impl Into<String>,
        by: &Contributor,
        at: Timestamp,
    ) -> Result<(), TypeError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(TypeError::EmptyContent);
        }
        self.content = content;
        self.touch(by, at);
        Ok(())
    }

    /// Tombstone the task. Already-deleted tasks keep their original
    /// tombstone time but the edit is still recorded.
    pub fn soft_delete(&mut self, by: &Contributor, at: Timestamp) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(at);
        }
        self.touch(by, at);
    }

    /// Explicitly replace the topic set. This is the only way topics are
    /// removed.
    pub fn set_topics(&mut self, topics: BTreeSet<TopicId>, by: &Contributor, at: Timestamp) {
        self.topics = topics;
        self.touch(by, at);
    }

    /// Add topics without removing any. Returns `true` if the set grew.
    /// Topic enrichment is not an edit and leaves the clock alone.
    pub fn add_topics<I: IntoIterator<Item = TopicId>>(&mut self, topics: I) -> bool {
        let before = self.topics.len();
        self.topics.extend(topics);
        self.topics.len() != before
    }

    /// Overwrite the user-visible value with `source`'s while keeping this
    /// task's identity, and record the edit by `by`.
    pub fn revise_from(&mut self, source: &Task, by: &Contributor, at: Timestamp) {
        self.content.clone_from(&source.content);
        self.status = source.status;
        self.deleted_at = source.deleted_at;
        self.topics.extend(source.topics.iter().cloned());
        self.clock.merge(&source.clock);
        self.touch(by, at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsync_clock::ClockOrdering;

    fn contributor(tag: &str) -> Contributor {
        Contributor::new(tag).unwrap()
    }

    fn make_task(content: &str) -> Task {
        Task::new(
            TaskId::new("T1").unwrap(),
            content,
            contributor("claude"),
            SessionId::new("S1").unwrap(),
            ProjectId::new("P1").unwrap(),
            Timestamp::from_millis(100),
        )
        .unwrap()
    }

    #[test]
    fn new_task_is_pending_with_creator_clock() {
        let task = make_task("write tests");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.clock.get("claude"), 1);
        assert_eq!(task.created_at, task.updated_at);
        assert!(!task.is_deleted());
    }

    #[test]
    fn empty_content_is_rejected() {
        let err = Task::new(
            TaskId::new("T1").unwrap(),
            "   ",
            contributor("claude"),
            SessionId::new("S1").unwrap(),
            ProjectId::new("P1").unwrap(),
            Timestamp::zero(),
        )
        .unwrap_err();
        assert_eq!(err, TypeError::EmptyContent);
    }

    #[test]
    fn every_transition_advances_the_clock() {
        let mut task = make_task("a");
        let before = task.clock.clone();
        task.set_status(TaskStatus::Completed, &contributor("cursor"), Timestamp::from_millis(200));
        assert_eq!(task.clock.compare(&before), ClockOrdering::After);
        assert_eq!(task.updated_at, Timestamp::from_millis(200));

        // Regressions are allowed but still advance.
        let mid = task.clock.clone();
        let at = Timestamp::from_millis(300);
        task.set_status(TaskStatus::InProgress, &contributor("cursor"), at);
        assert_eq!(task.clock.compare(&mid), ClockOrdering::After);
        assert_eq!(task.clock.get("cursor"), 2);
    }

    #[test]
    fn soft_delete_keeps_first_tombstone() {
        let mut task = make_task("a");
        task.soft_delete(&contributor("claude"), Timestamp::from_millis(500));
        task.soft_delete(&contributor("claude"), Timestamp::from_millis(900));
        assert_eq!(task.deleted_at, Some(Timestamp::from_millis(500)));
        assert_eq!(task.clock.get("claude"), 3);
    }

    #[test]
    fn same_value_ignores_clock_and_topics() {
        let a = make_task("a");
        let mut b = a.clone();
        b.clock.increment("other");
        b.add_topics([TopicId::new("testing").unwrap()]);
        assert!(a.same_value(&b));

        b.status = TaskStatus::Completed;
        let changes = a.changes_from(&b);
        assert!(changes.status && !changes.content && !changes.deleted);
        assert_eq!(changes.count(), 1);
    }

    #[test]
    fn add_topics_is_additive_and_clock_neutral() {
        let mut task = make_task("a");
        let clock = task.clock.clone();
        assert!(task.add_topics([TopicId::new("docs").unwrap()]));
        assert!(!task.add_topics([TopicId::new("docs").unwrap()]));
        assert_eq!(task.topics.len(), 1);
        assert_eq!(task.clock, clock);
    }

    #[test]
    fn revise_from_dominates_both_clocks() {
        let mut target = make_task("old");
        let mut source = make_task("new");
        source.clock.increment("gpt");
        source.clock.increment("gpt");
        target.revise_from(&source, &contributor("admin"), Timestamp::from_millis(999));
        assert_eq!(target.content, "new");
        assert!(target.clock.dominates(&source.clock));
        assert_eq!(target.clock.get("admin"), 1);
    }

    #[test]
    fn status_parse_and_rank() {
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("COMPLETED".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert!("blocked".parse::<TaskStatus>().is_err());
        assert!(TaskStatus::Completed.rank() > TaskStatus::InProgress.rank());
        assert!(TaskStatus::InProgress.rank() > TaskStatus::Pending.rank());
    }

    #[test]
    fn serde_uses_snake_case_status() {
        let task = make_task("a");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "pending");
        let parsed: Task = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, task);
    }
}

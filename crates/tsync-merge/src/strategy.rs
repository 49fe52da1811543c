use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tsync_types::Task;

use crate::error::MergeError;

/// How concurrent edits to the same task are settled.
///
/// Requests carry strategies as strings; they are parsed into this enum at
/// the edge so the engine never branches on text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Greater wall-clock `updated_at` wins; ties keep local.
    #[default]
    Timestamp,
    /// completed > in_progress > pending; ties fall back to `Timestamp`.
    StatusPriority,
    /// Always the local side.
    KeepLocal,
    /// Always the remote side.
    KeepRemote,
    /// Keep both values as separate tasks.
    KeepBoth,
    /// Pick nothing; leave an unresolved conflict.
    Manual,
}

impl MergeStrategy {
    /// All strategies, in declaration order.
    pub const ALL: [MergeStrategy; 6] = [
        Self::Timestamp,
        Self::StatusPriority,
        Self::KeepLocal,
        Self::KeepRemote,
        Self::KeepBoth,
        Self::Manual,
    ];

    /// Wire name of the strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::StatusPriority => "status_priority",
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::KeepBoth => "keep_both",
            Self::Manual => "manual",
        }
    }

    /// Pick the winning side for a single-winner strategy.
    ///
    /// Returns `None` for `KeepBoth` and `Manual`, which do not select one
    /// side.
    pub fn choose(self, local: &Task, remote: &Task) -> Option<Side> {
        match self {
            Self::Timestamp => Some(by_timestamp(local, remote)),
            Self::StatusPriority => {
                let (l, r) = (local.status.rank(), remote.status.rank());
                Some(match l.cmp(&r) {
                    std::cmp::Ordering::Greater => Side::Local,
                    std::cmp::Ordering::Less => Side::Remote,
                    std::cmp::Ordering::Equal => by_timestamp(local, remote),
                })
            }
            Self::KeepLocal => Some(Side::Local),
            Self::KeepRemote => Some(Side::Remote),
            Self::KeepBoth | Self::Manual => None,
        }
    }
}

fn by_timestamp(local: &Task, remote: &Task) -> Side {
    if remote.updated_at > local.updated_at {
        Side::Remote
    } else {
        Side::Local
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| MergeError::UnknownStrategy(s.to_string()))
    }
}

/// What `keep_both` does with the second value.
///
/// The second value needs a freshly minted identifier, which the pure engine
/// cannot obtain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepBothPolicy {
    /// Surface the remote value as a pending duplicate; the caller mints an
    /// id for it before persisting.
    #[default]
    MintDuplicate,
    /// Treat the case like `manual` until a caller confirms duplication by
    /// resolving the conflict with `keep_both`.
    HoldAsConflict,
}

/// Which input a merged value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Base,
    Local,
    Remote,
    /// Local kept under the original id, remote kept as a duplicate.
    Both,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Both => write!(f, "both"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsync_types::{Contributor, ProjectId, SessionId, TaskId, TaskStatus, Timestamp};

    fn task(status: TaskStatus, updated: u64) -> Task {
        let mut t = Task::new(
            TaskId::new("T1").unwrap(),
            "x",
            Contributor::new("a").unwrap(),
            SessionId::new("S1").unwrap(),
            ProjectId::new("P1").unwrap(),
            Timestamp::from_millis(1),
        )
        .unwrap();
        t.status = status;
        t.updated_at = Timestamp::from_millis(updated);
        t
    }

    #[test]
    fn parses_wire_names_and_variants() {
        assert_eq!("timestamp".parse::<MergeStrategy>().unwrap(), MergeStrategy::Timestamp);
        assert_eq!(
            "status-priority".parse::<MergeStrategy>().unwrap(),
            MergeStrategy::StatusPriority
        );
        assert_eq!(" KEEP_BOTH ".parse::<MergeStrategy>().unwrap(), MergeStrategy::KeepBoth);
        assert_eq!(
            "newest".parse::<MergeStrategy>(),
            Err(MergeError::UnknownStrategy("newest".into()))
        );
    }

    #[test]
    fn display_matches_parse() {
        for strategy in MergeStrategy::ALL {
            assert_eq!(strategy.to_string().parse::<MergeStrategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn default_is_timestamp() {
        assert_eq!(MergeStrategy::default(), MergeStrategy::Timestamp);
        assert_eq!(KeepBothPolicy::default(), KeepBothPolicy::MintDuplicate);
    }

    #[test]
    fn timestamp_prefers_newer_and_ties_go_local() {
        let l = task(TaskStatus::Pending, 200);
        let r = task(TaskStatus::Pending, 150);
        assert_eq!(MergeStrategy::Timestamp.choose(&l, &r), Some(Side::Local));
        assert_eq!(MergeStrategy::Timestamp.choose(&r, &l), Some(Side::Remote));
        assert_eq!(MergeStrategy::Timestamp.choose(&l, &l), Some(Side::Local));
    }

    #[test]
    fn status_priority_ranks_then_falls_back() {
        let done = task(TaskStatus::Completed, 1);
        let doing = task(TaskStatus::InProgress, 99);
        assert_eq!(MergeStrategy::StatusPriority.choose(&doing, &done), Some(Side::Remote));

        let newer = task(TaskStatus::Pending, 10);
        let older = task(TaskStatus::Pending, 5);
        assert_eq!(MergeStrategy::StatusPriority.choose(&older, &newer), Some(Side::Remote));
    }

    #[test]
    fn multi_value_strategies_do_not_choose() {
        let t = task(TaskStatus::Pending, 1);
        assert_eq!(MergeStrategy::KeepBoth.choose(&t, &t), None);
        assert_eq!(MergeStrategy::Manual.choose(&t, &t), None);
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&MergeStrategy::StatusPriority).unwrap();
        assert_eq!(json, "\"status_priority\"");
        let policy: KeepBothPolicy = serde_json::from_str("\"hold_as_conflict\"").unwrap();
        assert_eq!(policy, KeepBothPolicy::HoldAsConflict);
    }
}

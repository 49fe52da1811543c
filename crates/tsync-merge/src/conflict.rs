//! Typed representation of detected divergences and their resolution.
//!
//! The engine emits [`DetectedConflict`] values. The consolidator mints an
//! identifier for each and persists it as a [`Conflict`], which then follows
//! its own state machine:
//!
//! ```text
//! detected ──resolve──> resolved
//!     │                    │
//!     └──dispute──> disputed <──dispute──┘
//!                      │
//!                      └──resolve──> resolved
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tsync_types::{ConflictId, Contributor, ProjectId, Task, TaskId, Timestamp};

use crate::error::{MergeError, MergeResult};
use crate::strategy::{KeepBothPolicy, MergeStrategy, Side};

/// What kind of divergence was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Only the content text differs.
    ContentDivergence,
    /// Only the status differs.
    StatusDivergence,
    /// Content and status both differ.
    MixedDivergence,
    /// One side tombstoned the task while the other modified it.
    ConcurrentDelete,
}

impl ConflictKind {
    /// Classify the divergence between two concurrent values.
    pub fn classify(local: &Task, remote: &Task) -> Self {
        let changes = local.changes_from(remote);
        if changes.deleted {
            Self::ConcurrentDelete
        } else if changes.content && changes.status {
            Self::MixedDivergence
        } else if changes.content {
            Self::ContentDivergence
        } else {
            Self::StatusDivergence
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentDivergence => write!(f, "content-divergence"),
            Self::StatusDivergence => write!(f, "status-divergence"),
            Self::MixedDivergence => write!(f, "mixed-divergence"),
            Self::ConcurrentDelete => write!(f, "concurrent-delete"),
        }
    }
}

/// The automatic choice the engine made for a concurrent edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResolution {
    pub strategy: MergeStrategy,
    pub chosen: Side,
}

/// A divergence found by the engine, before it has an identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedConflict {
    pub task_id: TaskId,
    pub kind: ConflictKind,
    pub base: Option<Task>,
    pub local: Option<Task>,
    pub remote: Option<Task>,
    /// `None` when nothing was selected automatically (`manual`).
    pub auto_resolution: Option<AutoResolution>,
}

impl DetectedConflict {
    /// Returns `true` if no value was selected automatically.
    pub fn is_unresolved(&self) -> bool {
        self.auto_resolution.is_none()
    }
}

/// Lifecycle state of a persisted conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    Detected,
    Disputed,
    Resolved,
}

impl fmt::Display for ConflictState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detected => write!(f, "detected"),
            Self::Disputed => write!(f, "disputed"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// How and by whom a conflict was settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: MergeStrategy,
    pub chosen: Side,
    pub resolver: Contributor,
    pub resolved_at: Timestamp,
}

/// A challenge raised against a conflict's resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub by: Contributor,
    pub reason: String,
    pub at: Timestamp,
    /// The resolution that was in force when the dispute was raised.
    pub overridden: Option<Resolution>,
}

/// A persisted conflict record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub project_id: ProjectId,
    pub task_id: TaskId,
    pub kind: ConflictKind,
    pub base: Option<Task>,
    pub local: Option<Task>,
    pub remote: Option<Task>,
    pub detected_at: Timestamp,
    pub state: ConflictState,
    pub resolution: Option<Resolution>,
    pub disputes: Vec<Dispute>,
}

impl Conflict {
    /// Persistable record for an engine-detected conflict. Automatically
    /// settled conflicts start out `resolved`, attributed to `system`.
    pub fn from_detected(
        id: ConflictId,
        project_id: ProjectId,
        detected: DetectedConflict,
        at: Timestamp,
        system: &Contributor,
    ) -> Self {
        let (state, resolution) = match detected.auto_resolution {
            Some(auto) => (
                ConflictState::Resolved,
                Some(Resolution {
                    strategy: auto.strategy,
                    chosen: auto.chosen,
                    resolver: system.clone(),
                    resolved_at: at,
                }),
            ),
            None => (ConflictState::Detected, None),
        };
        Self {
            id,
            project_id,
            task_id: detected.task_id,
            kind: detected.kind,
            base: detected.base,
            local: detected.local,
            remote: detected.remote,
            detected_at: at,
            state,
            resolution,
            disputes: Vec::new(),
        }
    }

    /// Returns `true` once the conflict is in the `resolved` state.
    pub fn is_resolved(&self) -> bool {
        self.state == ConflictState::Resolved
    }

    /// Returns `true` if `detected` is the same pair of values this record
    /// was raised for.
    pub fn same_divergence(&self, detected: &DetectedConflict) -> bool {
        self.task_id == detected.task_id
            && self.local == detected.local
            && self.remote == detected.remote
    }

    /// Decide which side `strategy` selects for this conflict.
    ///
    /// With `keep_both` the answer is [`Side::Both`] unless one side is a
    /// tombstone, in which case the live side wins. `manual` never selects.
    pub fn choose(&self, strategy: MergeStrategy) -> MergeResult<Side> {
        match (&self.local, &self.remote) {
            (Some(local), Some(remote)) => match strategy {
                MergeStrategy::Manual => {
                    Err(MergeError::NonResolvingStrategy(strategy.to_string()))
                }
                MergeStrategy::KeepBoth => Ok(keep_both_side(local, remote)),
                other => other
                    .choose(local, remote)
                    .ok_or_else(|| MergeError::NonResolvingStrategy(other.to_string())),
            },
            (Some(_), None) => Ok(Side::Local),
            (None, Some(_)) => Ok(Side::Remote),
            (None, None) => Err(MergeError::NoCandidates(self.task_id.clone())),
        }
    }

    /// The stored value for a side, if any.
    pub fn value(&self, side: Side) -> Option<&Task> {
        match side {
            Side::Base => self.base.as_ref(),
            Side::Local | Side::Both => self.local.as_ref(),
            Side::Remote => self.remote.as_ref(),
        }
    }

    /// Settle the conflict. Allowed from `detected` and `disputed`.
    pub fn resolve(
        &mut self,
        strategy: MergeStrategy,
        chosen: Side,
        resolver: Contributor,
        at: Timestamp,
    ) -> MergeResult<()> {
        if strategy == MergeStrategy::Manual {
            return Err(MergeError::NonResolvingStrategy(strategy.to_string()));
        }
        if self.state == ConflictState::Resolved {
            return Err(self.illegal(ConflictState::Resolved));
        }
        self.state = ConflictState::Resolved;
        self.resolution = Some(Resolution {
            strategy,
            chosen,
            resolver,
            resolved_at: at,
        });
        Ok(())
    }

    /// Challenge the conflict's (possibly automatic) resolution.
    pub fn dispute(
        &mut self,
        by: Contributor,
        reason: impl Into<String>,
        at: Timestamp,
    ) -> MergeResult<()> {
        if self.state == ConflictState::Disputed {
            return Err(self.illegal(ConflictState::Disputed));
        }
        self.disputes.push(Dispute {
            by,
            reason: reason.into(),
            at,
            overridden: self.resolution.take(),
        });
        self.state = ConflictState::Disputed;
        Ok(())
    }

    fn illegal(&self, to: ConflictState) -> MergeError {
        MergeError::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}

/// `keep_both` keeps two live values; against a tombstone it keeps the live
/// one.
pub(crate) fn keep_both_side(local: &Task, remote: &Task) -> Side {
    match (local.is_deleted(), remote.is_deleted()) {
        (true, false) => Side::Remote,
        (false, true) => Side::Local,
        (true, true) => MergeStrategy::Timestamp
            .choose(local, remote)
            .unwrap_or(Side::Local),
        (false, false) => Side::Both,
    }
}

/// Whether `keep_both` under `policy` behaves like `manual`.
pub(crate) fn holds_for_manual(strategy: MergeStrategy, policy: KeepBothPolicy) -> bool {
    match strategy {
        MergeStrategy::Manual => true,
        MergeStrategy::KeepBoth => policy == KeepBothPolicy::HoldAsConflict,
        _ => false,
    }
}

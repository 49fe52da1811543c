//! Three-way merge of task sets.
//!
//! For every task id in the union of the three inputs the engine decides a
//! single merged value, using vector clocks to separate causally ordered
//! edits from concurrent ones. Only concurrent edits consult the
//! [`MergeStrategy`], and each of those produces a [`DetectedConflict`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;
use tsync_clock::ClockOrdering;
use tsync_types::{Task, TaskId};

use crate::conflict::{
    holds_for_manual, keep_both_side, AutoResolution, ConflictKind, DetectedConflict,
};
use crate::error::{MergeError, MergeResult};
use crate::strategy::{KeepBothPolicy, MergeStrategy, Side};

/// Result of merging three task sets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Merged tasks, ordered by `(created_at, id)`.
    pub merged: Vec<Task>,
    /// One entry per concurrent edit, resolved or not.
    pub conflicts: Vec<DetectedConflict>,
    /// Remote values retained by `keep_both`. Each still carries the id it
    /// collided on and must be given a freshly minted one before it is stored.
    pub duplicates: Vec<Task>,
}

impl MergeOutcome {
    /// Returns `true` if no concurrent edits were found.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Conflicts for which nothing was selected automatically.
    pub fn unresolved(&self) -> impl Iterator<Item = &DetectedConflict> {
        self.conflicts.iter().filter(|c| c.is_unresolved())
    }

    /// The merged tasks, or an error while any conflict awaits a manual
    /// decision.
    pub fn clean_merged(&self) -> MergeResult<&[Task]> {
        let mut unresolved = self.unresolved();
        match unresolved.next() {
            None => Ok(&self.merged),
            Some(first) => Err(MergeError::UnresolvedConflicts {
                count: 1 + unresolved.count(),
                first: first.task_id.clone(),
            }),
        }
    }
}

/// Decision for a single task id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskMerge {
    pub value: Option<Task>,
    pub conflict: Option<DetectedConflict>,
    pub duplicate: Option<Task>,
}

impl TaskMerge {
    fn take(value: Task) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }
}

/// Stateless three-way merger configured with a strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeEngine {
    strategy: MergeStrategy,
    keep_both: KeepBothPolicy,
}

impl MergeEngine {
    /// Create an engine with the default `keep_both` policy.
    pub fn new(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            keep_both: KeepBothPolicy::default(),
        }
    }

    /// Override the `keep_both` policy.
    pub fn with_keep_both(mut self, policy: KeepBothPolicy) -> Self {
        self.keep_both = policy;
        self
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    pub fn keep_both(&self) -> KeepBothPolicy {
        self.keep_both
    }

    // ------------------------------------------------------------------
    // Set merge
    // ------------------------------------------------------------------

    /// Merge `local` and `remote` against their common `base`.
    pub fn merge(&self, base: &[Task], local: &[Task], remote: &[Task]) -> MergeOutcome {
        let base = index(base);
        let local = index(local);
        let remote = index(remote);

        let ids: BTreeSet<&TaskId> = base
            .keys()
            .chain(local.keys())
            .chain(remote.keys())
            .copied()
            .collect();

        let mut outcome = MergeOutcome::default();
        for id in ids {
            let decision = self.merge_task(
                base.get(id).copied(),
                local.get(id).copied(),
                remote.get(id).copied(),
            );
            if let Some(conflict) = decision.conflict {
                debug!(
                    task = %conflict.task_id,
                    kind = %conflict.kind,
                    strategy = %self.strategy,
                    resolved = !conflict.is_unresolved(),
                    "concurrent edit"
                );
                outcome.conflicts.push(conflict);
            }
            outcome.merged.extend(decision.value);
            outcome.duplicates.extend(decision.duplicate);
        }

        outcome
            .merged
            .sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        debug!(
            merged = outcome.merged.len(),
            conflicts = outcome.conflicts.len(),
            duplicates = outcome.duplicates.len(),
            "three-way merge complete"
        );
        outcome
    }

    // ------------------------------------------------------------------
    // Per-task decision
    // ------------------------------------------------------------------

    /// Decide the merged value for one task id.
    pub fn merge_task(
        &self,
        base: Option<&Task>,
        local: Option<&Task>,
        remote: Option<&Task>,
    ) -> TaskMerge {
        let Some(base) = base else {
            return match (local, remote) {
                (Some(l), Some(r)) => self.merge_changed(None, l, r),
                (Some(only), None) | (None, Some(only)) => TaskMerge::take(only.clone()),
                (None, None) => TaskMerge::default(),
            };
        };

        let local_changed = local.is_some_and(|l| changed_since(base, l));
        let remote_changed = remote.is_some_and(|r| changed_since(base, r));

        match (local, remote, local_changed, remote_changed) {
            (Some(l), Some(r), true, true) => self.merge_changed(Some(base), l, r),
            (Some(l), _, true, false) => TaskMerge::take(absorb(l.clone(), remote)),
            (_, Some(r), false, true) => TaskMerge::take(absorb(r.clone(), local)),
            _ => TaskMerge::take(fast_forward(base, local, remote)),
        }
    }

    /// Both sides carry a value base has not seen (or there is no base).
    fn merge_changed(&self, base: Option<&Task>, local: &Task, remote: &Task) -> TaskMerge {
        if local.same_value(remote) {
            let (winner, other) = if remote.updated_at > local.updated_at {
                (remote, local)
            } else {
                (local, remote)
            };
            return TaskMerge::take(absorb(winner.clone(), Some(other)));
        }

        match local.clock.compare(&remote.clock) {
            ClockOrdering::After => TaskMerge::take(absorb(local.clone(), Some(remote))),
            ClockOrdering::Before => TaskMerge::take(absorb(remote.clone(), Some(local))),
            ClockOrdering::Concurrent | ClockOrdering::Equal => {
                self.resolve_concurrent(base, local, remote)
            }
        }
    }

    fn resolve_concurrent(&self, base: Option<&Task>, local: &Task, remote: &Task) -> TaskMerge {
        let kind = ConflictKind::classify(local, remote);
        let mut conflict = DetectedConflict {
            task_id: local.id.clone(),
            kind,
            base: base.cloned(),
            local: Some(local.clone()),
            remote: Some(remote.clone()),
            auto_resolution: None,
        };

        if holds_for_manual(self.strategy, self.keep_both) {
            let retained = base.unwrap_or(local).clone();
            return TaskMerge {
                value: Some(retained),
                conflict: Some(conflict),
                duplicate: None,
            };
        }

        let chosen = match self.strategy {
            MergeStrategy::KeepBoth => keep_both_side(local, remote),
            single => single.choose(local, remote).unwrap_or(Side::Local),
        };
        conflict.auto_resolution = Some(AutoResolution {
            strategy: self.strategy,
            chosen,
        });

        let (value, duplicate) = match chosen {
            Side::Remote => (absorb(remote.clone(), Some(local)), None),
            Side::Both => (absorb(local.clone(), Some(remote)), Some(remote.clone())),
            Side::Local | Side::Base => (absorb(local.clone(), Some(remote)), None),
        };
        TaskMerge {
            value: Some(value),
            conflict: Some(conflict),
            duplicate,
        }
    }
}

/// Merge with `strategy` and the default `keep_both` policy.
pub fn three_way_merge(
    base: &[Task],
    local: &[Task],
    remote: &[Task],
    strategy: MergeStrategy,
) -> MergeOutcome {
    MergeEngine::new(strategy).merge(base, local, remote)
}

fn index(tasks: &[Task]) -> BTreeMap<&TaskId, &Task> {
    tasks.iter().map(|t| (&t.id, t)).collect()
}

/// A side changed relative to base unless it holds base's value or its
/// clock shows base already absorbed it.
pub fn changed_since(base: &Task, side: &Task) -> bool {
    !side.same_value(base) && side.clock.compare(&base.clock) != ClockOrdering::Before
}

/// Fold another side's clock and topics into the winner.
fn absorb(mut winner: Task, other: Option<&Task>) -> Task {
    if let Some(other) = other {
        winner.clock.merge(&other.clock);
        winner.topics.extend(other.topics.iter().cloned());
    }
    winner
}

/// Neither side changed base's value: keep base, picking up any clock
/// progress and topics the sides carry.
fn fast_forward(base: &Task, local: Option<&Task>, remote: Option<&Task>) -> Task {
    let mut merged = base.clone();
    for side in [local, remote].into_iter().flatten() {
        merged.clock.merge(&side.clock);
        merged.topics.extend(side.topics.iter().cloned());
        if side.same_value(base) {
            merged.updated_at = merged.updated_at.max(side.updated_at);
        }
    }
    merged
}

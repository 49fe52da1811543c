use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use tsync_log::CommitKind;
use tsync_merge::{Conflict, MergeStrategy, Side};
use tsync_store::CasOutcome;
use tsync_types::{CommitId, ConflictId, Contributor, Task, TaskId, Timestamp};

use crate::consolidator::{sort_tasks, ProjectConsolidator};
use crate::error::{ConsolidateError, ConsolidateResult};

/// What an explicit resolution changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub conflict: Conflict,
    pub canonical: Vec<Task>,
    pub version: u64,
    pub commit_id: Option<CommitId>,
    /// Id minted for the remote copy under `keep_both`.
    pub duplicate: Option<TaskId>,
    /// `false` when the canonical state already held the chosen value.
    pub written: bool,
}

impl ProjectConsolidator {
    /// Settle a conflict with `strategy` and apply the chosen value to the
    /// canonical state. A conflict that is already resolved is disputed on
    /// the resolver's behalf first, so the earlier resolution stays on
    /// record.
    pub async fn resolve(
        &self,
        conflict_id: &ConflictId,
        strategy: MergeStrategy,
        resolver: Contributor,
    ) -> ConsolidateResult<ResolutionOutcome> {
        let mut conflict = self.require_conflict(conflict_id)?;
        let chosen = conflict.choose(strategy)?;
        let kept_both = held_both(&conflict);
        let now = self.time.now();

        if conflict.is_resolved() {
            conflict.dispute(resolver.clone(), format!("overridden with {strategy}"), now)?;
        }
        conflict.resolve(strategy, chosen, resolver.clone(), now)?;

        let duplicate = if chosen == Side::Both && !kept_both {
            Some(
                self.minter
                    .task_id(
                        "duplicate",
                        json!({
                            "project_id": conflict.project_id.as_str(),
                            "duplicate_of": conflict.task_id.as_str(),
                            "conflict_id": conflict.id.as_str(),
                        }),
                    )
                    .await?,
            )
        } else {
            None
        };

        let attempts = self.settings.max_retries + 1;
        let mut commit_id = None;
        for attempt in 1..=attempts {
            let project = self.require_project(&conflict.project_id)?;
            let Some(canonical) = apply_resolution(
                &project.canonical,
                &conflict,
                chosen,
                duplicate.as_ref(),
                &resolver,
                now,
            ) else {
                self.store.update_conflict(conflict.clone())?;
                debug!(conflict = %conflict.id, "canonical state already holds the chosen value");
                return Ok(ResolutionOutcome {
                    conflict,
                    canonical: project.canonical,
                    version: project.version,
                    commit_id: None,
                    duplicate: None,
                    written: false,
                });
            };

            let id = match commit_id.take() {
                Some(id) => id,
                None => {
                    self.minter
                        .commit_id(
                            "resolution",
                            json!({
                                "project_id": project.id.as_str(),
                                "conflict_id": conflict.id.as_str(),
                            }),
                        )
                        .await?
                }
            };

            match self
                .store
                .cas_canonical(&project.id, project.version, canonical, now)?
            {
                CasOutcome::Applied(updated) => {
                    self.store.update_conflict(conflict.clone())?;
                    let commit_id = self.append_canonical(
                        &updated,
                        id,
                        CommitKind::Resolution,
                        None,
                        &resolver,
                        now,
                    )?;
                    info!(
                        conflict = %conflict.id,
                        project = %updated.id,
                        strategy = %strategy,
                        chosen = %chosen,
                        version = updated.version,
                        "resolved conflict"
                    );
                    return Ok(ResolutionOutcome {
                        conflict,
                        canonical: updated.canonical,
                        version: updated.version,
                        commit_id,
                        duplicate,
                        written: true,
                    });
                }
                CasOutcome::VersionMismatch { expected, actual } => {
                    warn!(
                        conflict = %conflict.id,
                        attempt,
                        expected,
                        actual,
                        "resolution lost a race"
                    );
                    commit_id = Some(id);
                    if attempt < attempts {
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        Err(ConsolidateError::Concurrency {
            project: conflict.project_id,
            attempts,
        })
    }

    /// Challenge a conflict's resolution. The canonical state is left as it
    /// is until the conflict is resolved again.
    pub fn dispute(
        &self,
        conflict_id: &ConflictId,
        by: Contributor,
        reason: &str,
    ) -> ConsolidateResult<Conflict> {
        let mut conflict = self.require_conflict(conflict_id)?;
        conflict.dispute(by, reason, self.time.now())?;
        self.store.update_conflict(conflict.clone())?;
        info!(conflict = %conflict.id, disputes = conflict.disputes.len(), "disputed conflict");
        Ok(conflict)
    }

    fn require_conflict(&self, id: &ConflictId) -> ConsolidateResult<Conflict> {
        self.store
            .conflict(id)?
            .ok_or_else(|| ConsolidateError::ConflictNotFound(id.clone()))
    }
}

/// Whether a `keep_both` resolution already materialised the remote copy.
fn held_both(conflict: &Conflict) -> bool {
    conflict
        .resolution
        .iter()
        .chain(conflict.disputes.iter().filter_map(|d| d.overridden.as_ref()))
        .any(|r| r.chosen == Side::Both)
}

/// The canonical state with `chosen` applied, or `None` if nothing changes.
///
/// The written value carries the clocks of both conflicting sides so that
/// neither session copy reads as a newer edit afterwards.
fn apply_resolution(
    canonical: &[Task],
    conflict: &Conflict,
    chosen: Side,
    duplicate: Option<&TaskId>,
    resolver: &Contributor,
    at: Timestamp,
) -> Option<Vec<Task>> {
    let value = conflict.value(chosen)?;
    let mut source = value.clone();
    for side in [&conflict.local, &conflict.remote].into_iter().flatten() {
        source.clock.merge(&side.clock);
    }

    let mut tasks = canonical.to_vec();
    let mut changed = false;
    match tasks.iter_mut().find(|t| t.id == conflict.task_id) {
        Some(task) if task.same_value(value) => {}
        Some(task) => {
            task.revise_from(&source, resolver, at);
            changed = true;
        }
        None => {
            tasks.push(source);
            changed = true;
        }
    }

    if let (Some(id), Some(remote)) = (duplicate, &conflict.remote) {
        if !tasks.iter().any(|t| &t.id == id) {
            let mut copy = remote.clone();
            copy.id = id.clone();
            tasks.push(copy);
            changed = true;
        }
    }

    if changed {
        sort_tasks(&mut tasks);
        Some(tasks)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Fixture;
    use tsync_log::CommitLog;
    use tsync_merge::ConflictState;
    use tsync_store::SyncStore;

    fn reviewer() -> Contributor {
        Contributor::new("reviewer").unwrap()
    }

    #[tokio::test]
    async fn manual_conflict_resolved_explicitly() {
        let f = Fixture::new();
        let (_, _, result) = f.diverge(MergeStrategy::Manual).await;
        let conflict_id = result.conflicts[0].id.clone();

        let outcome = f
            .consolidator
            .resolve(&conflict_id, MergeStrategy::KeepRemote, reviewer())
            .await
            .unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.conflict.state, ConflictState::Resolved);
        assert_eq!(outcome.canonical[0].content, "theirs");
        assert_eq!(outcome.version, result.version + 1);

        let commit = f.commit(&outcome.commit_id);
        assert_eq!(commit.kind, CommitKind::Resolution);
        assert_eq!(commit.author, reviewer());

        let stored = f.store.conflict(&conflict_id).unwrap().unwrap();
        assert!(stored.is_resolved());
        assert!(stored.disputes.is_empty());

        // Neither session copy reads as newer than the resolved value.
        let again = f.consolidate(MergeStrategy::Manual).await;
        assert!(!again.written);
        assert_eq!(again.canonical[0].content, "theirs");
    }

    #[tokio::test]
    async fn overriding_an_automatic_resolution_records_a_dispute() {
        let f = Fixture::new();
        let (_, _, result) = f.diverge(MergeStrategy::Timestamp).await;
        assert_eq!(result.canonical[0].content, "theirs");
        let conflict_id = result.conflicts[0].id.clone();

        let outcome = f
            .consolidator
            .resolve(&conflict_id, MergeStrategy::KeepLocal, reviewer())
            .await
            .unwrap();
        assert_eq!(outcome.canonical[0].content, "mine");
        let conflict = outcome.conflict;
        assert_eq!(conflict.disputes.len(), 1);
        assert_eq!(conflict.disputes[0].reason, "overridden with keep_local");
        let overridden = conflict.disputes[0].overridden.as_ref().unwrap();
        assert_eq!(overridden.strategy, MergeStrategy::Timestamp);
        assert_eq!(overridden.chosen, Side::Remote);
        assert_eq!(conflict.resolution.unwrap().chosen, Side::Local);
    }

    #[tokio::test]
    async fn resolving_to_the_applied_value_writes_nothing() {
        let f = Fixture::new();
        let (_, _, result) = f.diverge(MergeStrategy::Timestamp).await;
        let conflict_id = result.conflicts[0].id.clone();

        let outcome = f
            .consolidator
            .resolve(&conflict_id, MergeStrategy::KeepRemote, reviewer())
            .await
            .unwrap();
        assert!(!outcome.written);
        assert_eq!(outcome.version, result.version);
        assert!(outcome.commit_id.is_none());
        assert_eq!(outcome.conflict.disputes.len(), 1);
    }

    #[tokio::test]
    async fn keep_both_resolution_adds_the_remote_copy_once() {
        let f = Fixture::new();
        let (_, _, result) = f.diverge(MergeStrategy::Manual).await;
        let conflict_id = result.conflicts[0].id.clone();

        let outcome = f
            .consolidator
            .resolve(&conflict_id, MergeStrategy::KeepBoth, reviewer())
            .await
            .unwrap();
        let duplicate = outcome.duplicate.clone().unwrap();
        assert_eq!(outcome.canonical.len(), 2);
        let copy = outcome.canonical.iter().find(|t| t.id == duplicate).unwrap();
        assert_eq!(copy.content, "theirs");
        let original = outcome.canonical.iter().find(|t| t.id.as_str() == "T1").unwrap();
        assert_eq!(original.content, "mine");

        let again = f
            .consolidator
            .resolve(&conflict_id, MergeStrategy::KeepBoth, reviewer())
            .await
            .unwrap();
        assert!(again.duplicate.is_none());
        assert!(!again.written);
        assert_eq!(f.canonical().len(), 2);
    }

    #[tokio::test]
    async fn manual_is_not_a_resolution() {
        let f = Fixture::new();
        let (_, _, result) = f.diverge(MergeStrategy::Manual).await;
        let err = f
            .consolidator
            .resolve(&result.conflicts[0].id, MergeStrategy::Manual, reviewer())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidateError::Merge(_)));
        let stored = f.store.conflict(&result.conflicts[0].id).unwrap().unwrap();
        assert!(!stored.is_resolved());
    }

    #[tokio::test]
    async fn unknown_conflict_is_not_found() {
        let f = Fixture::new();
        let missing = ConflictId::new("conflict-missing").unwrap();
        let err = f
            .consolidator
            .resolve(&missing, MergeStrategy::Timestamp, reviewer())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidateError::ConflictNotFound(_)));
        assert!(matches!(
            f.consolidator.dispute(&missing, reviewer(), "no"),
            Err(ConsolidateError::ConflictNotFound(_))
        ));
    }

    #[tokio::test]
    async fn dispute_reopens_until_resolved_again() {
        let f = Fixture::new();
        let (_, _, result) = f.diverge(MergeStrategy::Timestamp).await;
        let conflict_id = result.conflicts[0].id.clone();

        let disputed = f
            .consolidator
            .dispute(&conflict_id, reviewer(), "wrong call")
            .unwrap();
        assert_eq!(disputed.state, ConflictState::Disputed);
        assert!(disputed.resolution.is_none());
        assert_eq!(f.store.conflicts(&f.project, Some(false)).unwrap().len(), 1);
        assert!(f.consolidator.dispute(&conflict_id, reviewer(), "again").is_err());

        let outcome = f
            .consolidator
            .resolve(&conflict_id, MergeStrategy::KeepLocal, reviewer())
            .await
            .unwrap();
        assert_eq!(outcome.conflict.state, ConflictState::Resolved);
        assert_eq!(outcome.conflict.disputes.len(), 1);
        assert_eq!(outcome.canonical[0].content, "mine");
    }

    #[test]
    fn applying_to_a_missing_task_inserts_it() {
        let f = Fixture::new();
        let session = tsync_types::Session::new(
            tsync_types::SessionId::new("S1").unwrap(),
            f.project.clone(),
            reviewer(),
            Timestamp::zero(),
        );
        let task = f.task(&session, "T9", "restore me", 5);
        let conflict = Conflict {
            id: ConflictId::new("C1").unwrap(),
            project_id: f.project.clone(),
            task_id: task.id.clone(),
            kind: tsync_merge::ConflictKind::ConcurrentDelete,
            base: None,
            local: Some(task.clone()),
            remote: None,
            detected_at: Timestamp::zero(),
            state: ConflictState::Detected,
            resolution: None,
            disputes: Vec::new(),
        };
        let at = Timestamp::zero();
        let applied = apply_resolution(&[], &conflict, Side::Local, None, &reviewer(), at).unwrap();
        assert_eq!(applied, vec![task.clone()]);
        let unchanged = apply_resolution(&[task], &conflict, Side::Local, None, &reviewer(), at);
        assert!(unchanged.is_none());
    }
}

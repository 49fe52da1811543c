use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use tsync_log::{CommitKind, CommitLog, LogError, NewCommit};
use tsync_merge::{
    changed_since, AutoResolution, Conflict, DetectedConflict, KeepBothPolicy, MergeEngine,
    MergeStrategy,
};
use tsync_mint::Minter;
use tsync_session::SessionRegistry;
use tsync_store::{CasOutcome, SyncStore};
use tsync_types::{
    CommitId, ConflictId, Contributor, Project, ProjectId, Session, SessionId, Task, TimeSource,
    Timestamp,
};

use crate::error::{ConsolidateError, ConsolidateResult};

/// Contributor tag used for consolidation commits and automatic
/// resolutions.
pub const SYSTEM_CONTRIBUTOR: &str = "tsync";

/// Attempts at appending a commit when the canonical branch head moved.
const COMMIT_ATTEMPTS: u32 = 3;

/// Retry and merge policy for the consolidator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsolidatorSettings {
    /// CAS retries after the first attempt.
    pub max_retries: u32,
    /// Linear backoff unit between attempts.
    pub retry_backoff: Duration,
    pub keep_both: KeepBothPolicy,
}

impl Default for ConsolidatorSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_millis(50),
            keep_both: KeepBothPolicy::default(),
        }
    }
}

/// Report of one consolidation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub project_id: ProjectId,
    /// Canonical state after the run.
    pub canonical: Vec<Task>,
    pub version: u64,
    /// Conflicts detected by this run, as persisted.
    pub conflicts: Vec<Conflict>,
    pub conflict_count: usize,
    /// Sessions whose task sets were folded in.
    pub sessions_touched: Vec<SessionId>,
    /// CAS attempts used, starting at 1.
    pub attempts: u32,
    /// Consolidation commit, when a write happened.
    pub commit_id: Option<CommitId>,
    /// Sessions archived before gathering.
    pub archived_sessions: Vec<SessionId>,
    /// Canonical tasks copied into sessions that lacked them.
    pub propagated: usize,
    /// `false` when nothing changed and the canonical state was left alone.
    pub written: bool,
}

/// Merged state for one attempt, before any id is minted.
struct Plan {
    merged: Vec<Task>,
    duplicates: Vec<Task>,
    conflicts: Vec<DetectedConflict>,
    /// Open conflicts on record that this run resolves automatically.
    settled: Vec<(ConflictId, AutoResolution)>,
    gathered: Vec<Session>,
    contributors: Vec<Session>,
}

impl Plan {
    fn is_noop(&self, prior: &[Task]) -> bool {
        self.conflicts.is_empty()
            && self.settled.is_empty()
            && self.duplicates.is_empty()
            && self.merged == prior
    }
}

/// Identifiers minted for a plan.
struct Minted {
    canonical: Vec<Task>,
    conflict_ids: Vec<ConflictId>,
    commit_id: CommitId,
}

/// Reconciles the task sets of a project's sessions into its canonical
/// state.
pub struct ProjectConsolidator {
    pub(crate) store: Arc<dyn SyncStore>,
    pub(crate) log: Arc<dyn CommitLog>,
    pub(crate) minter: Minter,
    pub(crate) time: Arc<dyn TimeSource>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) settings: ConsolidatorSettings,
}

impl ProjectConsolidator {
    pub fn new(
        store: Arc<dyn SyncStore>,
        log: Arc<dyn CommitLog>,
        minter: Minter,
        time: Arc<dyn TimeSource>,
        sessions: Arc<SessionRegistry>,
        settings: ConsolidatorSettings,
    ) -> Self {
        Self {
            store,
            log,
            minter,
            time,
            sessions,
            settings,
        }
    }

    pub fn settings(&self) -> ConsolidatorSettings {
        self.settings
    }

    // ------------------------------------------------------------------
    // Consolidation
    // ------------------------------------------------------------------

    /// Merge every live session of `project_id` into its canonical state.
    ///
    /// All identifiers are minted before the compare-and-swap; conflicts,
    /// the commit and propagation are written only once it succeeds. A lost
    /// CAS re-reads everything and retries with linear backoff.
    pub async fn consolidate(
        &self,
        project_id: &ProjectId,
        strategy: MergeStrategy,
    ) -> ConsolidateResult<ConsolidationResult> {
        self.require_project(project_id)?;
        let archived = self.sessions.archive_expired(project_id)?;
        let engine = MergeEngine::new(strategy).with_keep_both(self.settings.keep_both);
        let attempts = self.settings.max_retries + 1;

        for attempt in 1..=attempts {
            let project = self.require_project(project_id)?;
            let sessions = self.sessions.list_active(project_id)?;
            let plan = self.plan(&engine, &project, sessions)?;

            if plan.is_noop(&project.canonical) {
                let propagated = self.propagate(&plan.gathered, &project.canonical)?;
                debug!(
                    project = %project_id,
                    version = project.version,
                    "canonical state unchanged"
                );
                return Ok(ConsolidationResult {
                    project_id: project.id,
                    canonical: project.canonical,
                    version: project.version,
                    conflicts: Vec::new(),
                    conflict_count: 0,
                    sessions_touched: plan.gathered.into_iter().map(|s| s.id).collect(),
                    attempts: attempt,
                    commit_id: None,
                    archived_sessions: archived,
                    propagated,
                    written: false,
                });
            }

            let minted = self.mint_for(&project, &plan).await?;
            let now = self.time.now();
            match self.store.cas_canonical(
                project_id,
                project.version,
                minted.canonical.clone(),
                now,
            )? {
                CasOutcome::Applied(updated) => {
                    return self.finish(updated, plan, minted, archived, attempt, now);
                }
                CasOutcome::VersionMismatch { expected, actual } => {
                    warn!(
                        project = %project_id,
                        attempt,
                        expected,
                        actual,
                        "canonical write lost a race"
                    );
                    if attempt < attempts {
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        Err(ConsolidateError::Concurrency {
            project: project_id.clone(),
            attempts,
        })
    }

    /// Fold the sessions' task sets, in start order, against the canonical
    /// state, then merge the result back over it.
    fn plan(
        &self,
        engine: &MergeEngine,
        project: &Project,
        sessions: Vec<Session>,
    ) -> ConsolidateResult<Plan> {
        let prior = &project.canonical;
        let mut folded = prior.clone();
        let mut conflicts = Vec::new();
        let mut duplicates = Vec::new();
        let mut contributors = Vec::new();

        for session in &sessions {
            let tasks = self.store.session_tasks(&session.id)?;
            let contributes = tasks
                .iter()
                .any(|t| project.task(&t.id).map_or(true, |p| changed_since(p, t)));
            if contributes {
                contributors.push(session.clone());
            }
            let outcome = engine.merge(prior, &folded, &tasks);
            folded = outcome.merged;
            conflicts.extend(outcome.conflicts);
            duplicates.extend(outcome.duplicates);
        }

        let outcome = engine.merge(prior, &folded, prior);
        conflicts.extend(outcome.conflicts);
        duplicates.extend(outcome.duplicates);

        // A divergence already on record is not reported again. An open
        // record that this run settles automatically is resolved in place.
        let known = self.store.conflicts(&project.id, None)?;
        let mut settled = Vec::new();
        conflicts.retain(|detected| {
            let stored = known
                .iter()
                .find(|c| !c.is_resolved() && c.same_divergence(detected))
                .or_else(|| known.iter().find(|c| c.same_divergence(detected)));
            let Some(stored) = stored else {
                return true;
            };
            match (detected.auto_resolution, stored.is_resolved()) {
                (Some(auto), false) => {
                    settled.push((stored.id.clone(), auto));
                    false
                }
                (None, false) | (Some(_), true) => false,
                (None, true) => true,
            }
        });

        Ok(Plan {
            merged: outcome.merged,
            duplicates,
            conflicts,
            settled,
            gathered: sessions,
            contributors,
        })
    }

    async fn mint_for(&self, project: &Project, plan: &Plan) -> ConsolidateResult<Minted> {
        let mut canonical = plan.merged.clone();
        for duplicate in &plan.duplicates {
            let mut copy = duplicate.clone();
            copy.id = self
                .minter
                .task_id(
                    "duplicate",
                    json!({
                        "project_id": project.id.as_str(),
                        "duplicate_of": duplicate.id.as_str(),
                    }),
                )
                .await?;
            canonical.push(copy);
        }
        sort_tasks(&mut canonical);

        let mut conflict_ids = Vec::with_capacity(plan.conflicts.len());
        for conflict in &plan.conflicts {
            let id = self
                .minter
                .conflict_id(
                    conflict.kind.to_string().as_str(),
                    json!({
                        "project_id": project.id.as_str(),
                        "task_id": conflict.task_id.as_str(),
                    }),
                )
                .await?;
            conflict_ids.push(id);
        }

        let commit_id = self
            .minter
            .commit_id(
                "consolidation",
                json!({
                    "project_id": project.id.as_str(),
                    "version": project.version + 1,
                }),
            )
            .await?;

        Ok(Minted {
            canonical,
            conflict_ids,
            commit_id,
        })
    }

    fn finish(
        &self,
        project: Project,
        plan: Plan,
        minted: Minted,
        archived: Vec<SessionId>,
        attempt: u32,
        now: Timestamp,
    ) -> ConsolidateResult<ConsolidationResult> {
        let system = system_contributor()?;

        let mut conflicts = Vec::with_capacity(plan.conflicts.len());
        for (detected, id) in plan.conflicts.into_iter().zip(minted.conflict_ids) {
            let conflict = Conflict::from_detected(id, project.id.clone(), detected, now, &system);
            self.store.insert_conflict(conflict.clone())?;
            conflicts.push(conflict);
        }
        for (id, auto) in plan.settled {
            let Some(mut conflict) = self.store.conflict(&id)? else {
                continue;
            };
            if conflict.is_resolved() {
                continue;
            }
            conflict.resolve(auto.strategy, auto.chosen, system.clone(), now)?;
            self.store.update_conflict(conflict.clone())?;
            debug!(conflict = %id, strategy = %auto.strategy, "settled open conflict");
            conflicts.push(conflict);
        }

        let merge_parent = match plan.contributors.as_slice() {
            [only] => self.session_head(only)?,
            _ => None,
        };
        let commit_id = self.append_canonical(
            &project,
            minted.commit_id,
            CommitKind::Consolidation,
            merge_parent,
            &system,
            now,
        )?;
        let propagated = self.propagate(&plan.gathered, &project.canonical)?;

        info!(
            project = %project.id,
            version = project.version,
            tasks = project.canonical.len(),
            conflicts = conflicts.len(),
            sessions = plan.gathered.len(),
            attempt,
            propagated,
            "consolidated project"
        );

        Ok(ConsolidationResult {
            project_id: project.id,
            canonical: project.canonical,
            version: project.version,
            conflict_count: conflicts.len(),
            conflicts,
            sessions_touched: plan.gathered.into_iter().map(|s| s.id).collect(),
            attempts: attempt,
            commit_id,
            archived_sessions: archived,
            propagated,
            written: true,
        })
    }

    // ------------------------------------------------------------------
    // Shared write helpers
    // ------------------------------------------------------------------

    pub(crate) fn require_project(&self, id: &ProjectId) -> ConsolidateResult<Project> {
        self.store
            .project(id)?
            .ok_or_else(|| ConsolidateError::ProjectNotFound(id.clone()))
    }

    pub(crate) async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.settings.retry_backoff * attempt).await;
    }

    fn session_head(&self, session: &Session) -> ConsolidateResult<Option<CommitId>> {
        let Some(branch_id) = &session.branch_id else {
            return Ok(None);
        };
        Ok(self.log.branch(branch_id)?.and_then(|b| b.head))
    }

    /// Record the project's current canonical state on its canonical
    /// branch.
    pub(crate) fn append_canonical(
        &self,
        project: &Project,
        id: CommitId,
        kind: CommitKind,
        merge_parent: Option<CommitId>,
        author: &Contributor,
        at: Timestamp,
    ) -> ConsolidateResult<Option<CommitId>> {
        let Some(branch_id) = &project.canonical_branch else {
            warn!(project = %project.id, "project has no canonical branch; commit skipped");
            return Ok(None);
        };

        let mut attempt = 1;
        loop {
            let parent = self
                .log
                .branch(branch_id)?
                .ok_or_else(|| LogError::BranchNotFound(branch_id.clone()))?
                .head;
            let new = NewCommit {
                id: id.clone(),
                branch_id: branch_id.clone(),
                kind,
                snapshot: project.canonical.clone(),
                merge_parent: merge_parent.clone().filter(|m| Some(m) != parent.as_ref()),
                parent,
                author: author.clone(),
                at,
            };
            match self.log.commit(new) {
                Ok(commit) => return Ok(Some(commit.id)),
                Err(LogError::StaleHead { .. }) if attempt < COMMIT_ATTEMPTS => {
                    debug!(
                        project = %project.id,
                        attempt,
                        "canonical branch moved; re-reading head"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Give every session the live canonical tasks it does not hold yet.
    pub(crate) fn propagate(
        &self,
        sessions: &[Session],
        canonical: &[Task],
    ) -> ConsolidateResult<usize> {
        let live: Vec<Task> = canonical
            .iter()
            .filter(|t| !t.is_deleted())
            .cloned()
            .collect();
        let mut added = 0;
        for session in sessions {
            added += self.store.add_missing_session_tasks(&session.id, &live)?;
        }
        Ok(added)
    }
}

pub(crate) fn system_contributor() -> ConsolidateResult<Contributor> {
    Ok(Contributor::new(SYSTEM_CONTRIBUTOR)?)
}

pub(crate) fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
}

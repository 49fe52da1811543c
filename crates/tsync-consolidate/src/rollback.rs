use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use tsync_log::CommitKind;
use tsync_store::CasOutcome;
use tsync_types::{CommitId, Contributor, ProjectId, Task, TaskId, Timestamp};

use crate::consolidator::{sort_tasks, ProjectConsolidator};
use crate::error::{ConsolidateError, ConsolidateResult};

/// What a rollback wrote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub canonical: Vec<Task>,
    pub version: u64,
    pub commit_id: Option<CommitId>,
    /// The commit whose snapshot was restored.
    pub restored: CommitId,
    /// Tasks rewritten to their snapshot value.
    pub revised: Vec<TaskId>,
    /// Tasks absent from the snapshot, now tombstoned.
    pub tombstoned: Vec<TaskId>,
}

impl ProjectConsolidator {
    /// Restore the snapshot of `commit_id` as the canonical state.
    ///
    /// History is never rewritten: restored values are recorded as new edits
    /// by `by`, so they are causally later than anything sessions hold, and
    /// tasks created after the snapshot are tombstoned rather than dropped.
    pub async fn rollback(
        &self,
        project_id: &ProjectId,
        commit_id: &CommitId,
        by: Contributor,
    ) -> ConsolidateResult<RollbackOutcome> {
        self.require_project(project_id)?;
        let target = self
            .log
            .get_commit(commit_id)?
            .ok_or_else(|| ConsolidateError::CommitNotFound(commit_id.clone()))?;
        if &target.project_id != project_id {
            return Err(ConsolidateError::ForeignCommit {
                commit: commit_id.clone(),
                project: project_id.clone(),
            });
        }
        target.verify()?;

        let attempts = self.settings.max_retries + 1;
        let mut minted = None;
        for attempt in 1..=attempts {
            let project = self.require_project(project_id)?;
            let now = self.time.now();
            let restored = restore(&project.canonical, &target.snapshot, &by, now);

            let id = match minted.take() {
                Some(id) => id,
                None => {
                    self.minter
                        .commit_id(
                            "rollback",
                            json!({
                                "project_id": project_id.as_str(),
                                "restored": commit_id.as_str(),
                            }),
                        )
                        .await?
                }
            };

            match self
                .store
                .cas_canonical(project_id, project.version, restored.tasks, now)?
            {
                CasOutcome::Applied(updated) => {
                    let commit = self.append_canonical(
                        &updated,
                        id,
                        CommitKind::Rollback,
                        Some(target.id.clone()),
                        &by,
                        now,
                    )?;
                    info!(
                        project = %project_id,
                        restored = %target.id,
                        version = updated.version,
                        revised = restored.revised.len(),
                        tombstoned = restored.tombstoned.len(),
                        "rolled back canonical state"
                    );
                    return Ok(RollbackOutcome {
                        canonical: updated.canonical,
                        version: updated.version,
                        commit_id: commit,
                        restored: target.id,
                        revised: restored.revised,
                        tombstoned: restored.tombstoned,
                    });
                }
                CasOutcome::VersionMismatch { expected, actual } => {
                    warn!(project = %project_id, attempt, expected, actual, "rollback lost a race");
                    minted = Some(id);
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
}

struct Restored {
    tasks: Vec<Task>,
    revised: Vec<TaskId>,
    tombstoned: Vec<TaskId>,
}

fn restore(canonical: &[Task], snapshot: &[Task], by: &Contributor, at: Timestamp) -> Restored {
    let mut tasks = canonical.to_vec();
    let mut revised = Vec::new();

    for past in snapshot {
        match tasks.iter_mut().find(|t| t.id == past.id) {
            Some(task) if task.same_value(past) => {}
            Some(task) => {
                task.revise_from(past, by, at);
                revised.push(task.id.clone());
            }
            None => {
                tasks.push(past.clone());
                revised.push(past.id.clone());
            }
        }
    }

    let mut tombstoned = Vec::new();
    for task in &mut tasks {
        if !task.is_deleted() && !snapshot.iter().any(|s| s.id == task.id) {
            task.soft_delete(by, at);
            tombstoned.push(task.id.clone());
        }
    }

    sort_tasks(&mut tasks);
    Restored {
        tasks,
        revised,
        tombstoned,
    }
}

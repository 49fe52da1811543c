use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use tsync_consolidate::{
    ConsolidationResult, ProjectConsolidator, ResolutionOutcome, RollbackOutcome,
};
use tsync_log::{Commit, CommitKind, CommitLog, InMemoryCommitLog, LogError, NewCommit};
use tsync_merge::{Conflict, MergeStrategy};
use tsync_mint::{IdMinter, Minter};
use tsync_session::{RegisterSession, Registration, SessionError, SessionRegistry};
use tsync_store::{InMemorySyncStore, SyncStore};
use tsync_topics::{TopicClassifier, TopicMatch};
use tsync_types::{
    ClockOrdering, CommitId, ConflictId, Contributor, Project, ProjectId, Session, SessionId,
    SystemTimeSource, Task, TaskId, TaskStatus, TimeSource, Timestamp, TopicId,
};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Attempts at appending a submission commit when the session branch moved.
const COMMIT_ATTEMPTS: u32 = 3;

/// A task the client has not been given an id for yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub content: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

impl TaskDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: TaskStatus::Pending,
            topics: BTreeSet::new(),
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// One entry of a submission: a known task or a draft that needs an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskSubmission {
    Task(Task),
    Draft(TaskDraft),
}

impl From<Task> for TaskSubmission {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<TaskDraft> for TaskSubmission {
    fn from(draft: TaskDraft) -> Self {
        Self::Draft(draft)
    }
}

/// What a submission recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub session_id: SessionId,
    /// The submitted tasks as recorded, in submission order.
    pub accepted: Vec<Task>,
    /// Ids minted for drafts.
    pub minted: Vec<TaskId>,
    /// Tasks whose clock was advanced on the submitter's behalf.
    pub advanced: Vec<TaskId>,
    /// Submission commit on the session's branch.
    pub commit_id: Option<CommitId>,
}

/// Canonical state of a project as served to readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalState {
    pub project_id: ProjectId,
    /// Every canonical task, tombstones included.
    pub tasks: Vec<Task>,
    pub version: u64,
    pub last_consolidated_at: Option<Timestamp>,
}

impl From<Project> for CanonicalState {
    fn from(project: Project) -> Self {
        Self {
            project_id: project.id,
            tasks: project.canonical,
            version: project.version,
            last_consolidated_at: project.last_consolidated_at,
        }
    }
}

/// Entry point for embedding the synchronization core.
///
/// Handlers are stateless: everything lives behind the store, log, and
/// minter handed to [`SyncCore::new`], so any number of cores may share
/// them.
pub struct SyncCore {
    store: Arc<dyn SyncStore>,
    log: Arc<dyn CommitLog>,
    minter: Minter,
    time: Arc<dyn TimeSource>,
    sessions: Arc<SessionRegistry>,
    consolidator: ProjectConsolidator,
    classifier: TopicClassifier,
    config: SyncConfig,
}

impl SyncCore {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn SyncStore>,
        log: Arc<dyn CommitLog>,
        minter: Arc<dyn IdMinter>,
        time: Arc<dyn TimeSource>,
    ) -> SyncResult<Self> {
        let classifier = TopicClassifier::new(config.topic_table()?);
        let minter = Minter::new(minter);
        let sessions = Arc::new(SessionRegistry::new(
            store.clone(),
            log.clone(),
            minter.clone(),
            time.clone(),
            config.session_settings(),
        ));
        let consolidator = ProjectConsolidator::new(
            store.clone(),
            log.clone(),
            minter.clone(),
            time.clone(),
            sessions.clone(),
            config.consolidator_settings(),
        );
        Ok(Self {
            store,
            log,
            minter,
            time,
            sessions,
            consolidator,
            classifier,
            config,
        })
    }

    /// A core over in-memory storage and the system clock.
    pub fn in_memory(config: SyncConfig, minter: Arc<dyn IdMinter>) -> SyncResult<Self> {
        Self::new(
            config,
            Arc::new(InMemorySyncStore::new()),
            Arc::new(InMemoryCommitLog::new()),
            minter,
            Arc::new(SystemTimeSource),
        )
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ---- Sessions ----

    /// Register a session, or refresh it when the id is already known.
    pub async fn register_session(&self, request: RegisterSession) -> SyncResult<Registration> {
        Ok(self.sessions.register(request).await?)
    }

    pub fn end_session(&self, id: &SessionId) -> SyncResult<Session> {
        Ok(self.sessions.end(id)?)
    }

    pub fn heartbeat(&self, id: &SessionId) -> SyncResult<Session> {
        Ok(self.sessions.heartbeat(id)?)
    }

    // ---- Submissions ----

    /// Record tasks against a session without merging.
    ///
    /// Drafts get minted ids. A task whose value differs from the copy the
    /// session (or, failing that, the canonical state) holds but whose clock
    /// does not already follow that copy is advanced for the submitter. All
    /// identifiers are minted before anything is written.
    pub async fn submit_tasks(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        tasks: Vec<TaskSubmission>,
    ) -> SyncResult<SubmitOutcome> {
        let session = self.sessions.heartbeat(session_id)?;
        if &session.project_id != project_id {
            return Err(SessionError::ProjectMismatch {
                session: session.id,
                expected: session.project_id,
                found: project_id.clone(),
            }
            .into());
        }
        let project = self.require_project(project_id)?;
        check_submission(&tasks, project_id)?;

        let now = self.time.now();
        let held: HashMap<TaskId, Task> = self
            .store
            .session_tasks(session_id)?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        check_ownership(&tasks, &session, &held, &project)?;

        let mut accepted = Vec::with_capacity(tasks.len());
        let mut minted = Vec::new();
        let mut advanced = Vec::new();
        for submission in tasks {
            let mut task = match submission {
                TaskSubmission::Task(task) => task,
                TaskSubmission::Draft(draft) => {
                    let task = self.materialize(&session, draft, now).await?;
                    minted.push(task.id.clone());
                    task
                }
            };
            let previous = held.get(&task.id).or_else(|| project.task(&task.id));
            if let Some(previous) = previous {
                if !task.same_value(previous)
                    && task.clock.compare(&previous.clock) != ClockOrdering::After
                {
                    task.clock.merge(&previous.clock);
                    task.touch(&session.contributor, now);
                    advanced.push(task.id.clone());
                }
            }
            if self.config.auto_classify {
                self.classifier.assign(&mut task);
            }
            accepted.push(task);
        }

        let mut recorded: Vec<Task> = held.into_values().collect();
        recorded.retain(|kept| !accepted.iter().any(|t| t.id == kept.id));
        recorded.extend(accepted.iter().cloned());
        recorded.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let commit_id = match &session.branch_id {
            Some(_) => Some(
                self.minter
                    .commit_id(
                        "submission",
                        json!({
                            "project_id": project_id.as_str(),
                            "session_id": session_id.as_str(),
                        }),
                    )
                    .await?,
            ),
            None => None,
        };

        self.store.put_session_tasks(session_id, recorded.clone())?;
        let commit_id = match commit_id {
            Some(id) => Some(self.record_submission(&session, id, recorded, now)?),
            None => None,
        };

        info!(
            session = %session_id,
            project = %project_id,
            tasks = accepted.len(),
            minted = minted.len(),
            advanced = advanced.len(),
            "recorded submission"
        );
        Ok(SubmitOutcome {
            session_id: session_id.clone(),
            accepted,
            minted,
            advanced,
            commit_id,
        })
    }

    async fn materialize(
        &self,
        session: &Session,
        draft: TaskDraft,
        now: Timestamp,
    ) -> SyncResult<Task> {
        let id = self
            .minter
            .task_id(
                "submit",
                json!({
                    "project_id": session.project_id.as_str(),
                    "session_id": session.id.as_str(),
                }),
            )
            .await?;
        let mut task = Task::new(
            id,
            draft.content,
            session.contributor.clone(),
            session.id.clone(),
            session.project_id.clone(),
            now,
        )?;
        task.status = draft.status;
        task.add_topics(draft.topics);
        Ok(task)
    }

    fn record_submission(
        &self,
        session: &Session,
        id: CommitId,
        snapshot: Vec<Task>,
        at: Timestamp,
    ) -> SyncResult<CommitId> {
        let branch_id = session
            .branch_id
            .clone()
            .ok_or_else(|| SyncError::Validation(format!("session {} has no branch", session.id)))?;
        let mut attempt = 1;
        loop {
            let parent = self
                .log
                .branch(&branch_id)?
                .ok_or_else(|| LogError::BranchNotFound(branch_id.clone()))?
                .head;
            let new = NewCommit {
                id: id.clone(),
                branch_id: branch_id.clone(),
                kind: CommitKind::Submission,
                snapshot: snapshot.clone(),
                parent,
                merge_parent: None,
                author: session.contributor.clone(),
                at,
            };
            match self.log.commit(new) {
                Ok(commit) => return Ok(commit.id),
                Err(LogError::StaleHead { .. }) if attempt < COMMIT_ATTEMPTS => {
                    debug!(session = %session.id, attempt, "session branch moved; re-reading head");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ---- Consolidation and reads ----

    /// Consolidate a project with `strategy`, or the configured default.
    pub async fn consolidate(
        &self,
        project_id: &ProjectId,
        strategy: Option<MergeStrategy>,
    ) -> SyncResult<ConsolidationResult> {
        let strategy = strategy.unwrap_or(self.config.default_strategy);
        Ok(self.consolidator.consolidate(project_id, strategy).await?)
    }

    pub fn canonical_state(&self, project_id: &ProjectId) -> SyncResult<CanonicalState> {
        Ok(self.require_project(project_id)?.into())
    }

    /// The canonical state, refused while any conflict is unresolved.
    pub fn clean_state(&self, project_id: &ProjectId) -> SyncResult<CanonicalState> {
        let project = self.require_project(project_id)?;
        let pending = self.store.conflicts(project_id, Some(false))?;
        if let Some(first) = pending.first() {
            return Err(SyncError::UnresolvedConflict {
                count: pending.len(),
                first: first.task_id.clone(),
            });
        }
        Ok(project.into())
    }

    pub fn list_conflicts(
        &self,
        project_id: &ProjectId,
        resolved: Option<bool>,
    ) -> SyncResult<Vec<Conflict>> {
        self.require_project(project_id)?;
        Ok(self.store.conflicts(project_id, resolved)?)
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: &ConflictId,
        strategy: MergeStrategy,
        resolver: Contributor,
    ) -> SyncResult<ResolutionOutcome> {
        Ok(self.consolidator.resolve(conflict_id, strategy, resolver).await?)
    }

    pub fn dispute_conflict(
        &self,
        conflict_id: &ConflictId,
        by: Contributor,
        reason: &str,
    ) -> SyncResult<Conflict> {
        Ok(self.consolidator.dispute(conflict_id, by, reason)?)
    }

    pub fn detect_topics(&self, content: &str) -> Vec<TopicMatch> {
        self.classifier.detect(content)
    }

    // ---- History ----

    /// Commits of a project, newest first.
    pub fn history(&self, project_id: &ProjectId, limit: usize) -> SyncResult<Vec<Commit>> {
        self.require_project(project_id)?;
        Ok(self.log.history(project_id, limit)?)
    }

    pub async fn rollback(
        &self,
        project_id: &ProjectId,
        commit_id: &CommitId,
        by: Contributor,
    ) -> SyncResult<RollbackOutcome> {
        Ok(self.consolidator.rollback(project_id, commit_id, by).await?)
    }

    fn require_project(&self, id: &ProjectId) -> SyncResult<Project> {
        self.store.project(id)?.ok_or_else(|| SyncError::NotFound {
            kind: "project",
            id: id.to_string(),
        })
    }
}

/// Field checks that need no storage access.
fn check_submission(tasks: &[TaskSubmission], project_id: &ProjectId) -> SyncResult<()> {
    let mut seen = HashSet::new();
    for submission in tasks {
        match submission {
            TaskSubmission::Task(task) => {
                task.validate()?;
                if &task.project_id != project_id {
                    return Err(SyncError::Validation(format!(
                        "task {} belongs to project {}, not {}",
                        task.id, task.project_id, project_id
                    )));
                }
                if !seen.insert(&task.id) {
                    return Err(SyncError::Validation(format!(
                        "task {} submitted twice",
                        task.id
                    )));
                }
            }
            TaskSubmission::Draft(draft) => {
                if draft.content.trim().is_empty() {
                    return Err(SyncError::Validation("task content must not be empty".into()));
                }
            }
        }
    }
    Ok(())
}

/// A new task must name the submitting session as its owner; a known task
/// keeps the owner it was first recorded with.
fn check_ownership(
    tasks: &[TaskSubmission],
    session: &Session,
    held: &HashMap<TaskId, Task>,
    project: &Project,
) -> SyncResult<()> {
    for submission in tasks {
        let TaskSubmission::Task(task) = submission else {
            continue;
        };
        let owner = held
            .get(&task.id)
            .or_else(|| project.task(&task.id))
            .map_or(&session.id, |previous| &previous.session_id);
        if &task.session_id != owner {
            return Err(SyncError::Validation(format!(
                "task {} is owned by session {}, not {}",
                task.id, owner, task.session_id
            )));
        }
    }
    Ok(())
}

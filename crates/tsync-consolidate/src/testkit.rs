//! Shared fixtures for consolidator tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tsync_log::{Branch, Commit, CommitKind, CommitLog, InMemoryCommitLog, NewCommit};
use tsync_merge::{Conflict, MergeStrategy};
use tsync_mint::{InMemoryMinter, Minter};
use tsync_session::{RegisterSession, SessionRegistry, SessionSettings};
use tsync_store::{CasOutcome, InMemorySyncStore, StoreResult, SyncStore};
use tsync_types::{
    BranchId, CommitId, ConflictId, Contributor, ManualTimeSource, Project, ProjectId, Session,
    SessionId, Task, TaskId, TimeSource, Timestamp,
};

use crate::consolidator::{ConsolidationResult, ConsolidatorSettings, ProjectConsolidator};
use crate::error::ConsolidateResult;

pub(crate) const PROJECT_PATH: &str = "/work/app";

pub(crate) struct Fixture {
    pub store: Arc<dyn SyncStore>,
    pub log: Arc<InMemoryCommitLog>,
    pub minter: Arc<InMemoryMinter>,
    pub time: Arc<ManualTimeSource>,
    pub sessions: Arc<SessionRegistry>,
    pub consolidator: ProjectConsolidator,
    pub project: ProjectId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemorySyncStore::new()))
    }

    pub fn with_store(store: Arc<dyn SyncStore>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let log = Arc::new(InMemoryCommitLog::new());
        let minter = Arc::new(InMemoryMinter::new());
        let time = Arc::new(ManualTimeSource::new(Timestamp::from_millis(1_000)));
        let settings = SessionSettings {
            heartbeat_timeout: Duration::from_secs(60),
            archive_grace: Duration::from_secs(600),
        };
        let sessions = Arc::new(SessionRegistry::new(
            store.clone(),
            log.clone(),
            Minter::new(minter.clone()),
            time.clone(),
            settings,
        ));
        let consolidator = ProjectConsolidator::new(
            store.clone(),
            log.clone(),
            Minter::new(minter.clone()),
            time.clone(),
            sessions.clone(),
            ConsolidatorSettings {
                max_retries: 2,
                retry_backoff: Duration::from_millis(1),
                ..ConsolidatorSettings::default()
            },
        );

        let project = ProjectId::new("P1").unwrap();
        let branch = BranchId::new("B-canonical").unwrap();
        store
            .insert_project(Project::new(project.clone(), PROJECT_PATH.into(), time.now()))
            .unwrap();
        log.create_branch(Branch::canonical(branch.clone(), project.clone(), time.now()).unwrap())
            .unwrap();
        store.set_canonical_branch(&project, branch).unwrap();

        Self {
            store,
            log,
            minter,
            time,
            sessions,
            consolidator,
            project,
        }
    }

    pub async fn session(&self, contributor: &str) -> Session {
        self.sessions
            .register(RegisterSession {
                session_id: None,
                project_path: PROJECT_PATH.into(),
                contributor: Contributor::new(contributor).unwrap(),
                branch_label: None,
            })
            .await
            .unwrap()
            .session
    }

    pub fn task(&self, session: &Session, id: &str, content: &str, at: u64) -> Task {
        Task::new(
            TaskId::new(id).unwrap(),
            content,
            session.contributor.clone(),
            session.id.clone(),
            self.project.clone(),
            Timestamp::from_millis(at),
        )
        .unwrap()
    }

    pub fn submit(&self, session: &Session, tasks: Vec<Task>) {
        self.store.put_session_tasks(&session.id, tasks).unwrap();
    }

    /// Append a submission commit to the session's branch.
    pub fn record_submission(&self, session: &Session, id: &str, tasks: Vec<Task>) -> CommitId {
        let branch = session.branch_id.clone().unwrap();
        let parent = self.log.branch(&branch).unwrap().unwrap().head;
        self.log
            .commit(NewCommit {
                id: CommitId::new(id).unwrap(),
                branch_id: branch,
                kind: CommitKind::Submission,
                snapshot: tasks,
                parent,
                merge_parent: None,
                author: session.contributor.clone(),
                at: self.time.now(),
            })
            .unwrap()
            .id
    }

    pub async fn consolidate(&self, strategy: MergeStrategy) -> ConsolidationResult {
        self.try_consolidate(strategy).await.unwrap()
    }

    pub async fn try_consolidate(
        &self,
        strategy: MergeStrategy,
    ) -> ConsolidateResult<ConsolidationResult> {
        self.consolidator.consolidate(&self.project, strategy).await
    }

    /// Seed `T1 = "draft"`, then have two sessions rewrite it concurrently
    /// ("mine" then "theirs") and consolidate with `strategy`.
    pub async fn diverge(
        &self,
        strategy: MergeStrategy,
    ) -> (Session, Session, ConsolidationResult) {
        let (a, b) = (self.session("claude").await, self.session("cursor").await);
        self.submit(&a, vec![self.task(&a, "T1", "draft", 10)]);
        self.consolidate(strategy).await;

        let base = self.canonical()[0].clone();
        let mut local = base.clone();
        local.set_content("mine", &a.contributor, Timestamp::from_millis(20)).unwrap();
        let mut remote = base;
        remote.set_content("theirs", &b.contributor, Timestamp::from_millis(30)).unwrap();
        self.submit(&a, vec![local]);
        self.submit(&b, vec![remote]);

        let result = self.consolidate(strategy).await;
        (a, b, result)
    }

    /// A commit the caller expects to exist.
    pub fn commit(&self, id: &Option<CommitId>) -> Commit {
        self.log.get_commit(id.as_ref().unwrap()).unwrap().unwrap()
    }

    pub fn canonical(&self) -> Vec<Task> {
        self.store.project(&self.project).unwrap().unwrap().canonical
    }
}

/// Store that lets a rival writer win the next `n` canonical writes.
pub(crate) struct ContendedStore {
    inner: InMemorySyncStore,
    remaining: AtomicU32,
    injected: AtomicU32,
}

impl ContendedStore {
    pub fn new(n: u32) -> Self {
        Self {
            inner: InMemorySyncStore::new(),
            remaining: AtomicU32::new(n),
            injected: AtomicU32::new(0),
        }
    }

    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }
}

impl SyncStore for ContendedStore {
    fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        self.inner.project(id)
    }

    fn project_by_path(&self, path: &str) -> StoreResult<Option<Project>> {
        self.inner.project_by_path(path)
    }

    fn insert_project(&self, project: Project) -> StoreResult<(Project, bool)> {
        self.inner.insert_project(project)
    }

    fn set_canonical_branch(&self, id: &ProjectId, branch: BranchId) -> StoreResult<Project> {
        self.inner.set_canonical_branch(id, branch)
    }

    fn cas_canonical(
        &self,
        id: &ProjectId,
        expected_version: u64,
        canonical: Vec<Task>,
        at: Timestamp,
    ) -> StoreResult<CasOutcome> {
        let rival = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rival {
            if let Some(current) = self.inner.project(id)? {
                self.inner
                    .cas_canonical(id, current.version, current.canonical, at)?;
                self.injected.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.inner.cas_canonical(id, expected_version, canonical, at)
    }

    fn session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        self.inner.session(id)
    }

    fn put_session(&self, session: Session) -> StoreResult<()> {
        self.inner.put_session(session)
    }

    fn sessions(&self, project: &ProjectId) -> StoreResult<Vec<Session>> {
        self.inner.sessions(project)
    }

    fn session_tasks(&self, id: &SessionId) -> StoreResult<Vec<Task>> {
        self.inner.session_tasks(id)
    }

    fn put_session_tasks(&self, id: &SessionId, tasks: Vec<Task>) -> StoreResult<()> {
        self.inner.put_session_tasks(id, tasks)
    }

    fn add_missing_session_tasks(&self, id: &SessionId, tasks: &[Task]) -> StoreResult<usize> {
        self.inner.add_missing_session_tasks(id, tasks)
    }

    fn insert_conflict(&self, conflict: Conflict) -> StoreResult<()> {
        self.inner.insert_conflict(conflict)
    }

    fn conflict(&self, id: &ConflictId) -> StoreResult<Option<Conflict>> {
        self.inner.conflict(id)
    }

    fn update_conflict(&self, conflict: Conflict) -> StoreResult<()> {
        self.inner.update_conflict(conflict)
    }

    fn conflicts(&self, project: &ProjectId, resolved: Option<bool>) -> StoreResult<Vec<Conflict>> {
        self.inner.conflicts(project, resolved)
    }
}

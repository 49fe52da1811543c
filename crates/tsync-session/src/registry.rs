use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};
use tsync_log::{Branch, CommitLog};
use tsync_mint::Minter;
use tsync_store::SyncStore;
use tsync_types::{
    Contributor, Project, ProjectId, Session, SessionId, SessionStatus, TimeSource, Timestamp,
};

use crate::error::{SessionError, SessionResult};

/// Timing knobs for session expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// A session whose last heartbeat is older than this is stale.
    pub heartbeat_timeout: Duration,
    /// Inactive sessions older than this are archived.
    pub archive_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(300),
            archive_grace: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Input to [`SessionRegistry::register`].
#[derive(Clone, Debug)]
pub struct RegisterSession {
    /// Previously minted session id, or `None` to mint a new one.
    pub session_id: Option<SessionId>,
    pub project_path: String,
    pub contributor: Contributor,
    /// Free-form branch metadata from the client.
    pub branch_label: Option<String>,
}

/// What registration produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub session: Session,
    pub project: Project,
    /// `false` when an existing session was refreshed.
    pub created: bool,
}

pub struct SessionRegistry {
    store: Arc<dyn SyncStore>,
    log: Arc<dyn CommitLog>,
    minter: Minter,
    time: Arc<dyn TimeSource>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SyncStore>,
        log: Arc<dyn CommitLog>,
        minter: Minter,
        time: Arc<dyn TimeSource>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            log,
            minter,
            time,
            settings,
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a session, or refresh it if it already exists.
    ///
    /// The project for `project_path` is created on first use. A known
    /// session must still be active and must stay on its project.
    pub async fn register(&self, request: RegisterSession) -> SessionResult<Registration> {
        let path = Project::normalize_path(&request.project_path)?;

        if let Some(id) = &request.session_id {
            if let Some(existing) = self.store.session(id)? {
                return self.refresh(existing, &path);
            }
        }

        let project = self.project_for_path(&path).await?;
        let now = self.time.now();

        let id = match request.session_id {
            Some(id) => id,
            None => {
                self.minter
                    .session_id(
                        "register",
                        json!({
                            "project_id": project.id.as_str(),
                            "contributor": request.contributor.as_str(),
                        }),
                    )
                    .await?
            }
        };
        let branch_id = self
            .minter
            .branch_id(
                "session",
                json!({
                    "project_id": project.id.as_str(),
                    "session_id": id.as_str(),
                    "platform": request.contributor.as_str(),
                }),
            )
            .await?;
        self.log.create_branch(Branch::for_session(
            branch_id.clone(),
            project.id.clone(),
            request.contributor.clone(),
            id.clone(),
            now,
        ))?;

        let mut session = Session::new(id, project.id.clone(), request.contributor, now);
        session.branch_label = request.branch_label;
        session.branch_id = Some(branch_id);
        self.store.put_session(session.clone())?;

        info!(
            session = %session.id,
            project = %project.id,
            contributor = %session.contributor,
            "registered session"
        );
        Ok(Registration {
            session,
            project,
            created: true,
        })
    }

    fn refresh(&self, mut session: Session, path: &str) -> SessionResult<Registration> {
        let project = self
            .store
            .project(&session.project_id)?
            .ok_or_else(|| SessionError::ProjectNotFound(session.project_id.clone()))?;
        if project.path != path {
            let found = self
                .store
                .project_by_path(path)?
                .map(|p| p.id)
                .unwrap_or_else(|| session.project_id.clone());
            return Err(SessionError::ProjectMismatch {
                session: session.id,
                expected: project.id,
                found,
            });
        }
        self.touch(&mut session)?;
        debug!(session = %session.id, "refreshed existing session");
        Ok(Registration {
            session,
            project,
            created: false,
        })
    }

    async fn project_for_path(&self, path: &str) -> SessionResult<Project> {
        let project = match self.store.project_by_path(path)? {
            Some(project) => project,
            None => {
                let id = self
                    .minter
                    .project_id("register", json!({ "path": path }))
                    .await?;
                let (project, created) = self
                    .store
                    .insert_project(Project::new(id, path.to_string(), self.time.now()))?;
                if created {
                    info!(project = %project.id, path = %project.path, "created project");
                }
                project
            }
        };
        self.ensure_canonical_branch(project).await
    }

    /// A project whose creation was interrupted before its canonical branch
    /// was recorded gets the branch on the next registration.
    async fn ensure_canonical_branch(&self, project: Project) -> SessionResult<Project> {
        if project.canonical_branch.is_some() {
            return Ok(project);
        }
        let branch_id = self
            .minter
            .branch_id("canonical", json!({ "project_id": project.id.as_str() }))
            .await?;
        self.log.create_branch(Branch::canonical(
            branch_id.clone(),
            project.id.clone(),
            self.time.now(),
        )?)?;
        Ok(self.store.set_canonical_branch(&project.id, branch_id)?)
    }

    // ------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------

    /// Load a session or fail with `NotFound`.
    pub fn get(&self, id: &SessionId) -> SessionResult<Session> {
        self.store
            .session(id)?
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Refresh a session's heartbeat.
    pub fn heartbeat(&self, id: &SessionId) -> SessionResult<Session> {
        let mut session = self.get(id)?;
        self.touch(&mut session)?;
        Ok(session)
    }

    /// Load a session that is active and not stale, flipping it to
    /// `inactive` if its heartbeat lapsed. Does not refresh the heartbeat.
    pub fn require_active(&self, id: &SessionId) -> SessionResult<Session> {
        let mut session = self.get(id)?;
        self.check_live(&mut session)?;
        Ok(session)
    }

    fn touch(&self, session: &mut Session) -> SessionResult<()> {
        self.check_live(session)?;
        session.heartbeat(self.time.now())?;
        self.store.put_session(session.clone())?;
        Ok(())
    }

    fn check_live(&self, session: &mut Session) -> SessionResult<()> {
        if !session.is_active() {
            return Err(SessionError::NotActive {
                id: session.id.clone(),
                status: session.status,
            });
        }
        if session.is_stale(self.time.now(), self.settings.heartbeat_timeout) {
            session.expire(self.settings.heartbeat_timeout)?;
            self.store.put_session(session.clone())?;
            debug!(session = %session.id, "session heartbeat lapsed");
            return Err(SessionError::Expired(session.id.clone()));
        }
        Ok(())
    }

    /// Active, non-stale sessions of a project. Stale sessions found along
    /// the way are persisted as inactive.
    pub fn list_active(&self, project: &ProjectId) -> SessionResult<Vec<Session>> {
        let now = self.time.now();
        let timeout = self.settings.heartbeat_timeout;
        let mut active = Vec::new();
        for mut session in self.store.sessions(project)? {
            if !session.is_active() {
                continue;
            }
            if session.is_stale(now, timeout) {
                session.expire(timeout)?;
                self.store.put_session(session.clone())?;
                debug!(session = %session.id, project = %project, "expired stale session");
                continue;
            }
            active.push(session);
        }
        Ok(active)
    }

    /// End a session. Ending an inactive session is a no-op.
    pub fn end(&self, id: &SessionId) -> SessionResult<Session> {
        let mut session = self.get(id)?;
        if session.is_stale(self.time.now(), self.settings.heartbeat_timeout) {
            session.expire(self.settings.heartbeat_timeout)?;
        } else {
            session.end(self.time.now())?;
        }
        self.store.put_session(session.clone())?;
        info!(session = %session.id, "ended session");
        Ok(session)
    }

    /// Archive inactive sessions whose grace period has passed.
    pub fn archive_expired(&self, project: &ProjectId) -> SessionResult<Vec<SessionId>> {
        let now: Timestamp = self.time.now();
        let mut archived = Vec::new();
        for mut session in self.store.sessions(project)? {
            if session.status == SessionStatus::Active
                && session.is_stale(now, self.settings.heartbeat_timeout)
            {
                session.expire(self.settings.heartbeat_timeout)?;
                self.store.put_session(session.clone())?;
            }
            if session.is_archivable(now, self.settings.archive_grace) {
                session.archive()?;
                self.store.put_session(session.clone())?;
                archived.push(session.id);
            }
        }
        if !archived.is_empty() {
            info!(project = %project, archived = archived.len(), "archived sessions");
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsync_log::InMemoryCommitLog;
    use tsync_mint::InMemoryMinter;
    use tsync_store::InMemorySyncStore;
    use tsync_types::ManualTimeSource;

    struct Fixture {
        registry: SessionRegistry,
        time: Arc<ManualTimeSource>,
        log: Arc<InMemoryCommitLog>,
        minter: Arc<InMemoryMinter>,
    }

    fn fixture() -> Fixture {
        let time = Arc::new(ManualTimeSource::new(Timestamp::from_millis(1_000)));
        let log = Arc::new(InMemoryCommitLog::new());
        let minter = Arc::new(InMemoryMinter::new());
        let registry = SessionRegistry::new(
            Arc::new(InMemorySyncStore::new()),
            log.clone(),
            Minter::new(minter.clone()),
            time.clone(),
            SessionSettings {
                heartbeat_timeout: Duration::from_secs(60),
                archive_grace: Duration::from_secs(600),
            },
        );
        Fixture {
            registry,
            time,
            log,
            minter,
        }
    }

    fn request(session: Option<&SessionId>, path: &str) -> RegisterSession {
        RegisterSession {
            session_id: session.cloned(),
            project_path: path.to_string(),
            contributor: Contributor::new("claude").unwrap(),
            branch_label: Some("main".into()),
        }
    }

    #[tokio::test]
    async fn first_registration_creates_project_and_branches() {
        let f = fixture();
        let reg = f
            .registry
            .register(request(None, "/work/app/"))
            .await
            .unwrap();
        assert!(reg.created);
        assert_eq!(reg.project.path, "/work/app");
        assert!(reg.project.canonical_branch.is_some());
        assert!(reg.session.is_active());
        assert!(reg.session.id.as_str().starts_with("session-"));
        assert_eq!(reg.session.branch_label.as_deref(), Some("main"));

        let branches = f.log.branches(&reg.project.id).unwrap();
        assert_eq!(branches.len(), 2);
        assert!(branches.iter().any(|b| b.is_canonical()));
        // project, canonical branch, session, session branch
        assert_eq!(f.minter.minted(), 4);
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let f = fixture();
        let first = f.registry.register(request(None, "/work")).await.unwrap();
        f.time.advance(Duration::from_secs(30));
        let again = f
            .registry
            .register(request(Some(&first.session.id), "/work"))
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.session.id, first.session.id);
        assert_eq!(again.session.last_heartbeat, Timestamp::from_millis(31_000));
        assert_eq!(f.minter.minted(), 4);
    }

    #[tokio::test]
    async fn second_session_reuses_project() {
        let f = fixture();
        let a = f.registry.register(request(None, "/work")).await.unwrap();
        let b = f.registry.register(request(None, "/work/")).await.unwrap();
        assert_eq!(a.project.id, b.project.id);
        assert_ne!(a.session.id, b.session.id);
    }

    #[tokio::test]
    async fn sessions_cannot_change_project() {
        let f = fixture();
        let a = f.registry.register(request(None, "/work")).await.unwrap();
        let err = f
            .registry
            .register(request(Some(&a.session.id), "/elsewhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ProjectMismatch { .. }));
    }

    #[tokio::test]
    async fn ended_session_cannot_reregister() {
        let f = fixture();
        let a = f.registry.register(request(None, "/work")).await.unwrap();
        f.registry.end(&a.session.id).unwrap();
        let err = f
            .registry
            .register(request(Some(&a.session.id), "/work"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotActive { status: SessionStatus::Inactive, .. }
        ));
    }

    #[tokio::test]
    async fn stale_sessions_drop_out_of_active_list() {
        let f = fixture();
        let a = f.registry.register(request(None, "/work")).await.unwrap();
        f.time.advance(Duration::from_secs(45));
        let b = f.registry.register(request(None, "/work")).await.unwrap();
        f.time.advance(Duration::from_secs(30));

        let active = f.registry.list_active(&a.project.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.session.id);

        let expired = f.registry.get(&a.session.id).unwrap();
        assert_eq!(expired.status, SessionStatus::Inactive);
        assert_eq!(expired.ended_at, Some(Timestamp::from_millis(61_000)));
    }

    #[tokio::test]
    async fn heartbeat_on_stale_session_expires_it() {
        let f = fixture();
        let a = f.registry.register(request(None, "/work")).await.unwrap();
        f.time.advance(Duration::from_secs(61));
        let err = f.registry.heartbeat(&a.session.id).unwrap_err();
        assert!(matches!(err, SessionError::Expired(_)));
        assert!(matches!(
            f.registry.heartbeat(&a.session.id),
            Err(SessionError::NotActive { .. })
        ));
    }

    #[tokio::test]
    async fn archive_after_grace_period() {
        let f = fixture();
        let a = f.registry.register(request(None, "/work")).await.unwrap();
        f.registry.end(&a.session.id).unwrap();

        f.time.advance(Duration::from_secs(599));
        assert!(f.registry.archive_expired(&a.project.id).unwrap().is_empty());

        f.time.advance(Duration::from_secs(1));
        let archived = f.registry.archive_expired(&a.project.id).unwrap();
        assert_eq!(archived, vec![a.session.id.clone()]);
        assert_eq!(
            f.registry.get(&a.session.id).unwrap().status,
            SessionStatus::Archived
        );
        assert!(f.registry.end(&a.session.id).is_err());
    }

    #[tokio::test]
    async fn minting_outage_creates_nothing() {
        let f = fixture();
        f.minter.set_available(false);
        let err = f
            .registry
            .register(request(None, "/work"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Mint(_)));
        f.minter.set_available(true);
        let reg = f.registry.register(request(None, "/work")).await.unwrap();
        assert!(reg.created);
    }

    #[tokio::test]
    async fn interrupted_project_creation_is_completed_later() {
        let f = fixture();
        let store = InMemorySyncStore::new();
        store
            .insert_project(Project::new(
                ProjectId::new("P1").unwrap(),
                "/work".into(),
                Timestamp::zero(),
            ))
            .unwrap();
        let registry = SessionRegistry::new(
            Arc::new(store),
            f.log.clone(),
            Minter::new(f.minter.clone()),
            f.time.clone(),
            SessionSettings::default(),
        );
        let reg = registry.register(request(None, "/work")).await.unwrap();
        assert_eq!(reg.project.id.as_str(), "P1");
        assert!(reg.project.canonical_branch.is_some());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let f = fixture();
        let missing = SessionId::new("nope").unwrap();
        assert!(matches!(f.registry.heartbeat(&missing), Err(SessionError::NotFound(_))));
    }
}

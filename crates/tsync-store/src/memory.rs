//! In-memory sync store for testing and ephemeral use.
//!
//! [`InMemorySyncStore`] keeps each table in a `HashMap` behind its own
//! `RwLock`. The canonical-state CAS holds the project table's write lock
//! for the whole compare-and-write.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::debug;
use tsync_merge::Conflict;
use tsync_types::{
    BranchId, ConflictId, Project, ProjectId, Session, SessionId, Task, TaskId, Timestamp,
};

use crate::error::{StoreError, StoreResult};
use crate::traits::{CasOutcome, SyncStore};

#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    projects: RwLock<HashMap<ProjectId, Project>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    session_tasks: RwLock<HashMap<SessionId, Vec<Task>>>,
    conflicts: RwLock<HashMap<ConflictId, Conflict>>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("lock poisoned: {e}"))
}

impl SyncStore for InMemorySyncStore {
    fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        Ok(projects.get(id).cloned())
    }

    fn project_by_path(&self, path: &str) -> StoreResult<Option<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        Ok(projects.values().find(|p| p.path == path).cloned())
    }

    fn insert_project(&self, project: Project) -> StoreResult<(Project, bool)> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        if let Some(existing) = projects.values().find(|p| p.path == project.path) {
            return Ok((existing.clone(), false));
        }
        if projects.contains_key(&project.id) {
            return Err(StoreError::exists("project", &project.id));
        }
        debug!(project = %project.id, path = %project.path, "inserted project");
        projects.insert(project.id.clone(), project.clone());
        Ok((project, true))
    }

    fn set_canonical_branch(&self, id: &ProjectId, branch: BranchId) -> StoreResult<Project> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("project", id))?;
        project.canonical_branch = Some(branch);
        Ok(project.clone())
    }

    fn cas_canonical(
        &self,
        id: &ProjectId,
        expected_version: u64,
        canonical: Vec<Task>,
        at: Timestamp,
    ) -> StoreResult<CasOutcome> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("project", id))?;
        if project.version != expected_version {
            debug!(
                project = %id,
                expected = expected_version,
                actual = project.version,
                "canonical CAS rejected"
            );
            return Ok(CasOutcome::VersionMismatch {
                expected: expected_version,
                actual: project.version,
            });
        }
        project.canonical = canonical;
        project.version += 1;
        project.last_consolidated_at = Some(at);
        debug!(
            project = %id,
            version = project.version,
            tasks = project.canonical.len(),
            "canonical CAS applied"
        );
        Ok(CasOutcome::Applied(project.clone()))
    }

    fn session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(id).cloned())
    }

    fn put_session(&self, session: Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn sessions(&self, project: &ProjectId) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let mut result: Vec<Session> = sessions
            .values()
            .filter(|s| &s.project_id == project)
            .cloned()
            .collect();
        result.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        Ok(result)
    }

    fn session_tasks(&self, id: &SessionId) -> StoreResult<Vec<Task>> {
        let tasks = self.session_tasks.read().map_err(poisoned)?;
        Ok(tasks.get(id).cloned().unwrap_or_default())
    }

    fn put_session_tasks(&self, id: &SessionId, tasks: Vec<Task>) -> StoreResult<()> {
        let mut all = self.session_tasks.write().map_err(poisoned)?;
        debug!(session = %id, tasks = tasks.len(), "recorded session tasks");
        all.insert(id.clone(), tasks);
        Ok(())
    }

    fn add_missing_session_tasks(&self, id: &SessionId, tasks: &[Task]) -> StoreResult<usize> {
        let mut all = self.session_tasks.write().map_err(poisoned)?;
        let held = all.entry(id.clone()).or_default();
        let known: HashSet<TaskId> = held.iter().map(|t| t.id.clone()).collect();
        let before = held.len();
        held.extend(tasks.iter().filter(|t| !known.contains(&t.id)).cloned());
        Ok(held.len() - before)
    }

    fn insert_conflict(&self, conflict: Conflict) -> StoreResult<()> {
        let mut conflicts = self.conflicts.write().map_err(poisoned)?;
        if conflicts.contains_key(&conflict.id) {
            return Err(StoreError::exists("conflict", &conflict.id));
        }
        conflicts.insert(conflict.id.clone(), conflict);
        Ok(())
    }

    fn conflict(&self, id: &ConflictId) -> StoreResult<Option<Conflict>> {
        let conflicts = self.conflicts.read().map_err(poisoned)?;
        Ok(conflicts.get(id).cloned())
    }

    fn update_conflict(&self, conflict: Conflict) -> StoreResult<()> {
        let mut conflicts = self.conflicts.write().map_err(poisoned)?;
        let slot = conflicts
            .get_mut(&conflict.id)
            .ok_or_else(|| StoreError::not_found("conflict", &conflict.id))?;
        *slot = conflict;
        Ok(())
    }

    fn conflicts(&self, project: &ProjectId, resolved: Option<bool>) -> StoreResult<Vec<Conflict>> {
        let conflicts = self.conflicts.read().map_err(poisoned)?;
        let mut result: Vec<Conflict> = conflicts
            .values()
            .filter(|c| &c.project_id == project)
            .filter(|c| resolved.map_or(true, |r| c.is_resolved() == r))
            .cloned()
            .collect();
        result.sort_by(|a, b| (a.detected_at, &a.id).cmp(&(b.detected_at, &b.id)));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsync_merge::{ConflictKind, DetectedConflict, MergeStrategy, Side};
    use tsync_types::{Contributor, TaskStatus};

    fn pid(s: &str) -> ProjectId {
        ProjectId::new(s).unwrap()
    }

    fn task(id: &str) -> Task {
        Task::new(
            TaskId::new(id).unwrap(),
            "do the thing",
            Contributor::new("claude").unwrap(),
            SessionId::new("S1").unwrap(),
            pid("P1"),
            Timestamp::from_millis(1),
        )
        .unwrap()
    }

    fn store_with_project() -> InMemorySyncStore {
        let store = InMemorySyncStore::new();
        store
            .insert_project(Project::new(pid("P1"), "/work".into(), Timestamp::zero()))
            .unwrap();
        store
    }

    #[test]
    fn insert_project_is_idempotent_per_path() {
        let store = store_with_project();
        let (existing, created) = store
            .insert_project(Project::new(pid("P2"), "/work".into(), Timestamp::zero()))
            .unwrap();
        assert!(!created);
        assert_eq!(existing.id, pid("P1"));
        assert!(store.project(&pid("P2")).unwrap().is_none());
        assert_eq!(store.project_by_path("/work").unwrap().unwrap().id, pid("P1"));
    }

    #[test]
    fn cas_bumps_version_once() {
        let store = store_with_project();
        let outcome = store
            .cas_canonical(&pid("P1"), 0, vec![task("T1")], Timestamp::from_millis(5))
            .unwrap();
        let CasOutcome::Applied(project) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(project.version, 1);
        assert_eq!(project.last_consolidated_at, Some(Timestamp::from_millis(5)));

        // A second writer still holding version 0 loses.
        let stale = store
            .cas_canonical(&pid("P1"), 0, vec![], Timestamp::from_millis(6))
            .unwrap();
        assert_eq!(stale, CasOutcome::VersionMismatch { expected: 0, actual: 1 });
        assert_eq!(store.project(&pid("P1")).unwrap().unwrap().canonical.len(), 1);
    }

    #[test]
    fn cas_on_missing_project_is_not_found() {
        let store = InMemorySyncStore::new();
        let err = store
            .cas_canonical(&pid("nope"), 0, vec![], Timestamp::zero())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "project", .. }));
    }

    #[test]
    fn propagation_never_overwrites() {
        let store = store_with_project();
        let sid = SessionId::new("S1").unwrap();
        let mut mine = task("T1");
        mine.status = TaskStatus::Completed;
        store.put_session_tasks(&sid, vec![mine.clone()]).unwrap();

        let added = store
            .add_missing_session_tasks(&sid, &[task("T1"), task("T2")])
            .unwrap();
        assert_eq!(added, 1);
        let held = store.session_tasks(&sid).unwrap();
        assert_eq!(held.len(), 2);
        assert_eq!(held[0], mine);
    }

    #[test]
    fn sessions_are_listed_per_project_in_start_order() {
        let store = store_with_project();
        let who = Contributor::new("claude").unwrap();
        for (id, at) in [("S2", 20), ("S1", 10)] {
            store
                .put_session(Session::new(
                    SessionId::new(id).unwrap(),
                    pid("P1"),
                    who.clone(),
                    Timestamp::from_millis(at),
                ))
                .unwrap();
        }
        store
            .put_session(Session::new(
                SessionId::new("S3").unwrap(),
                pid("P2"),
                who,
                Timestamp::zero(),
            ))
            .unwrap();
        let ids: Vec<String> = store
            .sessions(&pid("P1"))
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["S1", "S2"]);
    }

    #[test]
    fn conflicts_filter_on_resolution() {
        let store = store_with_project();
        let system = Contributor::new("tsync").unwrap();
        for (id, auto) in [("C1", true), ("C2", false)] {
            let detected = DetectedConflict {
                task_id: TaskId::new("T1").unwrap(),
                kind: ConflictKind::StatusDivergence,
                base: None,
                local: Some(task("T1")),
                remote: Some(task("T1")),
                auto_resolution: auto.then_some(tsync_merge::AutoResolution {
                    strategy: MergeStrategy::Timestamp,
                    chosen: Side::Local,
                }),
            };
            store
                .insert_conflict(Conflict::from_detected(
                    ConflictId::new(id).unwrap(),
                    pid("P1"),
                    detected,
                    Timestamp::from_millis(1),
                    &system,
                ))
                .unwrap();
        }
        assert_eq!(store.conflicts(&pid("P1"), None).unwrap().len(), 2);
        assert_eq!(store.conflicts(&pid("P1"), Some(true)).unwrap()[0].id.as_str(), "C1");
        assert_eq!(store.conflicts(&pid("P1"), Some(false)).unwrap()[0].id.as_str(), "C2");

        let c2_id = ConflictId::new("C2").unwrap();
        let mut c2 = store.conflict(&c2_id).unwrap().unwrap();
        c2.resolve(MergeStrategy::KeepLocal, Side::Local, system, Timestamp::from_millis(2))
            .unwrap();
        store.update_conflict(c2).unwrap();
        assert!(store.conflicts(&pid("P1"), Some(false)).unwrap().is_empty());
    }

    #[test]
    fn duplicate_conflict_ids_are_rejected() {
        let store = store_with_project();
        let detected = DetectedConflict {
            task_id: TaskId::new("T1").unwrap(),
            kind: ConflictKind::ContentDivergence,
            base: None,
            local: None,
            remote: None,
            auto_resolution: None,
        };
        let conflict = Conflict::from_detected(
            ConflictId::new("C1").unwrap(),
            pid("P1"),
            detected,
            Timestamp::zero(),
            &Contributor::new("tsync").unwrap(),
        );
        store.insert_conflict(conflict.clone()).unwrap();
        assert!(matches!(
            store.insert_conflict(conflict),
            Err(StoreError::AlreadyExists { kind: "conflict", .. })
        ));
    }
}

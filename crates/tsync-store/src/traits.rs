use tsync_merge::Conflict;
use tsync_types::{BranchId, ConflictId, Project, ProjectId, Session, SessionId, Task, Timestamp};

use crate::error::StoreResult;

/// Result of a compare-and-swap on a project's canonical state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed; carries the project as stored.
    Applied(Project),
    /// Another writer got there first.
    VersionMismatch { expected: u64, actual: u64 },
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Row store backing projects, sessions, session task sets and conflicts.
///
/// Implementations must be thread-safe (`Send + Sync`). Every read returns a
/// consistent snapshot of the row; there are no multi-row transactions
/// beyond the guarantees documented on each method.
pub trait SyncStore: Send + Sync {
    // -- projects --------------------------------------------------------

    /// Read a project by id. Returns `Ok(None)` if it does not exist.
    fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>>;

    /// Look up a project by its normalised path.
    fn project_by_path(&self, path: &str) -> StoreResult<Option<Project>>;

    /// Insert `project` unless one already exists for its path.
    ///
    /// Returns the stored project and whether it was newly created. When two
    /// callers race, exactly one insert wins and both see the winner.
    fn insert_project(&self, project: Project) -> StoreResult<(Project, bool)>;

    /// Record the id of the project's canonical log branch.
    fn set_canonical_branch(&self, id: &ProjectId, branch: BranchId) -> StoreResult<Project>;

    /// Atomically replace the canonical state if the stored version still
    /// equals `expected_version`. On success the version is incremented and
    /// `last_consolidated_at` set to `at`.
    fn cas_canonical(
        &self,
        id: &ProjectId,
        expected_version: u64,
        canonical: Vec<Task>,
        at: Timestamp,
    ) -> StoreResult<CasOutcome>;

    // -- sessions --------------------------------------------------------

    fn session(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    /// Insert or overwrite a session row.
    fn put_session(&self, session: Session) -> StoreResult<()>;

    /// All sessions of a project, ordered by `(started_at, id)`.
    fn sessions(&self, project: &ProjectId) -> StoreResult<Vec<Session>>;

    // -- session task sets -----------------------------------------------

    /// The task set last recorded for a session (empty if none).
    fn session_tasks(&self, id: &SessionId) -> StoreResult<Vec<Task>>;

    /// Replace a session's task set.
    fn put_session_tasks(&self, id: &SessionId, tasks: Vec<Task>) -> StoreResult<()>;

    /// Add each task whose id the session does not yet hold. Existing
    /// entries are never overwritten. Returns how many were added.
    fn add_missing_session_tasks(&self, id: &SessionId, tasks: &[Task]) -> StoreResult<usize>;

    // -- conflicts -------------------------------------------------------

    /// Append a new conflict. Fails if the id is taken.
    fn insert_conflict(&self, conflict: Conflict) -> StoreResult<()>;

    fn conflict(&self, id: &ConflictId) -> StoreResult<Option<Conflict>>;

    /// Overwrite an existing conflict (state transitions only).
    fn update_conflict(&self, conflict: Conflict) -> StoreResult<()>;

    /// Conflicts of a project ordered by detection time; `resolved` filters
    /// on the resolved state when given.
    fn conflicts(&self, project: &ProjectId, resolved: Option<bool>) -> StoreResult<Vec<Conflict>>;
}

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{BranchId, ProjectId, TaskId};
use crate::task::Task;
use crate::temporal::Timestamp;

/// A logical project and its canonical task state.
///
/// The canonical state is never edited by clients. It is replaced wholesale
/// by consolidation, guarded by a compare-and-swap on [`version`].
///
/// [`version`]: Project::version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Normalised logical path the project was registered under.
    pub path: String,
    /// Canonical tasks, ordered by `(created_at, id)`.
    pub canonical: Vec<Task>,
    /// Incremented on every successful canonical write.
    pub version: u64,
    pub last_consolidated_at: Option<Timestamp>,
    pub created_at: Timestamp,
    /// Commit-log branch holding consolidation snapshots.
    pub canonical_branch: Option<BranchId>,
}

impl Project {
    /// Create an empty project at version 0.
    pub fn new(id: ProjectId, path: String, at: Timestamp) -> Self {
        Self {
            id,
            path,
            canonical: Vec::new(),
            version: 0,
            last_consolidated_at: None,
            created_at: at,
            canonical_branch: None,
        }
    }

    /// Normalise a logical project path: trimmed, no trailing separators,
    /// backslashes folded to `/`.
    pub fn normalize_path(path: &str) -> Result<String, TypeError> {
        let folded = path.trim().replace('\\', "/");
        let trimmed = folded.trim_end_matches('/');
        if trimmed.is_empty() {
            // A bare "/" is a legal root path; anything else empty is not.
            return if folded.starts_with('/') {
                Ok("/".to_string())
            } else {
                Err(TypeError::InvalidProjectPath(path.to_string()))
            };
        }
        Ok(trimmed.to_string())
    }

    /// Look up a canonical task.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.canonical.iter().find(|t| &t.id == id)
    }

    /// Canonical tasks that are not tombstoned.
    pub fn live_tasks(&self) -> impl Iterator<Item = &Task> {
        self.canonical.iter().filter(|t| !t.is_deleted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_separators() {
        assert_eq!(Project::normalize_path(" /work/app/ ").unwrap(), "/work/app");
        assert_eq!(Project::normalize_path("C:\\work\\app\\").unwrap(), "C:/work/app");
        assert_eq!(Project::normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(Project::normalize_path("   ").is_err());
        assert!(Project::normalize_path("").is_err());
    }

    #[test]
    fn new_project_is_empty_at_version_zero() {
        let p = Project::new(
            ProjectId::new("P1").unwrap(),
            "/work".into(),
            Timestamp::from_millis(5),
        );
        assert_eq!(p.version, 0);
        assert!(p.canonical.is_empty());
        assert_eq!(p.live_tasks().count(), 0);
        assert!(p.task(&TaskId::new("T1").unwrap()).is_none());
    }
}

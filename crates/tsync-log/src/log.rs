//! The [`CommitLog`] trait defining the commit/branch storage interface.

use tsync_types::{BranchId, CommitId, ProjectId};

use crate::commit::{Branch, Commit, NewCommit};
use crate::error::LogResult;
use crate::graph::CommitGraph;

/// Append-only storage for branches and snapshot commits.
///
/// Implementations must be thread-safe (`Send + Sync`). Appending a commit
/// and advancing its branch head happen atomically.
pub trait CommitLog: Send + Sync {
    /// Register a new branch. Fails if the id is taken.
    fn create_branch(&self, branch: Branch) -> LogResult<Branch>;

    /// Read a branch by id. Returns `Ok(None)` if it does not exist.
    fn branch(&self, id: &BranchId) -> LogResult<Option<Branch>>;

    /// All branches of a project, ordered by creation time.
    fn branches(&self, project: &ProjectId) -> LogResult<Vec<Branch>>;

    /// Append a commit to its branch and move the head to it.
    ///
    /// `new.parent` must equal the branch's current head and
    /// `new.merge_parent`, when given, must already exist in the project.
    fn commit(&self, new: NewCommit) -> LogResult<Commit>;

    /// Read a commit by id.
    fn get_commit(&self, id: &CommitId) -> LogResult<Option<Commit>>;

    /// Commits reachable from any branch head of the project, newest first.
    fn history(&self, project: &ProjectId, limit: usize) -> LogResult<Vec<Commit>>;

    /// A copy of the project's whole commit graph.
    fn graph(&self, project: &ProjectId) -> LogResult<CommitGraph>;

    /// Read the current head commit of a branch, if any.
    fn head(&self, branch: &BranchId) -> LogResult<Option<Commit>> {
        match self.branch(branch)?.and_then(|b| b.head) {
            Some(id) => self.get_commit(&id),
            None => Ok(None),
        }
    }

    /// Export the project's graph as bincode bytes.
    fn export(&self, project: &ProjectId) -> LogResult<Vec<u8>> {
        self.graph(project)?.to_bytes()
    }
}

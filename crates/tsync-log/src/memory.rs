//! In-memory commit log for testing and ephemeral use.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;
use tsync_types::{BranchId, CommitId, ProjectId};

use crate::commit::{Branch, Commit, NewCommit};
use crate::error::{LogError, LogResult};
use crate::graph::CommitGraph;
use crate::log::CommitLog;

#[derive(Debug, Default)]
struct Inner {
    branches: HashMap<BranchId, Branch>,
    graphs: HashMap<ProjectId, CommitGraph>,
    /// Commit id -> owning project, for id lookups.
    owners: HashMap<CommitId, ProjectId>,
}

/// An in-memory implementation of [`CommitLog`].
///
/// All data lives behind a single `RwLock`, so a commit and its head move
/// are applied together.
#[derive(Debug, Default)]
pub struct InMemoryCommitLog {
    inner: RwLock<Inner>,
}

impl InMemoryCommitLog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> LogError {
    LogError::Storage(format!("lock poisoned: {e}"))
}

impl CommitLog for InMemoryCommitLog {
    fn create_branch(&self, branch: Branch) -> LogResult<Branch> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.branches.contains_key(&branch.id) {
            return Err(LogError::DuplicateBranch(branch.id));
        }
        debug!(
            branch = %branch.id,
            project = %branch.project_id,
            platform = %branch.platform,
            "created branch"
        );
        inner.branches.insert(branch.id.clone(), branch.clone());
        Ok(branch)
    }

    fn branch(&self, id: &BranchId) -> LogResult<Option<Branch>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.branches.get(id).cloned())
    }

    fn branches(&self, project: &ProjectId) -> LogResult<Vec<Branch>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut result: Vec<Branch> = inner
            .branches
            .values()
            .filter(|b| &b.project_id == project)
            .cloned()
            .collect();
        result.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(result)
    }

    fn commit(&self, new: NewCommit) -> LogResult<Commit> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let Inner {
            branches,
            graphs,
            owners,
        } = &mut *inner;

        let branch = branches
            .get_mut(&new.branch_id)
            .ok_or_else(|| LogError::BranchNotFound(new.branch_id.clone()))?;
        if branch.head != new.parent {
            return Err(LogError::StaleHead {
                branch: branch.id.clone(),
                expected: branch.head.clone(),
                found: new.parent,
            });
        }
        if owners.contains_key(&new.id) {
            return Err(LogError::DuplicateCommit(new.id));
        }

        let commit = Commit::seal(new, branch.project_id.clone())?;
        graphs
            .entry(branch.project_id.clone())
            .or_default()
            .insert(commit.clone())?;
        owners.insert(commit.id.clone(), branch.project_id.clone());
        branch.head = Some(commit.id.clone());

        debug!(
            branch = %branch.id,
            commit = %commit.id,
            hash = %commit.hash_hex(),
            tasks = commit.snapshot.len(),
            "advanced branch head"
        );
        Ok(commit)
    }

    fn get_commit(&self, id: &CommitId) -> LogResult<Option<Commit>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .owners
            .get(id)
            .and_then(|project| inner.graphs.get(project))
            .and_then(|graph| graph.get(id))
            .cloned())
    }

    fn history(&self, project: &ProjectId, limit: usize) -> LogResult<Vec<Commit>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let Some(graph) = inner.graphs.get(project) else {
            return Ok(Vec::new());
        };
        let heads: Vec<&CommitId> = inner
            .branches
            .values()
            .filter(|b| &b.project_id == project)
            .filter_map(|b| b.head.as_ref())
            .collect();
        Ok(graph.history(heads, limit).into_iter().cloned().collect())
    }

    fn graph(&self, project: &ProjectId) -> LogResult<CommitGraph> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.graphs.get(project).cloned().unwrap_or_default())
    }
}

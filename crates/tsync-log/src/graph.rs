//! The per-project commit DAG and its traversal algorithms.
//!
//! [`CommitGraph`] stores commits in a [`HashMap`] with a forward-edge index
//! (`children`) for descendant queries.
//!
//! # Invariants
//!
//! - Append-only: commits are never modified or removed.
//! - Every parent reference resolves to a commit already in the graph.
//! - Commit ids are unique within the graph.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;
use tsync_types::CommitId;

use crate::commit::Commit;
use crate::error::{LogError, LogResult};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommitGraph {
    commits: HashMap<CommitId, Commit>,
    children: HashMap<CommitId, Vec<CommitId>>,
    roots: Vec<CommitId>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Insert a commit whose parents are already present.
    pub fn insert(&mut self, commit: Commit) -> LogResult<()> {
        if self.commits.contains_key(&commit.id) {
            return Err(LogError::DuplicateCommit(commit.id));
        }
        if let Some(missing) = commit.parents.iter().find(|p| !self.commits.contains_key(*p)) {
            return Err(LogError::DanglingParent {
                commit: commit.id.clone(),
                parent: missing.clone(),
            });
        }

        for parent in &commit.parents {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(commit.id.clone());
        }
        if commit.is_root() {
            self.roots.push(commit.id.clone());
        }

        debug!(
            commit = %commit.id.short(),
            kind = %commit.kind,
            parents = commit.parents.len(),
            "added commit"
        );
        self.commits.insert(commit.id.clone(), commit);
        Ok(())
    }

    pub fn get(&self, id: &CommitId) -> Option<&Commit> {
        self.commits.get(id)
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.commits.contains_key(id)
    }

    pub fn roots(&self) -> Vec<&Commit> {
        self.roots.iter().filter_map(|id| self.commits.get(id)).collect()
    }

    pub fn children(&self, id: &CommitId) -> Vec<&Commit> {
        self.children
            .get(id)
            .map(|ids| ids.iter().filter_map(|c| self.commits.get(c)).collect())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------
    // Ancestry
    // ---------------------------------------------------------------

    /// Every commit reachable from `id` through parent links, `id` included.
    pub fn reachable(&self, id: &CommitId) -> HashSet<CommitId> {
        self.reachable_from([id])
    }

    fn reachable_from<'a, I>(&self, starts: I) -> HashSet<CommitId>
    where
        I: IntoIterator<Item = &'a CommitId>,
    {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&CommitId> = VecDeque::new();
        for start in starts {
            if self.commits.contains_key(start) && visited.insert(start.clone()) {
                queue.push_back(start);
            }
        }
        while let Some(current) = queue.pop_front() {
            if let Some(commit) = self.commits.get(current) {
                for parent in &commit.parents {
                    if visited.insert(parent.clone()) {
                        queue.push_back(parent);
                    }
                }
            }
        }
        visited
    }

    /// Ancestors of `id` (BFS upward), excluding `id` itself.
    pub fn ancestors(&self, id: &CommitId) -> Vec<&Commit> {
        let mut reachable = self.reachable(id);
        reachable.remove(id);
        let mut result: Vec<&Commit> = reachable
            .iter()
            .filter_map(|c| self.commits.get(c))
            .collect();
        sort_newest_first(&mut result);
        result
    }

    /// Returns `true` if `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> bool {
        self.reachable(descendant).contains(ancestor)
    }

    /// The lowest common ancestor of two commits: among shared ancestors
    /// (each commit counts as its own ancestor), the most recent one.
    pub fn common_ancestor(&self, a: &CommitId, b: &CommitId) -> Option<&Commit> {
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        if a == b {
            return self.commits.get(a);
        }
        let ancestors_a = self.reachable(a);
        let ancestors_b = self.reachable(b);
        ancestors_a
            .intersection(&ancestors_b)
            .filter_map(|id| self.commits.get(id))
            .max_by(|x, y| (x.timestamp, &x.id).cmp(&(y.timestamp, &y.id)))
    }

    /// Commits reachable from any of `heads`, newest first, at most `limit`.
    pub fn history<'a, I>(&self, heads: I, limit: usize) -> Vec<&Commit>
    where
        I: IntoIterator<Item = &'a CommitId>,
    {
        let reachable = self.reachable_from(heads);
        let mut result: Vec<&Commit> = reachable
            .iter()
            .filter_map(|c| self.commits.get(c))
            .collect();
        sort_newest_first(&mut result);
        result.truncate(limit);
        result
    }

    // ---------------------------------------------------------------
    // Integrity & persistence
    // ---------------------------------------------------------------

    /// Verify every snapshot hash and parent link.
    pub fn validate(&self) -> LogResult<()> {
        for commit in self.commits.values() {
            commit.verify()?;
            if let Some(missing) = commit.parents.iter().find(|p| !self.commits.contains_key(*p)) {
                return Err(LogError::DanglingParent {
                    commit: commit.id.clone(),
                    parent: missing.clone(),
                });
            }
        }
        Ok(())
    }

    /// Serialize the graph to bincode bytes.
    pub fn to_bytes(&self) -> LogResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LogError::Serialization(e.to_string()))
    }

    /// Deserialize and validate a graph from bincode bytes.
    pub fn from_bytes(data: &[u8]) -> LogResult<Self> {
        let graph: Self =
            bincode::deserialize(data).map_err(|e| LogError::Serialization(e.to_string()))?;
        graph.validate()?;
        Ok(graph)
    }
}

fn sort_newest_first(commits: &mut [&Commit]) {
    commits.sort_by(|a, b| (b.timestamp, &b.id).cmp(&(a.timestamp, &a.id)));
}

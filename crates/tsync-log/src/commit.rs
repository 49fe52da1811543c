//! Branches and immutable snapshot commits.

use std::fmt;

use serde::{Deserialize, Serialize};
use tsync_clock::VectorClock;
use tsync_types::{BranchId, CommitId, Contributor, ProjectId, SessionId, Task, Timestamp};

use crate::error::{LogError, LogResult};

/// Platform tag of a project's canonical branch.
pub const CANONICAL_PLATFORM: &str = "canonical";

/// A named line of commits owned by one (platform, session) pair.
///
/// Each project additionally owns one canonical branch (platform
/// [`CANONICAL_PLATFORM`], no session) that records consolidations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub project_id: ProjectId,
    pub platform: Contributor,
    pub session_id: Option<SessionId>,
    /// `None` until the first commit lands.
    pub head: Option<CommitId>,
    pub created_at: Timestamp,
}

impl Branch {
    /// A branch recording one session's submissions.
    pub fn for_session(
        id: BranchId,
        project_id: ProjectId,
        platform: Contributor,
        session_id: SessionId,
        at: Timestamp,
    ) -> Self {
        Self {
            id,
            project_id,
            platform,
            session_id: Some(session_id),
            head: None,
            created_at: at,
        }
    }

    /// The project's consolidation branch.
    pub fn canonical(id: BranchId, project_id: ProjectId, at: Timestamp) -> LogResult<Self> {
        Ok(Self {
            id,
            project_id,
            platform: Contributor::new(CANONICAL_PLATFORM)?,
            session_id: None,
            head: None,
            created_at: at,
        })
    }

    pub fn is_canonical(&self) -> bool {
        self.session_id.is_none() && self.platform.as_str() == CANONICAL_PLATFORM
    }
}

/// Why a commit was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// A session submitted its task set.
    Submission,
    /// Consolidation produced a new canonical state.
    Consolidation,
    /// A conflict resolution changed the canonical state.
    Resolution,
    /// A past snapshot was restored.
    Rollback,
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submission => write!(f, "submission"),
            Self::Consolidation => write!(f, "consolidation"),
            Self::Resolution => write!(f, "resolution"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// Everything needed to append a commit. The id is minted by the caller.
#[derive(Clone, Debug)]
pub struct NewCommit {
    pub id: CommitId,
    pub branch_id: BranchId,
    pub kind: CommitKind,
    pub snapshot: Vec<Task>,
    /// Must equal the branch's current head.
    pub parent: Option<CommitId>,
    /// Second parent for merge commits.
    pub merge_parent: Option<CommitId>,
    pub author: Contributor,
    pub at: Timestamp,
}

/// An immutable snapshot of a task set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub project_id: ProjectId,
    pub branch_id: BranchId,
    pub kind: CommitKind,
    /// First parent, then the merge parent if any.
    pub parents: Vec<CommitId>,
    pub author: Contributor,
    pub timestamp: Timestamp,
    /// Entrywise merge of every snapshot task's clock.
    pub clock: VectorClock,
    pub snapshot: Vec<Task>,
    /// BLAKE3 hash of the JSON-encoded snapshot.
    pub snapshot_hash: [u8; 32],
}

impl Commit {
    /// Seal a new commit for `project_id`, computing its clock and hash.
    pub fn seal(new: NewCommit, project_id: ProjectId) -> LogResult<Self> {
        let snapshot_hash = snapshot_hash(&new.snapshot)?;
        let clock = new
            .snapshot
            .iter()
            .fold(VectorClock::new(), |acc, task| acc.merged(&task.clock));
        let parents = new.parent.into_iter().chain(new.merge_parent).collect();
        Ok(Self {
            id: new.id,
            project_id,
            branch_id: new.branch_id,
            kind: new.kind,
            parents,
            author: new.author,
            timestamp: new.at,
            clock,
            snapshot: new.snapshot,
            snapshot_hash,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }

    pub fn merge_parent(&self) -> Option<&CommitId> {
        self.parents.get(1)
    }

    /// Hex rendering of the snapshot hash.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.snapshot_hash)
    }

    /// Recompute the snapshot hash and compare it to the recorded one.
    pub fn verify(&self) -> LogResult<()> {
        if snapshot_hash(&self.snapshot)? == self.snapshot_hash {
            Ok(())
        } else {
            Err(LogError::HashMismatch(self.id.clone()))
        }
    }
}

/// BLAKE3 hash of a task snapshot's JSON encoding.
pub fn snapshot_hash(snapshot: &[Task]) -> LogResult<[u8; 32]> {
    let bytes =
        serde_json::to_vec(snapshot).map_err(|e| LogError::Serialization(e.to_string()))?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

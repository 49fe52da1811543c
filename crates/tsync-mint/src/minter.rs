use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use tsync_types::{BranchId, CommitId, ConflictId, ProjectId, SessionId, TaskId};

use crate::error::{MintError, MintResult};

/// The kind of entity an identifier is minted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Session,
    Project,
    Branch,
    Commit,
    Conflict,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Session => "session",
            Self::Project => "project",
            Self::Branch => "branch",
            Self::Commit => "commit",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call to the minting service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MintRequest {
    pub kind: EntityKind,
    /// Free-form refinement of the kind (e.g. `"duplicate"`, `"canonical"`).
    pub subtype: String,
    pub metadata: Value,
}

/// Client of the external identifier-minting service.
///
/// A call must succeed before the entity it names is created; callers treat
/// any error as a failure of the whole operation.
#[async_trait]
pub trait IdMinter: Send + Sync {
    async fn mint(&self, request: MintRequest) -> MintResult<String>;
}

/// Typed front end over an [`IdMinter`].
#[derive(Clone)]
pub struct Minter {
    inner: Arc<dyn IdMinter>,
}

impl fmt::Debug for Minter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Minter").finish_non_exhaustive()
    }
}

impl Minter {
    pub fn new(inner: Arc<dyn IdMinter>) -> Self {
        Self { inner }
    }

    /// Mint a raw identifier.
    pub async fn mint(
        &self,
        kind: EntityKind,
        subtype: &str,
        metadata: Value,
    ) -> MintResult<String> {
        let id = self
            .inner
            .mint(MintRequest {
                kind,
                subtype: subtype.to_string(),
                metadata,
            })
            .await?;
        debug!(kind = %kind, subtype, id = %id, "minted id");
        Ok(id)
    }

    pub async fn task_id(&self, subtype: &str, metadata: Value) -> MintResult<TaskId> {
        let raw = self.mint(EntityKind::Task, subtype, metadata).await?;
        TaskId::new(raw.clone()).map_err(|e| invalid(EntityKind::Task, raw, e))
    }

    pub async fn session_id(&self, subtype: &str, metadata: Value) -> MintResult<SessionId> {
        let raw = self.mint(EntityKind::Session, subtype, metadata).await?;
        SessionId::new(raw.clone()).map_err(|e| invalid(EntityKind::Session, raw, e))
    }

    pub async fn project_id(&self, subtype: &str, metadata: Value) -> MintResult<ProjectId> {
        let raw = self.mint(EntityKind::Project, subtype, metadata).await?;
        ProjectId::new(raw.clone()).map_err(|e| invalid(EntityKind::Project, raw, e))
    }

    pub async fn branch_id(&self, subtype: &str, metadata: Value) -> MintResult<BranchId> {
        let raw = self.mint(EntityKind::Branch, subtype, metadata).await?;
        BranchId::new(raw.clone()).map_err(|e| invalid(EntityKind::Branch, raw, e))
    }

    pub async fn commit_id(&self, subtype: &str, metadata: Value) -> MintResult<CommitId> {
        let raw = self.mint(EntityKind::Commit, subtype, metadata).await?;
        CommitId::new(raw.clone()).map_err(|e| invalid(EntityKind::Commit, raw, e))
    }

    pub async fn conflict_id(&self, subtype: &str, metadata: Value) -> MintResult<ConflictId> {
        let raw = self.mint(EntityKind::Conflict, subtype, metadata).await?;
        ConflictId::new(raw.clone()).map_err(|e| invalid(EntityKind::Conflict, raw, e))
    }
}

fn invalid(kind: EntityKind, value: String, err: impl fmt::Display) -> MintError {
    MintError::InvalidId {
        kind,
        value,
        reason: err.to_string(),
    }
}

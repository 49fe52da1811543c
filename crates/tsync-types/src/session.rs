//! Contributor sessions and their lifecycle.
//!
//! ```text
//! active ──(end / heartbeat timeout)──> inactive ──(grace period)──> archived
//! ```
//!
//! No transition leaves `archived`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{BranchId, Contributor, ProjectId, SessionId};
use crate::temporal::Timestamp;

/// Lifecycle status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
    Archived,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// A contributor's temporal scope for edits against one project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub contributor: Contributor,
    pub status: SessionStatus,
    pub started_at: Timestamp,
    pub last_heartbeat: Timestamp,
    pub ended_at: Option<Timestamp>,
    /// Free-form branch label the client registered with (e.g. a git branch).
    pub branch_label: Option<String>,
    /// Commit-log branch recording this session's submissions.
    pub branch_id: Option<BranchId>,
}

impl Session {
    /// Create a freshly registered, active session.
    pub fn new(
        id: SessionId,
        project_id: ProjectId,
        contributor: Contributor,
        at: Timestamp,
    ) -> Self {
        Self {
            id,
            project_id,
            contributor,
            status: SessionStatus::Active,
            started_at: at,
            last_heartbeat: at,
            ended_at: None,
            branch_label: None,
            branch_id: None,
        }
    }

    /// Returns `true` if the session is marked active.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Returns `true` if the session is active but its last heartbeat is
    /// older than `timeout`.
    pub fn is_stale(&self, now: Timestamp, timeout: Duration) -> bool {
        self.is_active() && now.since(self.last_heartbeat) > timeout
    }

    /// Returns `true` if the session is inactive and ended more than
    /// `grace` ago.
    pub fn is_archivable(&self, now: Timestamp, grace: Duration) -> bool {
        self.status == SessionStatus::Inactive
            && self
                .ended_at
                .is_some_and(|ended| now.since(ended) >= grace)
    }

    /// Record a heartbeat. Only active sessions accept heartbeats.
    pub fn heartbeat(&mut self, at: Timestamp) -> Result<(), TypeError> {
        if !self.is_active() {
            return Err(self.illegal(SessionStatus::Active));
        }
        self.last_heartbeat = self.last_heartbeat.max(at);
        Ok(())
    }

    /// Transition to `inactive`. Ending an already inactive session is a
    /// no-op.
    pub fn end(&mut self, at: Timestamp) -> Result<(), TypeError> {
        match self.status {
            SessionStatus::Active => {
                self.status = SessionStatus::Inactive;
                self.ended_at = Some(at);
                Ok(())
            }
            SessionStatus::Inactive => Ok(()),
            SessionStatus::Archived => Err(self.illegal(SessionStatus::Inactive)),
        }
    }

    /// Flip a stale session to `inactive`. The end time is the moment the
    /// heartbeat expired, not the moment the staleness was noticed.
    pub fn expire(&mut self, timeout: Duration) -> Result<(), TypeError> {
        let expired_at = self.last_heartbeat.saturating_add(timeout);
        self.end(expired_at)
    }

    /// Transition `inactive -> archived`.
    pub fn archive(&mut self) -> Result<(), TypeError> {
        if self.status != SessionStatus::Inactive {
            return Err(self.illegal(SessionStatus::Archived));
        }
        self.status = SessionStatus::Archived;
        Ok(())
    }

    fn illegal(&self, to: SessionStatus) -> TypeError {
        TypeError::InvalidTransition {
            entity: "session",
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

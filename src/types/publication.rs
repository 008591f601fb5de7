//! Publication request state machine.
//!
//! A publication request tracks one attempt to turn a scenario into a review
//! request on a review-hosting backend:
//!
//! ```text
//! Pending ──► TokenAcquired ──► Submitted ──► Merged
//!    │              │               └───────► Rejected
//!    └──────────────┴──► Failed
//! ```
//!
//! `Merged`, `Rejected` and `Failed` are terminal. At most one non-terminal
//! request exists per `(scenario_id, target_branch)`; the store enforces that.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{PublicationId, ScenarioId, TaskId};
use crate::error::ErrorKind;

/// Which review-hosting backend a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Bitbucket Server (Stash) pull requests.
    Stash,
    /// GitLab merge requests.
    Gitlab,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Stash => "stash",
            BackendKind::Gitlab => "gitlab",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown backend name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown publication backend: {0}")]
pub struct UnknownBackend(pub String);

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stash" | "bitbucket" => Ok(BackendKind::Stash),
            "gitlab" => Ok(BackendKind::Gitlab),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

/// Reference to a review request on the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewRef {
    /// Backend-specific numeric ID (Stash PR id, GitLab MR iid).
    pub id: u64,

    /// Browser URL of the review, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Remote state of a review request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "raw", rename_all = "snake_case")]
pub enum ReviewStatus {
    Open,
    Merged,
    Declined,
    /// Any remote state without a local meaning (e.g. GitLab `locked`).
    Other(String),
}

/// Lifecycle state of a publication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublicationStatus {
    Pending,
    TokenAcquired,
    Submitted,
    Merged,
    Rejected,
    Failed { kind: ErrorKind, message: String },
}

impl PublicationStatus {
    /// Returns true for `Merged`, `Rejected` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublicationStatus::Merged | PublicationStatus::Rejected | PublicationStatus::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PublicationStatus::Pending => "pending",
            PublicationStatus::TokenAcquired => "token_acquired",
            PublicationStatus::Submitted => "submitted",
            PublicationStatus::Merged => "merged",
            PublicationStatus::Rejected => "rejected",
            PublicationStatus::Failed { .. } => "failed",
        }
    }

    fn allows(&self, next: &PublicationStatus) -> bool {
        use PublicationStatus::*;
        matches!(
            (self, next),
            (Pending, TokenAcquired)
                | (Pending, Failed { .. })
                | (TokenAcquired, Submitted)
                | (TokenAcquired, Failed { .. })
                | (Submitted, Merged)
                | (Submitted, Rejected)
        )
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicationStatus::Failed { kind, .. } => write!(f, "failed({kind})"),
            other => f.write_str(other.name()),
        }
    }
}

/// A status change that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid publication transition for {id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub id: PublicationId,
    pub from: PublicationStatus,
    pub to: PublicationStatus,
}

/// A request to publish one scenario to one target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRequest {
    pub id: PublicationId,
    pub scenario_id: ScenarioId,
    pub target_branch: String,
    pub backend_kind: BackendKind,
    pub status: PublicationStatus,

    /// Set once the review request exists remotely.
    #[serde(default)]
    pub review_ref: Option<ReviewRef>,

    /// The publish task that created this request, used to resume on redelivery.
    #[serde(default)]
    pub task_id: Option<TaskId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublicationRequest {
    /// Moves the request to `next`, refusing edges the state machine forbids.
    ///
    /// Terminal states never change.
    pub fn transition(&mut self, next: PublicationStatus) -> Result<(), InvalidTransition> {
        if !self.status.allows(&next) {
            return Err(InvalidTransition {
                id: self.id,
                from: self.status.clone(),
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Moves the request to `Failed` with the originating error kind.
    pub fn fail(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        self.transition(PublicationStatus::Failed {
            kind,
            message: message.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fields needed to create a publication request; the store assigns the ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPublication {
    pub scenario_id: ScenarioId,
    pub target_branch: String,
    pub backend_kind: BackendKind,
    pub task_id: Option<TaskId>,
}

impl NewPublication {
    /// Materializes the request in `Pending` with the given ID.
    pub fn into_request(self, id: PublicationId) -> PublicationRequest {
        let now = Utc::now();
        PublicationRequest {
            id,
            scenario_id: self.scenario_id,
            target_branch: self.target_branch,
            backend_kind: self.backend_kind,
            status: PublicationStatus::Pending,
            review_ref: None,
            task_id: self.task_id,
            created_at: now,
            updated_at: now,
        }
    }
}

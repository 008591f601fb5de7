//! Review backend and publication error types.
//!
//! Backend failures are split three ways because each one leads somewhere
//! different:
//!
//! - **Transient** (5xx, 429, network errors, timeouts): status reads retry in
//!   place; a failed creation fails the request and the task is redelivered.
//! - **Unauthorized** (401): the cached token is dropped and the task is
//!   redelivered with a fresh one.
//! - **Rejected** (any other 4xx, e.g. a branch conflict): terminal. The same
//!   content would be refused again.

use std::fmt;

use thiserror::Error;

use crate::auth::AuthError;
use crate::error::{ErrorKind, TaskFailure};
use crate::persistence::StoreError;
use crate::queue::QueueError;
use crate::retry::Transient;
use crate::types::{InvalidTransition, PublicationId, ScenarioId};

/// The kind of backend error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Transient,
    Rejected,
    Unauthorized,
}

/// A review backend API error.
#[derive(Debug, Error)]
pub struct BackendError {
    pub kind: BackendErrorKind,

    /// The HTTP status code, if a response arrived.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "review backend error (HTTP {}): {}", code, self.message),
            None => write!(f, "review backend error: {}", self.message),
        }
    }
}

impl BackendError {
    /// Categorizes an HTTP error status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            401 => BackendErrorKind::Unauthorized,
            429 => BackendErrorKind::Transient,
            code if (500..600).contains(&code) => BackendErrorKind::Transient,
            _ => BackendErrorKind::Rejected,
        };
        BackendError {
            kind,
            status_code: Some(status),
            message: body.into(),
            source: None,
        }
    }

    /// Categorizes a transport error. Anything that produced no usable response
    /// is transient; a body that cannot be decoded is not.
    pub fn from_reqwest(message: impl Into<String>, err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let kind = if err.is_decode() {
            BackendErrorKind::Rejected
        } else if let Some(code) = status_code {
            Self::from_status(code, "").kind
        } else {
            BackendErrorKind::Transient
        };
        BackendError {
            kind,
            status_code,
            message: format!("{}: {}", message.into(), err),
            source: Some(err),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        BackendError {
            kind: BackendErrorKind::Rejected,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        BackendError {
            kind: BackendErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// The error kind recorded on a publication request this error ends.
    pub fn error_kind(&self) -> ErrorKind {
        match self.kind {
            BackendErrorKind::Transient => ErrorKind::TransientInfra,
            BackendErrorKind::Unauthorized => ErrorKind::AuthBackendUnavailable,
            BackendErrorKind::Rejected => ErrorKind::ReviewSubmissionRejected,
        }
    }
}

impl Transient for BackendError {
    fn is_transient(&self) -> bool {
        self.kind == BackendErrorKind::Transient
    }
}

/// Errors from publishing a scenario or refreshing a review's status.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A non-terminal request already exists for the pair.
    #[error("{scenario_id} -> {target_branch} is already being published as {existing}")]
    AlreadyPublished {
        scenario_id: ScenarioId,
        target_branch: String,
        existing: PublicationId,
    },

    /// There is no draft to publish for the scenario.
    #[error("no publishable draft for scenario {0}")]
    MissingDraft(ScenarioId),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    /// The request is not in a state the operation applies to.
    #[error("{id} has no review to refresh")]
    NoReview { id: PublicationId },
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::AlreadyPublished { .. } => ErrorKind::AlreadyPublished,
            PublishError::MissingDraft(_) => ErrorKind::InvalidTask,
            PublishError::Auth(e) => e.kind(),
            PublishError::Backend(e) => e.error_kind(),
            PublishError::Store(StoreError::Conflict(_)) => ErrorKind::DataIntegrity,
            PublishError::Store(_) | PublishError::Queue(_) => ErrorKind::TransientInfra,
            PublishError::Transition(_) | PublishError::NoReview { .. } => ErrorKind::DataIntegrity,
        }
    }

    pub fn to_failure(&self) -> TaskFailure {
        TaskFailure::new(self.kind(), self.to_string())
    }
}

/// Result type for publication operations.
pub type Result<T> = std::result::Result<T, PublishError>;

//! Error taxonomy shared by task handlers, dead letters and publication requests.
//!
//! Every failure that can end a task or a publication request is reduced to an
//! [`ErrorKind`]. The kind decides whether the consumer runner redelivers the task
//! and is carried verbatim into terminal records, so an operator looking at a dead
//! letter or a `Failed` publication can always see where it came from.
//!
//! | Category          | Kinds                                             | Retried |
//! |-------------------|---------------------------------------------------|---------|
//! | `TransientInfra`  | `TransientInfra`                                  | yes     |
//! | `AuthFailure`     | `AuthBackendUnavailable` / `AuthRequestRejected`  | yes / no|
//! | `RemoteRejection` | `ReviewSubmissionRejected`, `AlreadyPublished`    | no      |
//! | `DataIntegrity`   | `DataIntegrity`                                   | yes     |
//! | `Invalid`         | `InvalidTask`, `ExecutionFailed`                  | no      |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of a task or publication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Queue, network or storage unreachable.
    TransientInfra,

    /// The token-issuing service could not be reached or answered with a server error.
    AuthBackendUnavailable,

    /// The token-issuing service refused the identity. Retrying cannot help.
    AuthRequestRejected,

    /// The review backend refused the review request (e.g. branch conflict).
    ReviewSubmissionRejected,

    /// A non-terminal publication already exists for the scenario and branch.
    AlreadyPublished,

    /// A uniqueness constraint fired on a catalog write.
    DataIntegrity,

    /// The task cannot be served: wrong variant for the handler, or its
    /// referenced data does not exist.
    InvalidTask,

    /// The external test or emulation command ran and reported failure.
    ExecutionFailed,
}

/// Coarse grouping of [`ErrorKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TransientInfra,
    AuthFailure,
    RemoteRejection,
    DataIntegrity,
    Invalid,
}

impl ErrorKind {
    /// Returns the category this kind belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::TransientInfra => ErrorCategory::TransientInfra,
            ErrorKind::AuthBackendUnavailable | ErrorKind::AuthRequestRejected => {
                ErrorCategory::AuthFailure
            }
            ErrorKind::ReviewSubmissionRejected | ErrorKind::AlreadyPublished => {
                ErrorCategory::RemoteRejection
            }
            ErrorKind::DataIntegrity => ErrorCategory::DataIntegrity,
            ErrorKind::InvalidTask | ErrorKind::ExecutionFailed => ErrorCategory::Invalid,
        }
    }

    /// Returns true if a task failing with this kind may be redelivered.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientInfra | ErrorKind::AuthBackendUnavailable | ErrorKind::DataIntegrity
        )
    }

    /// Stable snake_case name, as used in serialized records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientInfra => "transient_infra",
            ErrorKind::AuthBackendUnavailable => "auth_backend_unavailable",
            ErrorKind::AuthRequestRejected => "auth_request_rejected",
            ErrorKind::ReviewSubmissionRejected => "review_submission_rejected",
            ErrorKind::AlreadyPublished => "already_published",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::InvalidTask => "invalid_task",
            ErrorKind::ExecutionFailed => "execution_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure returned by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        TaskFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientInfra, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTask, message)
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arb_error_kind, arb_task_failure};
    use proptest::prelude::*;

    const ALL: [ErrorKind; 8] = [
        ErrorKind::TransientInfra,
        ErrorKind::AuthBackendUnavailable,
        ErrorKind::AuthRequestRejected,
        ErrorKind::ReviewSubmissionRejected,
        ErrorKind::AlreadyPublished,
        ErrorKind::DataIntegrity,
        ErrorKind::InvalidTask,
        ErrorKind::ExecutionFailed,
    ];

    #[test]
    fn retriable_kinds() {
        assert!(ErrorKind::TransientInfra.is_retriable());
        assert!(ErrorKind::AuthBackendUnavailable.is_retriable());
        assert!(ErrorKind::DataIntegrity.is_retriable());

        assert!(!ErrorKind::AuthRequestRejected.is_retriable());
        assert!(!ErrorKind::ReviewSubmissionRejected.is_retriable());
        assert!(!ErrorKind::AlreadyPublished.is_retriable());
        assert!(!ErrorKind::InvalidTask.is_retriable());
        assert!(!ErrorKind::ExecutionFailed.is_retriable());
    }

    #[test]
    fn remote_rejections_are_never_retried() {
        for kind in ALL {
            if kind.category() == ErrorCategory::RemoteRejection {
                assert!(!kind.is_retriable(), "{kind} must be terminal");
            }
        }
    }

    #[test]
    fn as_str_matches_serde() {
        for kind in ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    proptest! {
        #[test]
        fn failure_carries_its_kind(failure in arb_task_failure()) {
            prop_assert!(failure.to_string().starts_with(failure.kind.as_str()));
            prop_assert_eq!(failure.is_retriable(), failure.kind.is_retriable());
            let json = serde_json::to_value(&failure).unwrap();
            prop_assert_eq!(json["kind"].as_str(), Some(failure.kind.as_str()));
        }

        #[test]
        fn retriable_kinds_sit_in_recoverable_categories(kind in arb_error_kind()) {
            if kind.is_retriable() {
                prop_assert!(matches!(
                    kind.category(),
                    ErrorCategory::TransientInfra | ErrorCategory::AuthFailure | ErrorCategory::DataIntegrity
                ));
            }
        }
    }

    #[test]
    fn failure_display_includes_kind() {
        let failure = TaskFailure::new(ErrorKind::AuthRequestRejected, "bad identity");
        assert_eq!(failure.to_string(), "auth_request_rejected: bad identity");
        assert!(!failure.is_retriable());
    }
}

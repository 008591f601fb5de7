//! Publishing scenarios as review requests.
//!
//! # Module Structure
//!
//! - [`backend`]: the [`ReviewBackend`] trait and the configured backend enum
//! - [`stash`] / [`gitlab`]: the two REST clients
//! - [`publisher`]: the publication state machine driven by publish tasks
//! - [`status_poll`]: periodic refresh of submitted reviews
//! - [`service`]: operator-facing entry point that enqueues publish tasks
//! - [`error`]: backend and publication errors

pub mod backend;
pub mod error;
pub mod gitlab;
pub mod publisher;
pub mod service;
pub mod stash;
pub mod status_poll;

pub use backend::{ConfiguredBackend, ReviewBackend, ReviewDraft};
pub use error::{BackendError, BackendErrorKind, PublishError, Result};
pub use gitlab::{GitlabClient, GitlabSettings};
pub use publisher::{PublishOutcome, Publisher};
pub use service::PublicationService;
pub use stash::{StashClient, StashSettings};
pub use status_poll::{DEFAULT_STATUS_POLL_INTERVAL, PollReport, StatusPoller};

//! Short-lived credentials for the review backends.
//!
//! A [`TokenProvider`] hands out [`Token`]s per [`TokenTarget`], reusing a
//! cached token until its ttl runs out and asking its [`TokenSource`] for a new
//! one after that.
//!
//! # Module Structure
//!
//! - [`token`]: token values, targets and validity
//! - [`source`]: the [`TokenSource`] trait and its static and configured forms
//! - [`tokenizer`]: HTTP client for the tokenizer service
//! - [`provider`]: the caching [`TokenProvider`]

use std::future::Future;

use thiserror::Error;

use crate::error::{ErrorKind, TaskFailure};

pub mod provider;
pub mod source;
pub mod token;
pub mod tokenizer;

pub use provider::TokenProvider;
pub use source::{ConfiguredTokenSource, StaticTokenSource};
pub use token::{Token, TokenTarget, TokenValue};
pub use tokenizer::{TokenizerClient, TokenizerSettings};

/// Errors from acquiring a token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token service could not be reached, answered with a server error or
    /// rate-limited the request.
    #[error("token service unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The token service refused the request.
    #[error("token request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl AuthError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        AuthError::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Unavailable { .. } => ErrorKind::AuthBackendUnavailable,
            AuthError::Rejected { .. } => ErrorKind::AuthRequestRejected,
        }
    }

    pub fn to_failure(&self) -> TaskFailure {
        TaskFailure::new(self.kind(), self.to_string())
    }
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Where fresh tokens come from.
pub trait TokenSource: Send + Sync {
    fn acquire(&self, target: &TokenTarget) -> impl Future<Output = Result<TokenValue>> + Send;
}

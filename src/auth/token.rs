//! Tokens and the targets they are issued for.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::DraftId;

/// A secret token string.
///
/// `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenValue(String);

impl TokenValue {
    pub fn new(value: impl Into<String>) -> Self {
        TokenValue(value.into())
    }

    /// The raw secret, for building request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenValue(<redacted>)")
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Who a token is requested for. Tokens are cached per target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenTarget {
    /// Name of the requesting service, as registered with the tokenizer.
    pub initiator: String,
    /// Draft the token is scoped to.
    pub id: DraftId,
}

impl TokenTarget {
    pub fn new(initiator: impl Into<String>, id: DraftId) -> Self {
        TokenTarget {
            initiator: initiator.into(),
            id,
        }
    }
}

impl fmt::Display for TokenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.initiator, self.id)
    }
}

/// A credential with a validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: TokenValue,
    pub acquired_at: Instant,
    pub ttl: Duration,
}

impl Token {
    pub fn new(value: TokenValue, acquired_at: Instant, ttl: Duration) -> Self {
        Token {
            value,
            acquired_at,
            ttl,
        }
    }

    /// Valid while `now < acquired_at + ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.acquired_at) < self.ttl
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value.expose())
    }
}

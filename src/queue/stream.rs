//! Named streams and their consumer groups.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The categories of work the system queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Test-run execution.
    Test,
    /// Emulation sessions.
    Emulation,
    /// Scenario publication.
    Publication,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Test, StreamKind::Emulation, StreamKind::Publication];

    /// Canonical stream name, also used as the stream's directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Test => "test",
            StreamKind::Emulation => "emulation",
            StreamKind::Publication => "publication",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stream name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stream: {0}")]
pub struct UnknownStream(pub String);

impl FromStr for StreamKind {
    type Err = UnknownStream;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(StreamKind::Test),
            "emulation" => Ok(StreamKind::Emulation),
            "publication" => Ok(StreamKind::Publication),
            other => Err(UnknownStream(other.to_string())),
        }
    }
}

/// A named queue and the consumer group that reads it.
///
/// Static configuration: built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stream {
    pub kind: StreamKind,
    pub name: String,
    pub consumer_group: String,
}

impl Stream {
    /// The default stream for a kind, with group `<name>-consumers`.
    pub fn for_kind(kind: StreamKind) -> Self {
        Stream {
            kind,
            name: kind.as_str().to_string(),
            consumer_group: format!("{}-consumers", kind.as_str()),
        }
    }

    /// Same stream, read by a different consumer group.
    pub fn with_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = consumer_group.into();
        self
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.consumer_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for kind in StreamKind::ALL {
            assert_eq!(kind.as_str().parse::<StreamKind>().unwrap(), kind);
        }
        assert!("redis".parse::<StreamKind>().is_err());
    }

    #[test]
    fn default_group_name() {
        let stream = Stream::for_kind(StreamKind::Publication);
        assert_eq!(stream.name, "publication");
        assert_eq!(stream.consumer_group, "publication-consumers");
        assert_eq!(stream.to_string(), "publication/publication-consumers");
    }

    #[test]
    fn serde_uses_canonical_name() {
        assert_eq!(
            serde_json::to_string(&StreamKind::Emulation).unwrap(),
            "\"emulation\""
        );
    }
}

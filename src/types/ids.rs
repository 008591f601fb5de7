//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., passing a
//! `TestRunId` where a `DraftId` is expected) and make signatures self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter that disambiguates task IDs minted in the same microsecond.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of a queued task.
///
/// Generated IDs have the shape `<micros:016>-<pid:08x>-<counter:08x>`, so lexical
/// order matches creation order for tasks produced on one host. The queue relies
/// on this for FIFO claiming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        TaskId(s.into())
    }

    /// Mints a fresh, time-ordered task ID.
    pub fn generate() -> Self {
        let micros = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let counter = TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        TaskId(format!(
            "{:016}-{:08x}-{:08x}",
            micros,
            std::process::id(),
            counter & 0xffff_ffff
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the ID is safe to use as a file name.
    ///
    /// Rejects empty IDs, path separators, NUL bytes and leading dots (hidden
    /// files, `.` and `..`).
    pub fn is_path_safe(&self) -> bool {
        let id = self.0.as_str();
        !id.is_empty()
            && !id.contains('/')
            && !id.contains('\\')
            && !id.contains('\0')
            && !id.starts_with('.')
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// Identifier of a test scenario (the unit that gets published).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(pub String);

impl ScenarioId {
    pub fn new(s: impl Into<String>) -> Self {
        ScenarioId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ScenarioId {
    fn from(s: &str) -> Self {
        ScenarioId(s.to_string())
    }
}

/// Opaque tag identifying one claim of one task.
///
/// A task that is redelivered gets a new tag, so a settlement carrying an old
/// tag can be told apart from the current claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryTag(pub String);

impl DeliveryTag {
    pub fn new(s: impl Into<String>) -> Self {
        DeliveryTag(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                $name(n)
            }
        }
    };
}

numeric_id!(
    /// Catalog identifier of a feature record.
    FeatureId,
    "feature-"
);
numeric_id!(
    /// Identifier of a publication request.
    PublicationId,
    "publication-"
);
numeric_id!(
    /// Identifier of a test run created by the admin side.
    TestRunId,
    "test-run-"
);
numeric_id!(
    /// Identifier of an emulation run.
    EmulationRunId,
    "emulation-run-"
);
numeric_id!(
    /// Identifier of a scenario draft prepared for publication.
    ///
    /// Used as the tokenizer `id` and in the review source branch name.
    DraftId,
    "draft-"
);

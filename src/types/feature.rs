//! Feature catalog entries and scenario drafts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ids::{DraftId, FeatureId, ScenarioId};

/// Hex-encoded SHA-256 of a feature file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Hashes feature file content.
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        ContentHash(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a feature, taken from its directory under the features root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureType(pub String);

impl FeatureType {
    pub fn new(s: impl Into<String>) -> Self {
        FeatureType(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One scenario of a feature file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// The scenario block as written, header line included.
    pub text: String,
}

/// A catalog entry mirroring one feature file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: FeatureId,

    /// Path relative to the features root, `/`-separated. Unique in the catalog.
    pub file_path: String,

    pub content_hash: ContentHash,
    pub feature_type: FeatureType,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub scenarios: Vec<ScenarioRecord>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new catalog entry; the store assigns the ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeature {
    pub file_path: String,
    pub content_hash: ContentHash,
    pub feature_type: FeatureType,
    pub name: String,
    pub tags: Vec<String>,
    pub scenarios: Vec<ScenarioRecord>,
}

impl NewFeature {
    pub fn into_record(self, id: FeatureId) -> FeatureRecord {
        FeatureRecord {
            id,
            file_path: self.file_path,
            content_hash: self.content_hash,
            feature_type: self.feature_type,
            name: self.name,
            tags: self.tags,
            scenarios: self.scenarios,
            updated_at: Utc::now(),
        }
    }
}

/// The publishable content of a scenario, prepared by the admin side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDraft {
    pub scenario_id: ScenarioId,
    pub draft_id: DraftId,
    /// Review title, usually the feature name.
    pub title: String,
    /// Full feature file text to be reviewed.
    pub feature_text: String,
    pub author: String,
    #[serde(default)]
    pub reviewers: Vec<String>,
}

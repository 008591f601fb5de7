//! Snapshot persistence for the catalog.
//!
//! # File Format
//!
//! One pretty-printed JSON document holding every record plus the ID counters.
//! The counters are stored rather than derived so that IDs are never reused,
//! even after records are removed by hand.
//!
//! # Atomic Writes
//!
//! Snapshots go through [`write_atomic`]: temp file, fsync, rename, directory
//! fsync. Readers always see either the old or the new snapshot.

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::write_atomic;
use crate::types::{FeatureRecord, PublicationRequest, ScenarioDraft};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot was written by an incompatible version.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Persisted catalog state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When this snapshot was written.
    pub snapshot_at: DateTime<Utc>,

    /// Next feature ID to assign.
    pub next_feature_id: u64,

    /// Next publication ID to assign.
    pub next_publication_id: u64,

    #[serde(default)]
    pub features: Vec<FeatureRecord>,

    #[serde(default)]
    pub publications: Vec<PublicationRequest>,

    #[serde(default)]
    pub drafts: Vec<ScenarioDraft>,
}

impl CatalogSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        CatalogSnapshot {
            schema_version: SCHEMA_VERSION,
            snapshot_at: Utc::now(),
            next_feature_id: 1,
            next_publication_id: 1,
            features: Vec::new(),
            publications: Vec::new(),
            drafts: Vec::new(),
        }
    }
}

impl Default for CatalogSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Saves a snapshot atomically to disk.
pub fn save_snapshot_atomic(path: &Path, snapshot: &CatalogSnapshot) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Loads a snapshot, rejecting any schema version but the current one.
pub fn load_snapshot(path: &Path) -> Result<CatalogSnapshot> {
    let bytes = std::fs::read(path)?;
    let snapshot: CatalogSnapshot = serde_json::from_slice(&bytes)?;

    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }

    Ok(snapshot)
}

/// Like [`load_snapshot`], but a missing file is a fresh store rather than an
/// error.
pub fn try_load_snapshot(path: &Path) -> Result<Option<CatalogSnapshot>> {
    match load_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

//! Persistence for the feature catalog, publication requests and scenario drafts.
//!
//! The rest of the crate sees storage only through three traits:
//!
//! - [`FeatureCatalog`]: feature records keyed by unique file path
//! - [`PublicationStore`]: publication requests, at most one non-terminal request
//!   per (scenario, target branch)
//! - [`ScenarioDrafts`]: the publishable content of a scenario
//!
//! Two implementations share one in-memory model ([`catalog::CatalogState`]):
//!
//! - [`MemoryStore`]: process-local, for tests and single-shot runs
//! - [`FileStore`]: the same state written as a JSON snapshot after every
//!   mutation, reloaded under a lock file so several processes can share it
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   catalog.json      # snapshot (schema_version, snapshot_at, records, id counters)
//!   catalog.lock      # present while a writer holds the lock (contains its pid)
//! ```
//!
//! # Crash Safety
//!
//! Snapshots are written atomically (see [`fsync::write_atomic`]). A mutation
//! that fails to persist is not applied in memory either.

use thiserror::Error;

use crate::types::{
    FeatureId, FeatureRecord, NewFeature, NewPublication, PublicationId, PublicationRequest,
    PublicationStatus, ScenarioDraft, ScenarioId,
};

pub mod catalog;
pub mod file_store;
pub mod fsync;
pub mod memory;
pub mod snapshot;

pub use catalog::CatalogState;
pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use snapshot::{CatalogSnapshot, SCHEMA_VERSION, SnapshotError};

/// Errors that can occur in a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot could not be loaded or saved.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Persisted feature records.
pub trait FeatureCatalog: Send + Sync {
    fn find_feature_by_path(&self, file_path: &str) -> Result<Option<FeatureRecord>>;

    /// Creates a record. Fails with [`StoreError::Conflict`] if the path is taken.
    fn create_feature(&self, feature: NewFeature) -> Result<FeatureRecord>;

    /// Replaces an existing record. Fails with [`StoreError::NotFound`] if absent.
    fn update_feature(&self, record: &FeatureRecord) -> Result<()>;

    fn get_feature(&self, id: FeatureId) -> Result<Option<FeatureRecord>>;

    /// All recorded file paths, sorted.
    fn list_feature_paths(&self) -> Result<Vec<String>>;
}

/// Persisted publication requests.
pub trait PublicationStore: Send + Sync {
    /// Creates a `Pending` request.
    ///
    /// Fails with [`StoreError::Conflict`] while another non-terminal request
    /// exists for the same scenario and target branch.
    fn create_publication(&self, new: NewPublication) -> Result<PublicationRequest>;

    /// Replaces an existing request. Fails with [`StoreError::NotFound`] if absent.
    fn update_publication(&self, request: &PublicationRequest) -> Result<()>;

    fn get_publication(&self, id: PublicationId) -> Result<Option<PublicationRequest>>;

    /// The non-terminal request for the pair, if any.
    fn find_active_publication(
        &self,
        scenario_id: &ScenarioId,
        target_branch: &str,
    ) -> Result<Option<PublicationRequest>>;

    /// Requests whose status has the same name as `status`, oldest first.
    fn list_publications_by_status(
        &self,
        status: &PublicationStatus,
    ) -> Result<Vec<PublicationRequest>>;
}

/// Scenario content prepared for publication.
pub trait ScenarioDrafts: Send + Sync {
    fn get_draft(&self, scenario_id: &ScenarioId) -> Result<Option<ScenarioDraft>>;

    /// Inserts or replaces the draft for its scenario.
    fn save_draft(&self, draft: ScenarioDraft) -> Result<()>;
}

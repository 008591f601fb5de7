//! Core domain types.
//!
//! Tasks and their payloads, the publication state machine, and feature catalog
//! records. Invariants that can be expressed in types live here; everything that
//! needs storage or I/O lives in the modules that own those concerns.

pub mod feature;
pub mod ids;
pub mod publication;
pub mod task;

pub use feature::{
    ContentHash, FeatureRecord, FeatureType, NewFeature, ScenarioDraft, ScenarioRecord,
};
pub use ids::{
    DeliveryTag, DraftId, EmulationRunId, FeatureId, PublicationId, ScenarioId, TaskId, TestRunId,
};
pub use publication::{
    BackendKind, InvalidTransition, NewPublication, PublicationRequest, PublicationStatus,
    ReviewRef, ReviewStatus, UnknownBackend,
};
pub use task::{Task, TaskPayload};

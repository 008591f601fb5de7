//! Units of work carried by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EmulationRunId, ScenarioId, TaskId, TestRunId};
use crate::queue::StreamKind;

/// What a task asks a worker to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Execute the scenarios of a test run.
    RunTests { test_run_id: TestRunId },

    /// Start an emulation session.
    RunEmulation { emulation_run_id: EmulationRunId },

    /// Publish a scenario as a review request against `target_branch`.
    PublishFeature {
        scenario_id: ScenarioId,
        target_branch: String,
    },
}

impl TaskPayload {
    /// Returns the stream this payload must be enqueued on.
    pub fn stream_kind(&self) -> StreamKind {
        match self {
            TaskPayload::RunTests { .. } => StreamKind::Test,
            TaskPayload::RunEmulation { .. } => StreamKind::Emulation,
            TaskPayload::PublishFeature { .. } => StreamKind::Publication,
        }
    }

    /// Short variant name for logs.
    pub fn variant_name(&self) -> &'static str {
        match self {
            TaskPayload::RunTests { .. } => "run_tests",
            TaskPayload::RunEmulation { .. } => "run_emulation",
            TaskPayload::PublishFeature { .. } => "publish_feature",
        }
    }
}

/// An immutable unit of work.
///
/// The queue owns a task from `enqueue` until it is acknowledged or dead-lettered.
/// Only `attempt_count` changes over the task's life, and only through redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub stream: StreamKind,
    pub payload: TaskPayload,
    pub created_at: DateTime<Utc>,

    /// Number of earlier deliveries that failed. Zero on first delivery.
    #[serde(default)]
    pub attempt_count: u32,
}

impl Task {
    /// Creates a new task on the payload's own stream.
    pub fn new(payload: TaskPayload) -> Self {
        Task {
            id: TaskId::generate(),
            stream: payload.stream_kind(),
            payload,
            created_at: Utc::now(),
            attempt_count: 0,
        }
    }

    /// Returns a copy of this task as it looks on its next delivery.
    pub fn redelivered(&self, attempt_count: u32) -> Self {
        Task {
            attempt_count,
            ..self.clone()
        }
    }
}

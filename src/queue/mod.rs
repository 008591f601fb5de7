//! Durable, at-least-once task queue.
//!
//! Producers append tasks to a [`Stream`]; consumers in the stream's consumer
//! group compete for them. The contract the rest of the crate relies on:
//!
//! - `enqueue` appends a durable record and never waits for a consumer.
//! - `claim` returns up to `max_items` pending tasks, blocking at most
//!   `block_timeout`. A timeout is an empty batch, not an error.
//! - Every claimed task comes with a [`DeliveryHandle`]. Exactly one of
//!   `acknowledge`, `requeue` or `dead_letter` consumes it. `renew` keeps the
//!   claim alive while the task runs.
//! - Two consumers of one group never hold the same task at the same time. The
//!   backend provides that exclusion; callers add no locking of their own.
//!
//! # Backends
//!
//! - [`SpoolQueue`]: filesystem spool with exclusive-create claim markers.
//!
//! # Module Structure
//!
//! - [`stream`]: stream names and consumer groups
//! - [`entry`]: on-disk layout of one task and its markers
//! - [`drain`]: scanning, lease recovery and housekeeping
//! - [`spool`]: the [`SpoolQueue`] backend

use std::future::Future;
use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorKind, TaskFailure};
use crate::types::{DeliveryTag, Task, TaskId, TaskPayload};

pub mod drain;
pub mod entry;
pub mod spool;
pub mod stream;

pub use spool::{SpoolConfig, SpoolQueue};
pub use stream::{Stream, StreamKind, UnknownStream};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// IO error on the spool.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A record on the spool could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The claim behind a delivery handle no longer belongs to it.
    #[error("stale delivery {tag} for task {task_id}")]
    StaleDelivery { task_id: TaskId, tag: DeliveryTag },

    /// The payload does not belong on the target stream.
    #[error("payload {payload} does not belong on stream {stream}")]
    MismatchedStream { payload: &'static str, stream: String },

    /// Task ID unusable as a file name.
    #[error("invalid task ID: {0}")]
    InvalidTaskId(TaskId),

    /// The task does not exist on the stream.
    #[error("task not found: {0}")]
    NotFound(TaskId),
}

impl QueueError {
    /// Queue failures surface to handlers and runners as infrastructure errors.
    pub fn to_failure(&self) -> TaskFailure {
        TaskFailure::new(ErrorKind::TransientInfra, self.to_string())
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Proof of a claimed, unsettled task.
///
/// Deliberately not `Clone`: settling consumes the handle, so one delivery can be
/// acknowledged, requeued or dead-lettered once.
#[derive(Debug, PartialEq, Eq)]
pub struct DeliveryHandle {
    pub task_id: TaskId,
    pub stream: Stream,
    pub delivery_tag: DeliveryTag,
}

/// How a failed task comes back.
#[derive(Debug, Clone, PartialEq)]
pub struct Redelivery {
    /// The task's `attempt_count` on its next delivery.
    pub attempt_count: u32,

    /// Minimum time before the task becomes claimable again.
    pub delay: Duration,

    /// The failure that caused the requeue.
    pub failure: TaskFailure,
}

/// A task removed from active retry, with the failure that ended it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: Task,
    pub failure: TaskFailure,
    /// Total deliveries made, the last one included.
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(task: Task, failure: TaskFailure, attempts: u32) -> Self {
        DeadLetter {
            task,
            failure,
            attempts,
            dead_lettered_at: Utc::now(),
        }
    }
}

/// One entry of a consumer group's pending set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub task_id: TaskId,
    pub attempt_count: u32,
    /// Consumer currently holding the task, if claimed.
    pub claimed_by: Option<String>,
    /// Earliest time the task may be claimed again, if it was requeued with a delay.
    pub not_before: Option<DateTime<Utc>>,
}

/// Appends tasks to streams.
pub trait TaskProducer {
    /// Appends a durable task and returns its ID.
    ///
    /// Fails with [`QueueError::MismatchedStream`] if the payload belongs on a
    /// different stream.
    fn enqueue(
        &self,
        stream: &Stream,
        payload: TaskPayload,
    ) -> impl Future<Output = Result<TaskId>> + Send;
}

/// Claims and settles tasks within a consumer group.
pub trait TaskConsumer {
    /// Claims up to `max_items` tasks, waiting up to `block_timeout` for any.
    fn claim(
        &self,
        stream: &Stream,
        max_items: usize,
        block_timeout: Duration,
    ) -> impl Future<Output = Result<Vec<(Task, DeliveryHandle)>>> + Send;

    /// Extends the claim behind `handle` so a long-running task is not taken
    /// over by another consumer.
    ///
    /// Fails with [`QueueError::StaleDelivery`] if the claim already moved on.
    fn renew(&self, handle: &DeliveryHandle) -> impl Future<Output = Result<()>> + Send;

    /// Removes the task from the group's pending set for good.
    fn acknowledge(&self, handle: DeliveryHandle) -> impl Future<Output = Result<()>> + Send;

    /// Returns the task to the pending set for another delivery.
    fn requeue(
        &self,
        handle: DeliveryHandle,
        redelivery: Redelivery,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Records the dead letter, then acknowledges the task.
    fn dead_letter(
        &self,
        handle: DeliveryHandle,
        record: DeadLetter,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub(crate) fn check_stream(stream: &Stream, payload: &TaskPayload) -> Result<()> {
    if payload.stream_kind() != stream.kind {
        return Err(QueueError::MismatchedStream {
            payload: payload.variant_name(),
            stream: stream.name.clone(),
        });
    }
    Ok(())
}

//! On-disk layout of spooled tasks.
//!
//! ```text
//! <root>/<stream>/<task-id>.json               task (shared by all groups)
//! <root>/<stream>/<group>/<task-id>.claim      claim record
//! <root>/<stream>/<group>/<task-id>.retry      redelivery record
//! <root>/<stream>/<group>/<task-id>.done       acknowledged marker
//! <root>/<stream>/<group>/dead/<task-id>.json  dead letter
//! ```
//!
//! A task is pending for a group while its payload exists and the group has no
//! `.done` marker for it. The `.claim` marker says who holds it right now; the
//! `.retry` record says how many deliveries failed and when it may come back.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::TaskFailure;
use crate::types::{DeliveryTag, TaskId};

use super::{QueueError, Result, Stream};

pub(crate) const TASK_EXT: &str = "json";
pub(crate) const CLAIM_EXT: &str = "claim";
pub(crate) const RETRY_EXT: &str = "retry";
pub(crate) const DONE_EXT: &str = "done";
pub(crate) const QUARANTINE_EXT: &str = "corrupt";
pub(crate) const DEAD_DIR: &str = "dead";

/// Who holds a task and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub consumer: String,
    pub delivery_tag: DeliveryTag,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimRecord {
    /// A claim older than the lease belongs to a consumer that is gone.
    pub fn is_expired(&self, lease: std::time::Duration, now: DateTime<Utc>) -> bool {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        match self.claimed_at.checked_add_signed(lease) {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}

/// State carried between failed deliveries of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub attempt_count: u32,
    pub not_before: DateTime<Utc>,
    pub last_failure: TaskFailure,
}

/// Paths of one stream as seen by one consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDirs {
    /// `<root>/<stream>`: task payloads.
    pub stream_dir: PathBuf,
    /// `<root>/<stream>/<group>`: this group's markers.
    pub group_dir: PathBuf,
    /// `<root>/<stream>/<group>/dead`: this group's dead letters.
    pub dead_dir: PathBuf,
}

impl StreamDirs {
    pub fn new(root: &Path, stream: &Stream) -> Self {
        let stream_dir = root.join(&stream.name);
        let group_dir = stream_dir.join(&stream.consumer_group);
        let dead_dir = group_dir.join(DEAD_DIR);
        StreamDirs {
            stream_dir,
            group_dir,
            dead_dir,
        }
    }

    /// Creates the directories if they do not exist yet.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dead_dir)
    }

    pub fn entry(&self, task_id: &TaskId) -> Result<TaskEntry> {
        if !task_id.is_path_safe() {
            return Err(QueueError::InvalidTaskId(task_id.clone()));
        }
        let id = task_id.as_str();
        Ok(TaskEntry {
            task_id: task_id.clone(),
            payload_path: self.stream_dir.join(format!("{id}.{TASK_EXT}")),
            claim_path: self.group_dir.join(format!("{id}.{CLAIM_EXT}")),
            retry_path: self.group_dir.join(format!("{id}.{RETRY_EXT}")),
            done_path: self.group_dir.join(format!("{id}.{DONE_EXT}")),
            dead_path: self.dead_dir.join(format!("{id}.{TASK_EXT}")),
        })
    }
}

/// All paths belonging to one task within one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub task_id: TaskId,
    pub payload_path: PathBuf,
    pub claim_path: PathBuf,
    pub retry_path: PathBuf,
    pub done_path: PathBuf,
    pub dead_path: PathBuf,
}

impl TaskEntry {
    /// Where an unreadable payload is moved so it stops blocking scans.
    pub fn quarantine_path(&self) -> PathBuf {
        self.payload_path.with_extension(QUARANTINE_EXT)
    }

    /// Temporary name for a claim being inspected by a reclaiming consumer.
    pub fn reap_path(&self, tag: &DeliveryTag) -> PathBuf {
        self.claim_path.with_extension(format!("reap-{}", tag.as_str()))
    }

    pub fn is_done(&self) -> bool {
        self.done_path.exists()
    }

    pub fn is_pending(&self) -> bool {
        self.payload_path.exists() && !self.is_done()
    }

    pub fn read_claim(&self) -> Result<Option<ClaimRecord>> {
        read_optional(&self.claim_path)
    }

    pub fn read_retry(&self) -> Result<Option<RetryRecord>> {
        read_optional(&self.retry_path)
    }
}

/// Reads a JSON record, returning `None` if the file does not exist.
pub(crate) fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Extracts the task ID from `<task-id>.<ext>` if the extension matches.
pub(crate) fn task_id_from_path(path: &Path, ext: &str) -> Option<TaskId> {
    if path.extension().is_none_or(|e| e != ext) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let id = TaskId::new(stem);
    id.is_path_safe().then_some(id)
}

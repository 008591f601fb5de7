//! Scanning a stream directory.
//!
//! Everything here is a read-mostly pass over the spool: listing pending tasks
//! in claim order, describing a group's pending set, reading dead letters, and
//! removing tasks acknowledged long enough ago.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::persistence::fsync::{fsync_dir, remove_if_exists};
use crate::types::TaskId;

use super::entry::{DONE_EXT, StreamDirs, TASK_EXT, read_optional, task_id_from_path};
use super::{DeadLetter, PendingEntry, Result};

/// Returns the IDs of all tasks on the stream, in claim order.
///
/// Task IDs sort by creation time, so sorting the file names gives FIFO order.
pub fn list_task_ids(dirs: &StreamDirs) -> Result<Vec<TaskId>> {
    if !dirs.stream_dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&dirs.stream_dir)? {
        let path = entry?.path();
        if path.is_file()
            && let Some(id) = task_id_from_path(&path, TASK_EXT)
        {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Describes every task the group has not acknowledged yet.
pub fn pending_entries(dirs: &StreamDirs) -> Result<Vec<PendingEntry>> {
    let mut pending = Vec::new();
    for task_id in list_task_ids(dirs)? {
        let entry = dirs.entry(&task_id)?;
        if entry.is_done() {
            continue;
        }
        let retry = entry.read_retry()?;
        let claim = entry.read_claim()?;
        pending.push(PendingEntry {
            task_id,
            attempt_count: retry.as_ref().map_or(0, |r| r.attempt_count),
            claimed_by: claim.map(|c| c.consumer),
            not_before: retry.map(|r| r.not_before),
        });
    }
    Ok(pending)
}

/// Counts the group's pending tasks without reading any records.
pub fn count_pending(dirs: &StreamDirs) -> Result<usize> {
    let mut count = 0;
    for task_id in list_task_ids(dirs)? {
        if !dirs.entry(&task_id)?.is_done() {
            count += 1;
        }
    }
    Ok(count)
}

/// Reads the group's dead letters, oldest task first.
pub fn dead_letters(dirs: &StreamDirs) -> Result<Vec<DeadLetter>> {
    if !dirs.dead_dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&dirs.dead_dir)? {
        let path = entry?.path();
        if let Some(id) = task_id_from_path(&path, TASK_EXT) {
            ids.push(id);
        }
    }
    ids.sort();

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let entry = dirs.entry(&id)?;
        if let Some(record) = read_optional::<DeadLetter>(&entry.dead_path)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Removes tasks the group acknowledged more than `grace_period` ago.
///
/// The shared payload goes only once every consumer group present on the
/// stream has acknowledged the task, and the group's markers go with it. Until
/// then the `.done` marker is what keeps the task from being redelivered to
/// this group, so it stays. Markers left behind after another group removed
/// the payload are dropped. Dead letters are kept. Returns the number of tasks
/// whose markers were removed.
pub fn cleanup_acknowledged(dirs: &StreamDirs, grace_period: Duration) -> Result<usize> {
    if !dirs.group_dir.exists() {
        return Ok(0);
    }

    // If the subtraction underflows nothing is old enough.
    let cutoff = SystemTime::now()
        .checked_sub(grace_period)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for dir_entry in std::fs::read_dir(&dirs.group_dir)? {
        let path = dir_entry?.path();
        let Some(task_id) = task_id_from_path(&path, DONE_EXT) else {
            continue;
        };
        let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }

        let entry = dirs.entry(&task_id)?;
        if entry.payload_path.exists() {
            if !acknowledged_by_all_groups(&dirs.stream_dir, &task_id)? {
                continue;
            }
            remove_if_exists(&entry.payload_path)?;
        }
        remove_if_exists(&entry.claim_path)?;
        remove_if_exists(&entry.retry_path)?;
        remove_if_exists(&entry.done_path)?;
        removed += 1;
        debug!(task_id = %task_id, "Removed acknowledged task");
    }

    if removed > 0 {
        fsync_dir(&dirs.group_dir)?;
        fsync_dir(&dirs.stream_dir)?;
    }
    Ok(removed)
}

fn acknowledged_by_all_groups(stream_dir: &Path, task_id: &TaskId) -> Result<bool> {
    for dir_entry in std::fs::read_dir(stream_dir)? {
        let group_dir = dir_entry?.path();
        if !group_dir.is_dir() {
            continue;
        }
        let done = group_dir.join(format!("{}.{DONE_EXT}", task_id.as_str()));
        if !done.exists() {
            debug!(
                task_id = %task_id,
                group = %group_dir.display(),
                "Keeping task still pending for another group"
            );
            return Ok(false);
        }
    }
    Ok(true)
}

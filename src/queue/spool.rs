//! Filesystem-backed queue.
//!
//! Durable across restarts: tasks, claims and retry records are files written
//! with temp-file + fsync + rename + directory fsync. Claims are exclusive
//! creates, so consumers in one group (threads or processes sharing the spool
//! directory) never hold the same task at the same time.
//!
//! A consumer that dies mid-task leaves its claim behind. Once the claim is older
//! than the lease, the next claim pass takes it over and the task is delivered
//! again. That is the at-least-once half of the contract. A live consumer keeps
//! its claim fresh with `renew`, and a takeover counts as a failed delivery so a
//! task that keeps killing its consumer still runs out of attempts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::TaskFailure;
use crate::persistence::fsync::{create_exclusive, fsync_dir, remove_if_exists, write_atomic};
use crate::types::{DeliveryTag, Task, TaskId, TaskPayload};

use super::drain;
use super::entry::{ClaimRecord, RetryRecord, StreamDirs, TaskEntry, read_optional};
use super::{
    DeadLetter, DeliveryHandle, PendingEntry, QueueError, Redelivery, Result, Stream, TaskConsumer,
    TaskProducer, check_stream,
};

/// Default claim lease.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(10 * 60);

/// Default pause between scans while a claim call is blocking.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(200);

/// Settings for a [`SpoolQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolConfig {
    /// Root directory shared by every stream.
    pub root: PathBuf,

    /// Name recorded in claims made through this queue handle.
    pub consumer_name: String,

    /// Age after which a claim is considered abandoned.
    pub claim_lease: Duration,

    /// Pause between scans while blocking in `claim`.
    pub scan_interval: Duration,
}

impl SpoolConfig {
    pub fn new(root: impl Into<PathBuf>, consumer_name: impl Into<String>) -> Self {
        SpoolConfig {
            root: root.into(),
            consumer_name: consumer_name.into(),
            claim_lease: DEFAULT_CLAIM_LEASE,
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }
}

/// Producer and consumer over a spool directory.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    config: SpoolConfig,
}

/// What happened when trying to claim one task.
enum ClaimAttempt {
    Claimed(Task, DeliveryHandle),
    Skipped,
}

/// What an existing claim turned out to be.
enum Reap {
    /// Still within its lease.
    Held,
    /// Gone before we could look at it.
    Released,
    /// Expired and moved aside. Carries the consumer that held it, if readable.
    Expired(Option<String>),
}

impl SpoolQueue {
    pub fn new(config: SpoolConfig) -> Self {
        SpoolQueue { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn consumer_name(&self) -> &str {
        &self.config.consumer_name
    }

    fn dirs(&self, stream: &Stream) -> StreamDirs {
        StreamDirs::new(&self.config.root, stream)
    }

    fn next_delivery_tag(&self) -> DeliveryTag {
        DeliveryTag::new(format!(
            "{}:{}",
            self.config.consumer_name,
            TaskId::generate()
        ))
    }

    /// The group's pending set: unacknowledged tasks, claimed or not.
    pub fn pending(&self, stream: &Stream) -> Result<Vec<PendingEntry>> {
        drain::pending_entries(&self.dirs(stream))
    }

    pub fn pending_count(&self, stream: &Stream) -> Result<usize> {
        drain::count_pending(&self.dirs(stream))
    }

    pub fn dead_letters(&self, stream: &Stream) -> Result<Vec<DeadLetter>> {
        drain::dead_letters(&self.dirs(stream))
    }

    /// Removes tasks acknowledged more than `grace_period` ago.
    pub fn cleanup_acknowledged(&self, stream: &Stream, grace_period: Duration) -> Result<usize> {
        let removed = drain::cleanup_acknowledged(&self.dirs(stream), grace_period)?;
        if removed > 0 {
            info!(stream = %stream, removed, "Cleaned up acknowledged tasks");
        }
        Ok(removed)
    }

    /// One pass over the stream, claiming up to `max_items` tasks.
    fn scan_once(&self, stream: &Stream, max_items: usize) -> Result<Vec<(Task, DeliveryHandle)>> {
        let dirs = self.dirs(stream);
        dirs.ensure()?;

        let mut batch = Vec::new();
        for task_id in drain::list_task_ids(&dirs)? {
            if batch.len() >= max_items {
                break;
            }
            let entry = dirs.entry(&task_id)?;
            if let ClaimAttempt::Claimed(task, handle) = self.try_claim(stream, &entry)? {
                batch.push((task, handle));
            }
        }
        Ok(batch)
    }

    fn try_claim(&self, stream: &Stream, entry: &TaskEntry) -> Result<ClaimAttempt> {
        if entry.is_done() {
            return Ok(ClaimAttempt::Skipped);
        }

        let now = Utc::now();
        let retry = entry.read_retry()?;
        if let Some(retry) = &retry
            && retry.not_before > now
        {
            return Ok(ClaimAttempt::Skipped);
        }

        let tag = self.next_delivery_tag();
        let claim = ClaimRecord {
            consumer: self.config.consumer_name.clone(),
            delivery_tag: tag.clone(),
            claimed_at: now,
        };
        let claim_bytes = serde_json::to_vec(&claim)?;

        let mut expired_holder = None;
        if !create_exclusive(&entry.claim_path, &claim_bytes)? {
            match self.reap_expired_claim(entry, &tag)? {
                Reap::Held => return Ok(ClaimAttempt::Skipped),
                Reap::Released => {}
                Reap::Expired(holder) => {
                    expired_holder = Some(holder.unwrap_or_else(|| "unknown".into()));
                }
            }
            if !create_exclusive(&entry.claim_path, &claim_bytes)? {
                return Ok(ClaimAttempt::Skipped);
            }
        }

        // Acknowledgement writes `.done` before dropping its claim, so a task can
        // be acknowledged between our first check and our claim.
        if entry.is_done() {
            remove_if_exists(&entry.claim_path)?;
            return Ok(ClaimAttempt::Skipped);
        }

        let task = match read_optional::<Task>(&entry.payload_path) {
            Ok(Some(task)) => task,
            Ok(None) => {
                remove_if_exists(&entry.claim_path)?;
                return Ok(ClaimAttempt::Skipped);
            }
            Err(QueueError::Json(e)) => {
                warn!(
                    task_id = %entry.task_id,
                    error = %e,
                    "Quarantining unreadable task payload"
                );
                std::fs::rename(&entry.payload_path, entry.quarantine_path())?;
                remove_if_exists(&entry.claim_path)?;
                return Ok(ClaimAttempt::Skipped);
            }
            Err(e) => {
                remove_if_exists(&entry.claim_path)?;
                return Err(e);
            }
        };

        let retry = match expired_holder {
            // The previous holder may have written a retry record before its lease ran out.
            Some(_) => entry.read_retry()?,
            None => retry,
        };
        let mut attempt_count = retry.map_or(task.attempt_count, |r| r.attempt_count);
        if let Some(holder) = expired_holder {
            attempt_count = attempt_count.saturating_add(1);
            let record = RetryRecord {
                attempt_count,
                not_before: now,
                last_failure: TaskFailure::transient(format!(
                    "claim held by {holder} expired before the task was settled"
                )),
            };
            write_atomic(&entry.retry_path, &serde_json::to_vec(&record)?)?;
        }
        let task = task.redelivered(attempt_count);

        debug!(
            stream = %stream,
            task_id = %task.id,
            attempt_count,
            delivery_tag = %tag,
            "Claimed task"
        );

        let handle = DeliveryHandle {
            task_id: task.id.clone(),
            stream: stream.clone(),
            delivery_tag: tag,
        };
        Ok(ClaimAttempt::Claimed(task, handle))
    }

    /// Takes over a claim whose lease has run out.
    ///
    /// Renaming is atomic, so of several consumers racing for the same expired
    /// claim exactly one moves it aside. The mover checks the record it actually
    /// moved: if a fresh claim replaced the expired one in the meantime, it is
    /// linked back into place.
    fn reap_expired_claim(&self, entry: &TaskEntry, tag: &DeliveryTag) -> Result<Reap> {
        let now = Utc::now();
        match entry.read_claim() {
            Ok(Some(claim)) if claim.is_expired(self.config.claim_lease, now) => {}
            Ok(Some(_)) => return Ok(Reap::Held),
            Ok(None) => return Ok(Reap::Released),
            // A claim that cannot be parsed was torn by a crash; treat it as abandoned.
            Err(QueueError::Json(_)) => {}
            Err(e) => return Err(e),
        }

        let reap_path = entry.reap_path(tag);
        match std::fs::rename(&entry.claim_path, &reap_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Reap::Held),
            Err(e) => return Err(e.into()),
        }

        let reaped: Option<ClaimRecord> = read_optional(&reap_path).unwrap_or(None);
        if let Some(reaped) = &reaped
            && !reaped.is_expired(self.config.claim_lease, now)
        {
            match std::fs::hard_link(&reap_path, &entry.claim_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
            remove_if_exists(&reap_path)?;
            return Ok(Reap::Held);
        }

        remove_if_exists(&reap_path)?;
        warn!(
            task_id = %entry.task_id,
            previous_consumer = reaped.as_ref().map_or("unknown", |c| c.consumer.as_str()),
            "Reclaiming task from expired claim"
        );
        Ok(Reap::Expired(reaped.map(|c| c.consumer)))
    }

    /// Confirms the claim on disk still belongs to `handle`.
    fn verify_claim(&self, entry: &TaskEntry, handle: &DeliveryHandle) -> Result<()> {
        match entry.read_claim()? {
            Some(claim) if claim.delivery_tag == handle.delivery_tag => Ok(()),
            _ => Err(QueueError::StaleDelivery {
                task_id: handle.task_id.clone(),
                tag: handle.delivery_tag.clone(),
            }),
        }
    }

    fn entry_for(&self, handle: &DeliveryHandle) -> Result<(StreamDirs, TaskEntry)> {
        let dirs = self.dirs(&handle.stream);
        let entry = dirs.entry(&handle.task_id)?;
        Ok((dirs, entry))
    }

    fn mark_done(entry: &TaskEntry, dirs: &StreamDirs) -> Result<()> {
        let marker = serde_json::to_vec(&Utc::now())?;
        create_exclusive(&entry.done_path, &marker)?;
        remove_if_exists(&entry.retry_path)?;
        remove_if_exists(&entry.claim_path)?;
        fsync_dir(&dirs.group_dir)?;
        Ok(())
    }
}

impl TaskProducer for SpoolQueue {
    #[instrument(skip(self, stream, payload), fields(stream = %stream, payload = payload.variant_name()))]
    async fn enqueue(&self, stream: &Stream, payload: TaskPayload) -> Result<TaskId> {
        check_stream(stream, &payload)?;

        let task = Task::new(payload);
        let dirs = self.dirs(stream);
        let entry = dirs.entry(&task.id)?;
        write_atomic(&entry.payload_path, &serde_json::to_vec(&task)?)?;

        debug!(task_id = %task.id, "Enqueued task");
        Ok(task.id)
    }
}

impl TaskConsumer for SpoolQueue {
    async fn claim(
        &self,
        stream: &Stream,
        max_items: usize,
        block_timeout: Duration,
    ) -> Result<Vec<(Task, DeliveryHandle)>> {
        let deadline = tokio::time::Instant::now() + block_timeout;
        loop {
            let batch = self.scan_once(stream, max_items.max(1))?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(self.config.scan_interval)).await;
        }
    }

    async fn renew(&self, handle: &DeliveryHandle) -> Result<()> {
        let (_, entry) = self.entry_for(handle)?;
        let now = Utc::now();
        match entry.read_claim()? {
            // An expired claim may be mid-takeover; renewing it could clobber the new one.
            Some(claim)
                if claim.delivery_tag == handle.delivery_tag
                    && !claim.is_expired(self.config.claim_lease, now) =>
            {
                let renewed = ClaimRecord {
                    claimed_at: now,
                    ..claim
                };
                write_atomic(&entry.claim_path, &serde_json::to_vec(&renewed)?)?;
                debug!(task_id = %handle.task_id, delivery_tag = %handle.delivery_tag, "Renewed claim");
                Ok(())
            }
            _ => Err(QueueError::StaleDelivery {
                task_id: handle.task_id.clone(),
                tag: handle.delivery_tag.clone(),
            }),
        }
    }

    async fn acknowledge(&self, handle: DeliveryHandle) -> Result<()> {
        let (dirs, entry) = self.entry_for(&handle)?;
        self.verify_claim(&entry, &handle)?;
        Self::mark_done(&entry, &dirs)?;
        debug!(task_id = %handle.task_id, stream = %handle.stream, "Acknowledged task");
        Ok(())
    }

    async fn requeue(&self, handle: DeliveryHandle, redelivery: Redelivery) -> Result<()> {
        let (dirs, entry) = self.entry_for(&handle)?;
        self.verify_claim(&entry, &handle)?;

        let delay = chrono::Duration::from_std(redelivery.delay).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let record = RetryRecord {
            attempt_count: redelivery.attempt_count,
            not_before: now.checked_add_signed(delay).unwrap_or(now),
            last_failure: redelivery.failure,
        };
        write_atomic(&entry.retry_path, &serde_json::to_vec(&record)?)?;
        remove_if_exists(&entry.claim_path)?;
        fsync_dir(&dirs.group_dir)?;

        debug!(
            task_id = %handle.task_id,
            attempt_count = record.attempt_count,
            not_before = %record.not_before,
            "Requeued task"
        );
        Ok(())
    }

    async fn dead_letter(&self, handle: DeliveryHandle, record: DeadLetter) -> Result<()> {
        let (dirs, entry) = self.entry_for(&handle)?;
        self.verify_claim(&entry, &handle)?;

        // Record first: a crash between the two writes redelivers the task rather
        // than losing the dead letter.
        write_atomic(&entry.dead_path, &serde_json::to_vec_pretty(&record)?)?;
        Self::mark_done(&entry, &dirs)?;

        warn!(
            task_id = %handle.task_id,
            stream = %handle.stream,
            kind = %record.failure.kind,
            attempts = record.attempts,
            "Dead-lettered task"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::queue::StreamKind;
    use crate::types::{ScenarioId, TestRunId};
    use tempfile::tempdir;

    fn queue(root: &Path, consumer: &str) -> SpoolQueue {
        SpoolQueue::new(SpoolConfig::new(root, consumer).with_scan_interval(Duration::from_millis(5)))
    }

    fn run_tests(n: u64) -> TaskPayload {
        TaskPayload::RunTests {
            test_run_id: TestRunId(n),
        }
    }

    fn test_stream() -> Stream {
        Stream::for_kind(StreamKind::Test)
    }

    #[tokio::test]
    async fn enqueue_then_claim_in_order() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let stream = test_stream();

        let first = q.enqueue(&stream, run_tests(1)).await.unwrap();
        let second = q.enqueue(&stream, run_tests(2)).await.unwrap();

        let batch = q.claim(&stream, 10, Duration::ZERO).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|(t, _)| t.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(batch.iter().all(|(t, _)| t.attempt_count == 0));
    }

    #[tokio::test]
    async fn enqueue_rejects_mismatched_stream() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let err = q
            .enqueue(&Stream::for_kind(StreamKind::Publication), run_tests(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::MismatchedStream { .. }));
    }

    #[tokio::test]
    async fn claim_times_out_with_empty_batch() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let batch = q
            .claim(&test_stream(), 1, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn claimed_task_is_invisible_to_other_consumers() {
        let dir = tempdir().unwrap();
        let a = queue(dir.path(), "a");
        let b = queue(dir.path(), "b");
        let stream = test_stream();
        a.enqueue(&stream, run_tests(1)).await.unwrap();

        let got_a = a.claim(&stream, 1, Duration::ZERO).await.unwrap();
        let got_b = b.claim(&stream, 1, Duration::ZERO).await.unwrap();
        assert_eq!(got_a.len(), 1);
        assert!(got_b.is_empty());

        let pending = a.pending(&stream).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].claimed_by.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn acknowledge_removes_from_pending() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let stream = test_stream();
        q.enqueue(&stream, run_tests(1)).await.unwrap();

        let (_, handle) = q.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        q.acknowledge(handle).await.unwrap();

        assert_eq!(q.pending_count(&stream).unwrap(), 0);
        assert!(q.claim(&stream, 1, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requeue_carries_attempt_count_and_delay() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let stream = test_stream();
        q.enqueue(&stream, run_tests(1)).await.unwrap();

        let (_, handle) = q.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        q.requeue(
            handle,
            Redelivery {
                attempt_count: 1,
                delay: Duration::from_secs(3600),
                failure: TaskFailure::transient("connection refused"),
            },
        )
        .await
        .unwrap();

        // Not visible before not_before.
        assert!(q.claim(&stream, 1, Duration::ZERO).await.unwrap().is_empty());
        let pending = q.pending(&stream).unwrap();
        assert_eq!(pending[0].attempt_count, 1);
        assert!(pending[0].not_before.is_some());
        assert_eq!(pending[0].claimed_by, None);
    }

    #[tokio::test]
    async fn requeued_task_comes_back_with_new_attempt_count() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let stream = test_stream();
        let id = q.enqueue(&stream, run_tests(1)).await.unwrap();

        let (_, handle) = q.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        q.requeue(
            handle,
            Redelivery {
                attempt_count: 2,
                delay: Duration::ZERO,
                failure: TaskFailure::transient("timeout"),
            },
        )
        .await
        .unwrap();

        let (task, handle) = q.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(task.id, id);
        assert_eq!(task.attempt_count, 2);
        q.acknowledge(handle).await.unwrap();
    }

    #[tokio::test]
    async fn dead_letter_is_recorded_and_acknowledged() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let stream = Stream::for_kind(StreamKind::Publication);
        q.enqueue(
            &stream,
            TaskPayload::PublishFeature {
                scenario_id: ScenarioId::new("S1"),
                target_branch: "main".into(),
            },
        )
        .await
        .unwrap();

        let (task, handle) = q.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        let failure = TaskFailure::new(ErrorKind::ReviewSubmissionRejected, "409 conflict");
        q.dead_letter(handle, DeadLetter::new(task.clone(), failure, 1))
            .await
            .unwrap();

        assert_eq!(q.pending_count(&stream).unwrap(), 0);
        let dead = q.dead_letters(&stream).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task.id, task.id);
        assert_eq!(dead[0].failure.kind, ErrorKind::ReviewSubmissionRejected);
    }

    #[tokio::test]
    async fn expired_claim_is_reclaimed_and_old_handle_goes_stale() {
        let dir = tempdir().unwrap();
        let crashed = SpoolQueue::new(SpoolConfig::new(dir.path(), "crashed").with_claim_lease(Duration::ZERO));
        let survivor =
            SpoolQueue::new(SpoolConfig::new(dir.path(), "survivor").with_claim_lease(Duration::ZERO));
        let stream = test_stream();
        let id = crashed.enqueue(&stream, run_tests(1)).await.unwrap();

        let (_, stale) = crashed.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        let (task, fresh) = survivor.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(task.id, id);
        assert_ne!(stale.delivery_tag, fresh.delivery_tag);

        // The abandoned delivery counts as a failed one.
        assert_eq!(task.attempt_count, 1);
        assert_eq!(survivor.pending(&stream).unwrap()[0].attempt_count, 1);
        assert!(matches!(
            crashed.renew(&stale).await,
            Err(QueueError::StaleDelivery { .. })
        ));

        let err = crashed.acknowledge(stale).await.unwrap_err();
        assert!(matches!(err, QueueError::StaleDelivery { .. }));
        survivor.acknowledge(fresh).await.unwrap();
        assert_eq!(survivor.pending_count(&stream).unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_takeovers_accumulate_attempts() {
        let dir = tempdir().unwrap();
        let q = SpoolQueue::new(SpoolConfig::new(dir.path(), "w").with_claim_lease(Duration::ZERO));
        let stream = test_stream();
        q.enqueue(&stream, run_tests(1)).await.unwrap();

        for expected in 0..3 {
            let (task, _abandoned) = q.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
            assert_eq!(task.attempt_count, expected);
        }
        let retry = StreamDirs::new(dir.path(), &stream)
            .entry(&q.pending(&stream).unwrap()[0].task_id)
            .unwrap()
            .read_retry()
            .unwrap()
            .unwrap();
        assert_eq!(retry.attempt_count, 2);
        assert!(retry.last_failure.message.contains("claim held by w expired"));
    }

    #[tokio::test]
    async fn renewed_claim_outlives_its_original_lease() {
        let dir = tempdir().unwrap();
        let lease = Duration::from_millis(800);
        let a = SpoolQueue::new(SpoolConfig::new(dir.path(), "a").with_claim_lease(lease));
        let b = SpoolQueue::new(SpoolConfig::new(dir.path(), "b").with_claim_lease(lease));
        let stream = test_stream();
        a.enqueue(&stream, run_tests(1)).await.unwrap();

        let (_, handle) = a.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        for _ in 0..3 {
            tokio::time::sleep(lease / 2).await;
            a.renew(&handle).await.unwrap();
        }
        // Well past the original lease, the claim is still a's.
        assert!(b.claim(&stream, 1, Duration::ZERO).await.unwrap().is_empty());
        a.acknowledge(handle).await.unwrap();
        assert_eq!(a.pending_count(&stream).unwrap(), 0);
    }

    #[tokio::test]
    async fn unrenewed_claim_is_taken_over_and_settles_stale() {
        let dir = tempdir().unwrap();
        let lease = Duration::from_millis(50);
        let a = SpoolQueue::new(SpoolConfig::new(dir.path(), "a").with_claim_lease(lease));
        let b = SpoolQueue::new(SpoolConfig::new(dir.path(), "b").with_claim_lease(lease));
        let stream = test_stream();
        a.enqueue(&stream, run_tests(1)).await.unwrap();

        let (_, slow) = a.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        tokio::time::sleep(lease * 2).await;
        let (task, fresh) = b.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(task.attempt_count, 1);

        assert!(matches!(a.renew(&slow).await, Err(QueueError::StaleDelivery { .. })));
        assert!(matches!(
            a.acknowledge(slow).await,
            Err(QueueError::StaleDelivery { .. })
        ));
        b.acknowledge(fresh).await.unwrap();
    }

    #[tokio::test]
    async fn live_claim_is_not_reclaimed() {
        let dir = tempdir().unwrap();
        let a = queue(dir.path(), "a");
        let b = queue(dir.path(), "b");
        let stream = test_stream();
        a.enqueue(&stream, run_tests(1)).await.unwrap();

        let (_, handle) = a.claim(&stream, 1, Duration::ZERO).await.unwrap().remove(0);
        assert!(b.claim(&stream, 1, Duration::ZERO).await.unwrap().is_empty());
        a.acknowledge(handle).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_payload_is_quarantined() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let stream = test_stream();
        let dirs = StreamDirs::new(dir.path(), &stream);
        dirs.ensure().unwrap();
        let entry = dirs.entry(&TaskId::new("0000000000000001-bad")).unwrap();
        std::fs::write(&entry.payload_path, b"{not json").unwrap();

        let good = q.enqueue(&stream, run_tests(1)).await.unwrap();
        let batch = q.claim(&stream, 5, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.id, good);
        assert!(entry.quarantine_path().exists());
        assert!(!entry.claim_path.exists());
    }

    #[tokio::test]
    async fn separate_groups_each_receive_the_task() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let main = test_stream();
        let audit = test_stream().with_group("audit");
        let id = q.enqueue(&main, run_tests(1)).await.unwrap();

        let (t1, h1) = q.claim(&main, 1, Duration::ZERO).await.unwrap().remove(0);
        let (t2, h2) = q.claim(&audit, 1, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(t1.id, id);
        assert_eq!(t2.id, id);
        q.acknowledge(h1).await.unwrap();
        q.acknowledge(h2).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_does_not_redeliver_while_another_group_is_pending() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "w1");
        let main = test_stream();
        let audit = test_stream().with_group("audit");
        q.enqueue(&main, run_tests(1)).await.unwrap();

        let (_, audit_handle) = q.claim(&audit, 1, Duration::ZERO).await.unwrap().remove(0);
        let (_, main_handle) = q.claim(&main, 1, Duration::ZERO).await.unwrap().remove(0);
        q.acknowledge(main_handle).await.unwrap();

        assert_eq!(q.cleanup_acknowledged(&main, Duration::ZERO).unwrap(), 0);
        assert_eq!(q.pending_count(&main).unwrap(), 0);
        assert!(q.claim(&main, 1, Duration::ZERO).await.unwrap().is_empty());

        q.acknowledge(audit_handle).await.unwrap();
        assert_eq!(q.cleanup_acknowledged(&main, Duration::ZERO).unwrap(), 1);
        assert_eq!(q.cleanup_acknowledged(&audit, Duration::ZERO).unwrap(), 1);
        assert_eq!(q.pending_count(&audit).unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_share_a_task() {
        let dir = tempdir().unwrap();
        let stream = test_stream();
        let producer = queue(dir.path(), "producer");
        for n in 0..20 {
            producer.enqueue(&stream, run_tests(n)).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let q = queue(dir.path(), &format!("w{worker}"));
            let stream = stream.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    let batch = q.claim(&stream, 1, Duration::ZERO).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    for (task, handle) in batch {
                        seen.push(task.id.clone());
                        q.acknowledge(handle).await.unwrap();
                    }
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "a task was delivered twice");
        assert_eq!(all.len(), 20);
    }
}

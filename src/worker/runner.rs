//! The consumer runner: one supervised poll loop per stream.
//!
//! # Loop
//!
//! 1. `Polling`: claim up to `batch_size` tasks, blocking at most
//!    `block_timeout`. The claim is never interrupted.
//! 2. `Dispatching`: run the handler on each claimed task in turn, renewing
//!    its claim every `lease_renewal` until the handler returns. A task that
//!    arrives with its deliveries already used up (its earlier claims expired
//!    under consumers that died) is dead-lettered without running.
//! 3. Settle each task:
//!    - success: acknowledge (`Succeeded`)
//!    - retriable failure with deliveries left: requeue with a backoff delay
//!      (`Retrying`)
//!    - anything else: dead-letter with the failure (`DeadLettered`)
//! 4. `Idle`: if nothing was claimed, sleep the jittered poll interval.
//!
//! # Shutdown
//!
//! The shutdown token is checked between batches and races only the idle
//! sleeps. A batch that was claimed is always dispatched and settled, so no
//! task is claimed and then abandoned by a stopping runner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::TaskFailure;
use crate::queue::{DeadLetter, DeliveryHandle, QueueError, Redelivery, Stream, TaskConsumer};
use crate::types::Task;

use super::config::RunnerConfig;
use super::handler::TaskHandler;

/// Where the runner is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Polling,
    Dispatching,
    /// The last settled task was acknowledged.
    Succeeded,
    /// The last settled task was requeued.
    Retrying,
    /// The last settled task was dead-lettered.
    DeadLettered,
}

/// What happened to one claimed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Tasks whose settlement failed. They come back once their claim lease
    /// expires.
    pub settle_errors: usize,
}

/// Totals over a runner's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl RunnerStats {
    fn record(&mut self, batch: &BatchOutcome) {
        self.claimed += batch.claimed as u64;
        self.succeeded += batch.succeeded as u64;
        self.retried += batch.retried as u64;
        self.dead_lettered += batch.dead_lettered as u64;
    }
}

/// How a single failed task is settled.
enum Settlement {
    Requeue(Redelivery),
    DeadLetter(DeadLetter),
}

pub struct ConsumerRunner<C, H> {
    consumer: Arc<C>,
    handler: H,
    stream: Stream,
    config: RunnerConfig,
    state: watch::Sender<RunnerState>,
}

impl<C, H> ConsumerRunner<C, H>
where
    C: TaskConsumer + Send + Sync,
    H: TaskHandler,
{
    pub fn new(consumer: Arc<C>, handler: H, stream: Stream, config: RunnerConfig) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        ConsumerRunner {
            consumer,
            handler,
            stream,
            config,
            state,
        }
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Watches state changes, e.g. from a test or a status endpoint.
    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RunnerState) {
        self.state.send_replace(state);
    }

    /// Decides how a failed delivery is settled.
    ///
    /// `task.attempt_count` counts earlier failed deliveries, so this delivery
    /// is number `attempt_count + 1`.
    fn settlement_for(&self, task: &Task, failure: TaskFailure) -> Settlement {
        let deliveries = task.attempt_count.saturating_add(1);
        if failure.is_retriable() && deliveries < self.config.max_attempts {
            Settlement::Requeue(Redelivery {
                attempt_count: deliveries,
                delay: self.config.redelivery_delay(task.attempt_count),
                failure,
            })
        } else {
            Settlement::DeadLetter(DeadLetter::new(task.clone(), failure, deliveries))
        }
    }

    /// Runs the handler, renewing the task's claim while it works.
    async fn handle_with_renewal(
        &self,
        task: &Task,
        handle: &DeliveryHandle,
    ) -> Result<(), TaskFailure> {
        let mut handling = std::pin::pin!(self.handler.handle(task));
        let mut renewal = tokio::time::interval(self.config.lease_renewal);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes at once; the claim is fresh.
        renewal.tick().await;

        loop {
            tokio::select! {
                result = &mut handling => return result,
                _ = renewal.tick() => {
                    if let Err(e) = self.consumer.renew(handle).await {
                        warn!(error = %e, "Failed to renew claim");
                    }
                }
            }
        }
    }

    #[instrument(
        skip(self, task, handle, outcome),
        fields(
            stream = %self.stream,
            task_id = %task.id,
            variant = task.payload.variant_name(),
            attempt = task.attempt_count
        )
    )]
    async fn dispatch(&self, task: &Task, handle: DeliveryHandle, outcome: &mut BatchOutcome) {
        self.set_state(RunnerState::Dispatching);

        if task.attempt_count >= self.config.max_attempts {
            let failure = TaskFailure::transient("claim expired on every delivery");
            let record = DeadLetter::new(task.clone(), failure, task.attempt_count);
            self.settle_failure(handle, Settlement::DeadLetter(record), outcome)
                .await;
            return;
        }

        match self.handle_with_renewal(task, &handle).await {
            Ok(()) => {
                debug!("Task succeeded");
                let acked = self.consumer.acknowledge(handle).await.map(|()| {
                    outcome.succeeded += 1;
                    RunnerState::Succeeded
                });
                self.record_settlement(acked, outcome);
            }
            Err(failure) => {
                let settlement = self.settlement_for(task, failure);
                self.settle_failure(handle, settlement, outcome).await;
            }
        }
    }

    async fn settle_failure(
        &self,
        handle: DeliveryHandle,
        settlement: Settlement,
        outcome: &mut BatchOutcome,
    ) {
        let settled = match settlement {
            Settlement::Requeue(redelivery) => {
                warn!(
                    kind = %redelivery.failure.kind,
                    error = %redelivery.failure.message,
                    delay_ms = redelivery.delay.as_millis() as u64,
                    "Task failed, requeueing"
                );
                self.consumer.requeue(handle, redelivery).await.map(|()| {
                    outcome.retried += 1;
                    RunnerState::Retrying
                })
            }
            Settlement::DeadLetter(record) => {
                error!(
                    kind = %record.failure.kind,
                    error = %record.failure.message,
                    attempts = record.attempts,
                    "Task failed, dead-lettering"
                );
                self.consumer.dead_letter(handle, record).await.map(|()| {
                    outcome.dead_lettered += 1;
                    RunnerState::DeadLettered
                })
            }
        };
        self.record_settlement(settled, outcome);
    }

    fn record_settlement(
        &self,
        settled: Result<RunnerState, QueueError>,
        outcome: &mut BatchOutcome,
    ) {
        match settled {
            Ok(state) => self.set_state(state),
            Err(e) => {
                error!(error = %e, "Failed to settle task; it returns after its lease");
                outcome.settle_errors += 1;
            }
        }
    }

    /// Claims one batch and dispatches every task in it.
    ///
    /// Fails only if the claim itself fails.
    pub async fn poll_once(&self) -> Result<BatchOutcome, QueueError> {
        self.set_state(RunnerState::Polling);
        let claimed = match self
            .consumer
            .claim(&self.stream, self.config.batch_size, self.config.block_timeout)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.set_state(RunnerState::Idle);
                return Err(e);
            }
        };

        let mut outcome = BatchOutcome {
            claimed: claimed.len(),
            ..BatchOutcome::default()
        };
        if claimed.is_empty() {
            self.set_state(RunnerState::Idle);
        }
        // Otherwise the state left behind reports how the last task settled.
        for (task, handle) in claimed {
            self.dispatch(&task, handle, &mut outcome).await;
        }
        Ok(outcome)
    }

    /// Sleeps unless shutdown fires first. Returns false on shutdown.
    async fn idle(&self, delay: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Polls until `shutdown` fires, then returns the totals.
    #[instrument(skip_all, fields(stream = %self.stream))]
    pub async fn run(self, shutdown: CancellationToken) -> RunnerStats {
        info!(
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Consumer runner started"
        );
        let idle_delay = self.config.poll_interval_with_jitter(&self.stream);
        let mut stats = RunnerStats::default();
        let mut consecutive_errors: u32 = 0;

        while !shutdown.is_cancelled() {
            match self.poll_once().await {
                Ok(batch) => {
                    consecutive_errors = 0;
                    stats.record(&batch);
                    if batch.claimed == 0 && !self.idle(idle_delay, &shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = self.config.claim_error_backoff(consecutive_errors);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        delay_ms = delay.as_millis() as u64,
                        "Claim failed, backing off"
                    );
                    if !self.idle(delay, &shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(
            claimed = stats.claimed,
            succeeded = stats.succeeded,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            "Consumer runner stopped"
        );
        stats
    }
}

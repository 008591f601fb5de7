//! Periodic refresh of submitted review requests.
//!
//! Review outcomes arrive without any callback, so a low-frequency loop asks
//! the backend about every `Submitted` request of its own kind and records the
//! ones that reached a final state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::TokenSource;
use crate::persistence::{PublicationStore, ScenarioDrafts};
use crate::types::PublicationStatus;

use super::backend::ReviewBackend;
use super::error::Result;
use super::publisher::Publisher;

/// Default time between status sweeps.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub checked: usize,
    pub finished: usize,
    pub errors: usize,
}

pub struct StatusPoller<B, S, St> {
    publisher: Arc<Publisher<B, S, St>>,
    interval: Duration,
}

impl<B, S, St> StatusPoller<B, S, St>
where
    B: ReviewBackend,
    S: TokenSource,
    St: PublicationStore + ScenarioDrafts,
{
    pub fn new(publisher: Arc<Publisher<B, S, St>>, interval: Duration) -> Self {
        StatusPoller {
            publisher,
            interval,
        }
    }

    /// Refreshes every submitted request once.
    ///
    /// A failure on one request is logged and counted; the sweep continues.
    /// Only a failure to list the requests aborts it.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let kind = self.publisher.backend().kind();
        let submitted = self
            .publisher
            .store()
            .list_publications_by_status(&PublicationStatus::Submitted)?;

        let mut report = PollReport::default();
        for request in submitted.into_iter().filter(|r| r.backend_kind == kind) {
            report.checked += 1;
            let id = request.id;
            match self.publisher.refresh_status(request).await {
                Ok(refreshed) if refreshed.is_terminal() => report.finished += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to refresh review status");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` fires.
    ///
    /// A sweep in progress is finished before the loop exits.
    #[instrument(skip_all, fields(backend = %self.publisher.backend().kind()))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Status poller started");
        loop {
            match self.poll_once().await {
                Ok(report) if report.checked > 0 => {
                    info!(
                        checked = report.checked,
                        finished = report.finished,
                        errors = report.errors,
                        "Status sweep done"
                    );
                }
                Ok(_) => debug!("No submitted reviews"),
                Err(e) => warn!(error = %e, "Status sweep failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Status poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::publisher::tests::{FakeBackend, FakeTokens, publisher};
    use crate::types::{
        BackendKind, NewPublication, ReviewRef, ReviewStatus, ScenarioId, TaskId,
    };

    #[tokio::test]
    async fn sweep_finishes_merged_reviews() {
        let backend = FakeBackend::creating(ReviewRef { id: 1, url: None });
        backend
            .statuses
            .lock()
            .unwrap()
            .push_back(ReviewStatus::Merged);
        let publisher = Arc::new(publisher(backend, FakeTokens::default()));
        publisher
            .publish(&TaskId::new("t1"), &ScenarioId::new("S1"), "main")
            .await
            .unwrap();

        let poller = StatusPoller::new(publisher.clone(), Duration::from_secs(60));
        let report = poller.poll_once().await.unwrap();
        assert_eq!(
            report,
            PollReport {
                checked: 1,
                finished: 1,
                errors: 0
            }
        );

        // Nothing left to check.
        assert_eq!(poller.poll_once().await.unwrap().checked, 0);
    }

    #[tokio::test]
    async fn sweep_skips_other_backends() {
        let publisher = Arc::new(publisher(FakeBackend::default(), FakeTokens::default()));
        let mut request = publisher
            .store()
            .create_publication(NewPublication {
                scenario_id: ScenarioId::new("S1"),
                target_branch: "main".into(),
                backend_kind: BackendKind::Gitlab,
                task_id: None,
            })
            .unwrap();
        request.transition(PublicationStatus::TokenAcquired).unwrap();
        request.transition(PublicationStatus::Submitted).unwrap();
        request.review_ref = Some(ReviewRef { id: 9, url: None });
        publisher.store().update_publication(&request).unwrap();

        let poller = StatusPoller::new(publisher, Duration::from_secs(60));
        assert_eq!(poller.poll_once().await.unwrap().checked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let publisher = Arc::new(publisher(FakeBackend::default(), FakeTokens::default()));
        let poller = StatusPoller::new(publisher, Duration::from_secs(60));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(poller.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}

//! Turning a scenario draft into a review request.
//!
//! One publish task walks one [`PublicationRequest`] through
//! `Pending -> TokenAcquired -> Submitted`, persisting every step. A failure on
//! the way moves the request to `Failed` with the error kind that caused it and
//! hands the same kind back to the runner, which decides about redelivery.
//!
//! A redelivered task recognizes the request it created itself by its task ID.
//! It resumes that request instead of tripping over the single-active
//! constraint, and a request that already reached `Submitted` is reported as
//! done without opening a second review.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::auth::{Token, TokenProvider, TokenSource, TokenTarget};
use crate::persistence::{PublicationStore, ScenarioDrafts, StoreError};
use crate::types::{
    NewPublication, PublicationRequest, PublicationStatus, ReviewStatus, ScenarioDraft, ScenarioId,
    TaskId,
};

use super::backend::{ReviewBackend, ReviewDraft};
use super::error::{BackendError, BackendErrorKind, PublishError, Result};

/// How a publish task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A review request was opened by this delivery.
    Submitted(PublicationRequest),
    /// An earlier delivery of the same task already opened it.
    AlreadySubmitted(PublicationRequest),
}

impl PublishOutcome {
    pub fn request(&self) -> &PublicationRequest {
        match self {
            PublishOutcome::Submitted(r) | PublishOutcome::AlreadySubmitted(r) => r,
        }
    }
}

pub struct Publisher<B, S, St> {
    backend: B,
    tokens: Arc<TokenProvider<S>>,
    store: Arc<St>,
    initiator: String,
}

impl<B, S, St> Publisher<B, S, St>
where
    B: ReviewBackend,
    S: TokenSource,
    St: PublicationStore + ScenarioDrafts,
{
    pub fn new(
        backend: B,
        tokens: Arc<TokenProvider<S>>,
        store: Arc<St>,
        initiator: impl Into<String>,
    ) -> Self {
        Publisher {
            backend,
            tokens,
            store,
            initiator: initiator.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &Arc<St> {
        &self.store
    }

    fn target_for(&self, draft: &ScenarioDraft) -> TokenTarget {
        TokenTarget::new(self.initiator.clone(), draft.draft_id)
    }

    fn load_draft(&self, scenario_id: &ScenarioId) -> Result<ScenarioDraft> {
        self.store
            .get_draft(scenario_id)?
            .ok_or_else(|| PublishError::MissingDraft(scenario_id.clone()))
    }

    /// Finds the request this task should work on, creating it if needed.
    fn open_request(
        &self,
        task_id: &TaskId,
        scenario_id: &ScenarioId,
        target_branch: &str,
    ) -> Result<PublicationRequest> {
        if let Some(active) = self.store.find_active_publication(scenario_id, target_branch)? {
            if active.task_id.as_ref() == Some(task_id) {
                info!(id = %active.id, status = %active.status, "Resuming publication request");
                return Ok(active);
            }
            return Err(PublishError::AlreadyPublished {
                scenario_id: scenario_id.clone(),
                target_branch: target_branch.to_string(),
                existing: active.id,
            });
        }

        let new = NewPublication {
            scenario_id: scenario_id.clone(),
            target_branch: target_branch.to_string(),
            backend_kind: self.backend.kind(),
            task_id: Some(task_id.clone()),
        };
        match self.store.create_publication(new) {
            Ok(request) => Ok(request),
            // Another worker created one between our lookup and our create.
            Err(StoreError::Conflict(_)) => {
                let existing = self
                    .store
                    .find_active_publication(scenario_id, target_branch)?
                    .map(|r| r.id);
                match existing {
                    Some(existing) => Err(PublishError::AlreadyPublished {
                        scenario_id: scenario_id.clone(),
                        target_branch: target_branch.to_string(),
                        existing,
                    }),
                    None => Err(PublishError::Store(StoreError::Conflict(format!(
                        "publication for {scenario_id} -> {target_branch} changed concurrently"
                    )))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves `request` to `Failed` and persists it, returning `error`.
    fn fail_with(&self, request: &mut PublicationRequest, error: PublishError) -> PublishError {
        let kind = error.kind();
        if let Err(e) = request.fail(kind, error.to_string()) {
            return e.into();
        }
        if let Err(e) = self.store.update_publication(request) {
            return e.into();
        }
        warn!(id = %request.id, kind = %kind, error = %error, "Publication failed");
        error
    }

    async fn handle_backend_error(
        &self,
        request: &mut PublicationRequest,
        target: &TokenTarget,
        error: BackendError,
    ) -> PublishError {
        if error.kind == BackendErrorKind::Unauthorized {
            self.tokens.invalidate(target).await;
        }
        self.fail_with(request, error.into())
    }

    /// Publishes `scenario_id` into `target_branch` on behalf of `task_id`.
    #[instrument(skip(self, task_id), fields(task_id = %task_id, backend = %self.backend.kind()))]
    pub async fn publish(
        &self,
        task_id: &TaskId,
        scenario_id: &ScenarioId,
        target_branch: &str,
    ) -> Result<PublishOutcome> {
        let draft = self.load_draft(scenario_id)?;
        let mut request = self.open_request(task_id, scenario_id, target_branch)?;

        if request.status == PublicationStatus::Submitted {
            return Ok(PublishOutcome::AlreadySubmitted(request));
        }

        let target = self.target_for(&draft);
        let token: Token = match self.tokens.get_token(&target).await {
            Ok(token) => token,
            Err(e) => return Err(self.fail_with(&mut request, e.into())),
        };
        if request.status == PublicationStatus::Pending {
            request.transition(PublicationStatus::TokenAcquired)?;
            self.store.update_publication(&request)?;
        }

        let review = ReviewDraft::from_scenario(&draft, target_branch);
        let review_ref = match self.backend.create_review_request(&review, &token).await {
            Ok(review_ref) => review_ref,
            Err(e) => return Err(self.handle_backend_error(&mut request, &target, e).await),
        };

        request.review_ref = Some(review_ref);
        request.transition(PublicationStatus::Submitted)?;
        self.store.update_publication(&request)?;

        info!(
            id = %request.id,
            review_id = request.review_ref.as_ref().map(|r| r.id),
            "Submitted review request"
        );
        Ok(PublishOutcome::Submitted(request))
    }

    /// Reads the remote state of a submitted request and records terminal ones.
    ///
    /// `Merged` and `Declined` end the request; any other remote state leaves
    /// it `Submitted`.
    #[instrument(skip(self, request), fields(id = %request.id))]
    pub async fn refresh_status(&self, mut request: PublicationRequest) -> Result<PublicationRequest> {
        let review_ref = match (&request.status, &request.review_ref) {
            (PublicationStatus::Submitted, Some(review_ref)) => review_ref.clone(),
            _ => return Err(PublishError::NoReview { id: request.id }),
        };

        let draft = self.load_draft(&request.scenario_id)?;
        let target = self.target_for(&draft);
        let token = self.tokens.get_token(&target).await?;

        let status = match self.backend.get_status(&review_ref, &token).await {
            Ok(status) => status,
            Err(e) => {
                if e.kind == BackendErrorKind::Unauthorized {
                    self.tokens.invalidate(&target).await;
                }
                return Err(e.into());
            }
        };

        let next = match status {
            ReviewStatus::Merged => PublicationStatus::Merged,
            ReviewStatus::Declined => PublicationStatus::Rejected,
            ReviewStatus::Open | ReviewStatus::Other(_) => return Ok(request),
        };
        request.transition(next)?;
        self.store.update_publication(&request)?;
        info!(status = %request.status, "Review reached a final state");
        Ok(request)
    }
}

//! The review-hosting capability shared by every backend.

use std::future::Future;

use crate::auth::Token;
use crate::types::{BackendKind, ReviewRef, ReviewStatus, ScenarioDraft};

use super::error::BackendError;
use super::gitlab::GitlabClient;
use super::stash::StashClient;

/// What a backend needs to open a review request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDraft {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub reviewers: Vec<String>,
}

impl ReviewDraft {
    /// Builds the review for publishing `draft` into `target_branch`.
    ///
    /// The source branch is `bdd-feature-<draft id>`, so every draft gets its
    /// own branch and a retried publication reuses it.
    pub fn from_scenario(draft: &ScenarioDraft, target_branch: &str) -> Self {
        ReviewDraft {
            source_branch: source_branch_for(draft),
            target_branch: target_branch.to_string(),
            title: draft.title.clone(),
            description: format!(
                "Scenario `{}` by {}.\n\n```gherkin\n{}\n```",
                draft.scenario_id,
                draft.author,
                draft.feature_text.trim_end()
            ),
            reviewers: draft.reviewers.clone(),
        }
    }
}

pub fn source_branch_for(draft: &ScenarioDraft) -> String {
    format!("bdd-feature-{}", draft.draft_id.0)
}

/// A review-hosting backend.
pub trait ReviewBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Opens a review request. Not idempotent: callers must not retry blindly.
    fn create_review_request(
        &self,
        draft: &ReviewDraft,
        token: &Token,
    ) -> impl Future<Output = Result<ReviewRef, BackendError>> + Send;

    /// Reads the remote state of a review request.
    fn get_status(
        &self,
        review: &ReviewRef,
        token: &Token,
    ) -> impl Future<Output = Result<ReviewStatus, BackendError>> + Send;
}

/// Checks the status of a backend response and decodes its JSON body.
pub(crate) async fn decode_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::from_status(status.as_u16(), body));
    }
    response
        .json()
        .await
        .map_err(|e| BackendError::from_reqwest(format!("failed to decode {what}"), e))
}

/// The backend chosen by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredBackend {
    Stash(StashClient),
    Gitlab(GitlabClient),
}

impl ReviewBackend for ConfiguredBackend {
    fn kind(&self) -> BackendKind {
        match self {
            ConfiguredBackend::Stash(_) => BackendKind::Stash,
            ConfiguredBackend::Gitlab(_) => BackendKind::Gitlab,
        }
    }

    async fn create_review_request(
        &self,
        draft: &ReviewDraft,
        token: &Token,
    ) -> Result<ReviewRef, BackendError> {
        match self {
            ConfiguredBackend::Stash(client) => client.create_review_request(draft, token).await,
            ConfiguredBackend::Gitlab(client) => client.create_review_request(draft, token).await,
        }
    }

    async fn get_status(&self, review: &ReviewRef, token: &Token) -> Result<ReviewStatus, BackendError> {
        match self {
            ConfiguredBackend::Stash(client) => client.get_status(review, token).await,
            ConfiguredBackend::Gitlab(client) => client.get_status(review, token).await,
        }
    }
}

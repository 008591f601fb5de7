//! Bitbucket Server (Stash) review backend, REST API 1.0.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::auth::Token;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::types::{BackendKind, ReviewRef, ReviewStatus};

use super::backend::{ReviewBackend, ReviewDraft, decode_response};
use super::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashSettings {
    /// Server root, e.g. `https://stash.example.com`.
    pub base_url: String,
    pub project_key: String,
    pub repository_slug: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StashClient {
    http: reqwest::Client,
    settings: StashSettings,
}

// ─── Wire types ───

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePullRequest<'a> {
    title: &'a str,
    description: &'a str,
    state: &'static str,
    open: bool,
    closed: bool,
    from_ref: RefSpec<'a>,
    to_ref: RefSpec<'a>,
    locked: bool,
    reviewers: Vec<Reviewer<'a>>,
}

#[derive(Debug, Serialize)]
struct RefSpec<'a> {
    id: String,
    repository: Repository<'a>,
}

#[derive(Debug, Serialize)]
struct Repository<'a> {
    slug: &'a str,
    project: Project<'a>,
}

#[derive(Debug, Serialize)]
struct Project<'a> {
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct Reviewer<'a> {
    user: User<'a>,
}

#[derive(Debug, Serialize)]
struct User<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    id: u64,
    state: String,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(rename = "self", default)]
    self_links: Vec<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

fn parse_state(state: &str) -> ReviewStatus {
    match state {
        "OPEN" => ReviewStatus::Open,
        "MERGED" => ReviewStatus::Merged,
        "DECLINED" => ReviewStatus::Declined,
        other => ReviewStatus::Other(other.to_string()),
    }
}

impl StashClient {
    pub fn new(settings: StashSettings) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BackendError::from_reqwest("failed to build HTTP client", e))?;
        Ok(StashClient { http, settings })
    }

    fn pull_requests_url(&self) -> String {
        format!(
            "{}/rest/api/1.0/projects/{}/repos/{}/pull-requests",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.project_key,
            self.settings.repository_slug
        )
    }

    fn ref_spec(&self, branch: &str) -> RefSpec<'_> {
        RefSpec {
            id: format!("refs/heads/{branch}"),
            repository: Repository {
                slug: &self.settings.repository_slug,
                project: Project {
                    key: &self.settings.project_key,
                },
            },
        }
    }

    async fn fetch_pull_request(&self, id: u64, token: &Token) -> Result<PullRequest, BackendError> {
        let response = self
            .http
            .get(format!("{}/{}", self.pull_requests_url(), id))
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest("pull request lookup failed", e))?;
        decode_response(response, "pull request").await
    }
}

impl ReviewBackend for StashClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Stash
    }

    #[instrument(skip_all, fields(source = %draft.source_branch, target = %draft.target_branch))]
    async fn create_review_request(
        &self,
        draft: &ReviewDraft,
        token: &Token,
    ) -> Result<ReviewRef, BackendError> {
        let body = CreatePullRequest {
            title: &draft.title,
            description: &draft.description,
            state: "OPEN",
            open: true,
            closed: false,
            from_ref: self.ref_spec(&draft.source_branch),
            to_ref: self.ref_spec(&draft.target_branch),
            locked: false,
            reviewers: draft
                .reviewers
                .iter()
                .map(|name| Reviewer { user: User { name } })
                .collect(),
        };

        let response = self
            .http
            .post(self.pull_requests_url())
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest("pull request creation failed", e))?;
        let created: PullRequest = decode_response(response, "pull request").await?;

        debug!(id = created.id, state = %created.state, "Created pull request");
        Ok(ReviewRef {
            id: created.id,
            url: created
                .links
                .and_then(|l| l.self_links.into_iter().next())
                .map(|h| h.href),
        })
    }

    async fn get_status(&self, review: &ReviewRef, token: &Token) -> Result<ReviewStatus, BackendError> {
        let pr = retry_with_backoff(RetryConfig::HTTP_READ, || {
            self.fetch_pull_request(review.id, token)
        })
        .await?;
        Ok(parse_state(&pr.state))
    }
}

//! GitLab review backend, REST API v4.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::auth::Token;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::types::{BackendKind, ReviewRef, ReviewStatus};

use super::backend::{ReviewBackend, ReviewDraft, decode_response};
use super::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitlabSettings {
    /// Instance root, e.g. `https://gitlab.example.com`.
    pub base_url: String,
    /// Numeric project ID or `namespace/project` path.
    pub project_id: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GitlabClient {
    http: reqwest::Client,
    settings: GitlabSettings,
}

#[derive(Debug, Serialize)]
struct CreateMergeRequest<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
    remove_source_branch: bool,
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    iid: u64,
    state: String,
    #[serde(default)]
    web_url: Option<String>,
}

fn parse_state(state: &str) -> ReviewStatus {
    match state {
        "opened" => ReviewStatus::Open,
        "merged" => ReviewStatus::Merged,
        "closed" => ReviewStatus::Declined,
        other => ReviewStatus::Other(other.to_string()),
    }
}

impl GitlabClient {
    pub fn new(settings: GitlabSettings) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BackendError::from_reqwest("failed to build HTTP client", e))?;
        Ok(GitlabClient { http, settings })
    }

    fn merge_requests_url(&self) -> String {
        format!(
            "{}/api/v4/projects/{}/merge_requests",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.project_id.replace('/', "%2F")
        )
    }

    async fn fetch_merge_request(&self, iid: u64, token: &Token) -> Result<MergeRequest, BackendError> {
        let response = self
            .http
            .get(format!("{}/{}", self.merge_requests_url(), iid))
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest("merge request lookup failed", e))?;
        decode_response(response, "merge request").await
    }
}

impl ReviewBackend for GitlabClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Gitlab
    }

    #[instrument(skip_all, fields(source = %draft.source_branch, target = %draft.target_branch))]
    async fn create_review_request(
        &self,
        draft: &ReviewDraft,
        token: &Token,
    ) -> Result<ReviewRef, BackendError> {
        let body = CreateMergeRequest {
            source_branch: &draft.source_branch,
            target_branch: &draft.target_branch,
            title: &draft.title,
            description: &draft.description,
            remove_source_branch: true,
        };

        let response = self
            .http
            .post(self.merge_requests_url())
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest("merge request creation failed", e))?;
        let created: MergeRequest = decode_response(response, "merge request").await?;

        debug!(iid = created.iid, state = %created.state, "Created merge request");
        Ok(ReviewRef {
            id: created.iid,
            url: created.web_url,
        })
    }

    async fn get_status(&self, review: &ReviewRef, token: &Token) -> Result<ReviewStatus, BackendError> {
        let mr = retry_with_backoff(RetryConfig::HTTP_READ, || {
            self.fetch_merge_request(review.id, token)
        })
        .await?;
        Ok(parse_state(&mr.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenValue;
    use crate::publication::error::BackendErrorKind;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use tokio::time::Instant;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> GitlabClient {
        GitlabClient::new(GitlabSettings {
            base_url,
            project_id: "42".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn token() -> Token {
        Token::new(TokenValue::new("tkn"), Instant::now(), Duration::from_secs(60))
    }

    fn draft() -> ReviewDraft {
        ReviewDraft {
            source_branch: "bdd-feature-7".into(),
            target_branch: "main".into(),
            title: "Login".into(),
            description: "```gherkin\nFeature: Login\n```".into(),
            reviewers: Vec::new(),
        }
    }

    #[test]
    fn project_path_is_encoded() {
        let client = GitlabClient::new(GitlabSettings {
            base_url: "https://gitlab.example.com/".into(),
            project_id: "qa/features".into(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(
            client.merge_requests_url(),
            "https://gitlab.example.com/api/v4/projects/qa%2Ffeatures/merge_requests"
        );
    }

    #[tokio::test]
    async fn creates_merge_request() {
        let router = Router::new().route(
            "/api/v4/projects/42/merge_requests",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer tkn");
                assert_eq!(body["source_branch"], "bdd-feature-7");
                assert_eq!(body["target_branch"], "main");
                (
                    StatusCode::CREATED,
                    Json(json!({"iid": 5, "state": "opened", "web_url": "https://gl/mr/5"})),
                )
            }),
        );
        let review = client(serve(router).await)
            .create_review_request(&draft(), &token())
            .await
            .unwrap();
        assert_eq!(
            review,
            ReviewRef {
                id: 5,
                url: Some("https://gl/mr/5".into())
            }
        );
    }

    #[tokio::test]
    async fn unauthorized_is_reported() {
        let router = Router::new().route(
            "/api/v4/projects/42/merge_requests",
            post(|| async { (StatusCode::UNAUTHORIZED, "401 Unauthorized") }),
        );
        let err = client(serve(router).await)
            .create_review_request(&draft(), &token())
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn reads_closed_as_declined() {
        let router = Router::new().route(
            "/api/v4/projects/42/merge_requests/{iid}",
            get(|| async { Json(json!({"iid": 5, "state": "closed"})) }),
        );
        let status = client(serve(router).await)
            .get_status(&ReviewRef { id: 5, url: None }, &token())
            .await
            .unwrap();
        assert_eq!(status, ReviewStatus::Declined);
    }

    #[test]
    fn state_mapping() {
        assert_eq!(parse_state("opened"), ReviewStatus::Open);
        assert_eq!(parse_state("merged"), ReviewStatus::Merged);
        assert_eq!(parse_state("locked"), ReviewStatus::Other("locked".into()));
    }
}

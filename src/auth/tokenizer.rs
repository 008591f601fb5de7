//! HTTP client for the tokenizer service.
//!
//! The tokenizer issues backend tokens scoped to one draft:
//!
//! ```text
//! POST <url>?initiator=<initiator>&id=<draft id>&<remote_key_name>=<remote_key>
//! 200 {"token": "..."}
//! ```

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{AuthError, Result, TokenSource, TokenTarget, TokenValue};

/// Default request timeout for the tokenizer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerSettings {
    pub url: String,
    /// Name of the query parameter carrying the remote key.
    pub remote_key_name: String,
    pub remote_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenizerResponse {
    token: String,
}

#[derive(Debug, Clone)]
pub struct TokenizerClient {
    http: reqwest::Client,
    settings: TokenizerSettings,
}

impl TokenizerClient {
    pub fn new(settings: TokenizerSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| AuthError::Unavailable {
                message: "failed to build HTTP client".into(),
                source: Some(e),
            })?;
        Ok(TokenizerClient { http, settings })
    }
}

impl TokenSource for TokenizerClient {
    #[instrument(skip(self, target), fields(target = %target))]
    async fn acquire(&self, target: &TokenTarget) -> Result<TokenValue> {
        let id = target.id.0.to_string();
        let params = [
            ("initiator", target.initiator.as_str()),
            ("id", id.as_str()),
            (
                self.settings.remote_key_name.as_str(),
                self.settings.remote_key.as_str(),
            ),
        ];

        let response = self
            .http
            .post(&self.settings.url)
            .query(&params)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable {
                message: format!("request to tokenizer failed: {e}"),
                source: Some(e),
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AuthError::unavailable(format!(
                "tokenizer answered HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: TokenizerResponse = response.json().await.map_err(|e| AuthError::Unavailable {
            message: format!("malformed tokenizer response: {e}"),
            source: Some(e),
        })?;

        debug!("Acquired token from tokenizer");
        Ok(TokenValue::new(body.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::DraftId;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    fn client(url: String) -> TokenizerClient {
        TokenizerClient::new(TokenizerSettings {
            url,
            remote_key_name: "remote_key".into(),
            remote_key: "k3y".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn target() -> TokenTarget {
        TokenTarget::new("overhave", DraftId(7))
    }

    #[tokio::test]
    async fn sends_params_and_parses_token() {
        let router = Router::new().route(
            "/token",
            post(|Query(params): Query<HashMap<String, String>>| async move {
                let ok = params.get("initiator").map(String::as_str) == Some("overhave")
                    && params.get("id").map(String::as_str) == Some("7")
                    && params.get("remote_key").map(String::as_str) == Some("k3y");
                if ok {
                    (StatusCode::OK, r#"{"token":"abc"}"#).into_response()
                } else {
                    StatusCode::BAD_REQUEST.into_response()
                }
            }),
        );
        let token = client(serve(router).await).acquire(&target()).await.unwrap();
        assert_eq!(token.expose(), "abc");
    }

    #[tokio::test]
    async fn client_error_is_rejection() {
        let router = Router::new().route("/token", post(|| async { StatusCode::FORBIDDEN }));
        let err = client(serve(router).await).acquire(&target()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRequestRejected);
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let router = Router::new().route("/token", post(|| async { StatusCode::BAD_GATEWAY }));
        let err = client(serve(router).await).acquire(&target()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthBackendUnavailable);
    }

    #[tokio::test]
    async fn rate_limit_is_unavailable() {
        let router = Router::new().route("/token", post(|| async { StatusCode::TOO_MANY_REQUESTS }));
        let err = client(serve(router).await).acquire(&target()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthBackendUnavailable);
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn malformed_body_is_unavailable() {
        let router = Router::new().route("/token", post(|| async { "not json" }));
        let err = client(serve(router).await).acquire(&target()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthBackendUnavailable);
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{addr}/token"))
            .acquire(&target())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthBackendUnavailable);
    }
}

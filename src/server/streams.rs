//! Stream inspection endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::AppState;
use crate::queue::{DeadLetter, PendingEntry, QueueError, Stream};

/// Errors that can occur when inspecting a stream.
#[derive(Debug, Error)]
pub enum StreamsError {
    /// No stream with this name is configured.
    #[error("stream not found: {0}")]
    NotFound(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl IntoResponse for StreamsError {
    fn into_response(self) -> Response {
        let status = match &self {
            StreamsError::NotFound(_) => StatusCode::NOT_FOUND,
            StreamsError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

fn lookup(app_state: &AppState, name: String) -> Result<Stream, StreamsError> {
    app_state
        .stream(&name)
        .cloned()
        .ok_or(StreamsError::NotFound(name))
}

/// `GET /api/v1/streams/{stream}/pending`
///
/// Tasks not yet acknowledged by the stream's consumer group, with their
/// attempt counts, current claimant and redelivery time.
pub async fn pending_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<PendingEntry>>, StreamsError> {
    let stream = lookup(&app_state, name)?;
    Ok(Json(app_state.queue().pending(&stream)?))
}

/// `GET /api/v1/streams/{stream}/dead-letters`
pub async fn dead_letters_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<DeadLetter>>, StreamsError> {
    let stream = lookup(&app_state, name)?;
    Ok(Json(app_state.queue().dead_letters(&stream)?))
}

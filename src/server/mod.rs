//! Operator HTTP endpoints.
//!
//! Read-only views of the spool, for debugging stuck or failing streams.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if the server is running
//! - `GET /api/v1/streams/{stream}/pending` - The stream's pending set as JSON
//! - `GET /api/v1/streams/{stream}/dead-letters` - The stream's dead letters as JSON

use std::sync::Arc;

use crate::queue::{SpoolQueue, Stream};

pub mod health;
pub mod streams;

pub use health::health_handler;
pub use streams::{dead_letters_handler, pending_handler};

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    queue: SpoolQueue,

    /// Streams this process knows about, looked up by name.
    streams: Vec<Stream>,
}

impl AppState {
    pub fn new(queue: SpoolQueue, streams: Vec<Stream>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { queue, streams }),
        }
    }

    pub fn queue(&self) -> &SpoolQueue {
        &self.inner.queue
    }

    /// Finds a configured stream by its name.
    pub fn stream(&self, name: &str) -> Option<&Stream> {
        self.inner.streams.iter().find(|s| s.name == name)
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/api/v1/streams/{stream}/pending", get(pending_handler))
        .route(
            "/api/v1/streams/{stream}/dead-letters",
            get(dead_letters_handler),
        )
        .route("/health", get(health_handler))
        .with_state(app_state)
}

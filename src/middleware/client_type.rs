//! Client-type attribution middleware.
//!
//! Splits request cost by originating client (web, iOS, Android). The client
//! type is stamped into the request extensions by an upstream collaborator;
//! requests without a stamp are attributed to the web client. Keeps its own
//! start marker and terminal-state guard, independent of the plain timing
//! middleware layered inside it.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;

use crate::context::ClientType;
use crate::metrics::ApmMetrics;
use crate::ApmState;

/// Record request duration and status attributed to a client type.
pub async fn attribute_client(
    State(state): State<ApmState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.metrics.is_enabled() {
        return next.run(req).await;
    }

    let client = req
        .extensions()
        .get::<ClientType>()
        .copied()
        .unwrap_or(ClientType::Web);
    let mut guard = AttributionGuard::arm(Arc::clone(&state.metrics), client);

    let response = next.run(req).await;

    guard.complete(response.status());
    response
}

/// Drop guard owning the client-attributed terminal record.
struct AttributionGuard {
    metrics: Arc<ApmMetrics>,
    client: ClientType,
    start: Instant,
    finished: bool,
}

impl AttributionGuard {
    fn arm(metrics: Arc<ApmMetrics>, client: ClientType) -> Self {
        Self {
            metrics,
            client,
            start: Instant::now(),
            finished: false,
        }
    }

    fn complete(&mut self, status: StatusCode) {
        self.finished = true;
        self.metrics
            .record_client_request(self.client, status, self.start.elapsed());
    }
}

impl Drop for AttributionGuard {
    fn drop(&mut self) {
        if !self.finished && std::thread::panicking() {
            self.metrics.record_client_request(
                self.client,
                StatusCode::INTERNAL_SERVER_ERROR,
                self.start.elapsed(),
            );
        }
    }
}

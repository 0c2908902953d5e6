//! Hard per-request deadline enforcement.
//!
//! Bounds worst-case request latency so one runaway request cannot hold a
//! worker indefinitely. The handler future is raced against a deadline sleep
//! inside one lexical frame: whichever side loses is dropped, which is the
//! cancellation — there is no timer to clean up, nothing that can fire into
//! a later request on a reused worker, and nothing deliverable to a sibling
//! request. A fired deadline produces a fixed-shape 504 and the process keeps
//! serving.
//!
//! Cancellation does not propagate into sub-operations the handler already
//! dispatched: an in-flight database call keeps running on its own
//! connection after the 504 goes out.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;
use tracing::error;

use super::endpoint_label;
use crate::ApmState;

/// Enforce the configured wall-clock deadline on a request.
///
/// Exempt path prefixes (administrative surfaces) pass through without a
/// deadline at all, as does everything when the layer is disabled or the
/// timeout is configured to zero.
pub async fn enforce_deadline(
    State(state): State<ApmState>,
    req: Request,
    next: Next,
) -> Response {
    let timeout = state.config.request_timeout;
    if !state.config.enabled || timeout.is_zero() {
        return next.run(req).await;
    }

    let path = req.uri().path().to_owned();
    if state.config.is_exempt(&path) {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let endpoint = endpoint_label(&req);

    tokio::select! {
        // Biased polling with the handler first: a response that is ready
        // always wins over a deadline that fired in the same tick.
        biased;

        response = next.run(req) => response,

        () = tokio::time::sleep(timeout) => {
            state.metrics.record_timeout(&method, &endpoint);
            error!(
                method = %method,
                path = %path,
                timeout_secs = timeout.as_secs(),
                "request deadline exceeded"
            );
            deadline_response(timeout)
        }
    }
}

/// The fixed-shape 504 returned for a fired deadline.
fn deadline_response(timeout: std::time::Duration) -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(json!({
            "error": "request timed out",
            "timeout_seconds": timeout.as_secs_f64(),
        })),
    )
        .into_response()
}

//! Per-request timing middleware.
//!
//! Each request reaches exactly one terminal state here:
//!
//! - **completed** — a response came back; one sample with its real status.
//! - **excepted** — the handler unwound; one sample with status forced to
//!   500, emitted from the guard's `Drop` while the unwind continues.
//! - **cancelled** — the deadline enforcer dropped the handler mid-flight;
//!   the guard stays silent because the enforcer owns that terminal record.
//!
//! The drop guard makes "exactly one" structural rather than a convention:
//! `complete` defuses the guard, and the guard restores the in-flight gauge
//! on every path.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::{Method, StatusCode};

use super::endpoint_label;
use crate::metrics::ApmMetrics;
use crate::ApmState;

/// Record wall time, method, endpoint and status for every request.
pub async fn track_timing(
    State(state): State<ApmState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.metrics.is_enabled() {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let endpoint = endpoint_label(&req);
    let mut guard = TimingGuard::arm(Arc::clone(&state.metrics), method, endpoint);

    let response = next.run(req).await;

    guard.complete(response.status());
    response
}

/// Drop guard owning the request's terminal timing record.
struct TimingGuard {
    metrics: Arc<ApmMetrics>,
    method: Method,
    endpoint: String,
    start: Instant,
    finished: bool,
}

impl TimingGuard {
    fn arm(metrics: Arc<ApmMetrics>, method: Method, endpoint: String) -> Self {
        metrics.inc_in_flight();
        Self {
            metrics,
            method,
            endpoint,
            start: Instant::now(),
            finished: false,
        }
    }

    fn complete(&mut self, status: StatusCode) {
        self.finished = true;
        self.metrics.dec_in_flight();
        self.metrics
            .record_request(&self.method, &self.endpoint, status, self.start.elapsed());
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.metrics.dec_in_flight();
        if std::thread::panicking() {
            // Handler unwound: record it as a 500 and let the unwind continue.
            self.metrics.record_request(
                &self.method,
                &self.endpoint,
                StatusCode::INTERNAL_SERVER_ERROR,
                self.start.elapsed(),
            );
        }
        // Dropped without a panic means the deadline cancelled the handler;
        // that terminal record belongs to the enforcer.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use crate::config::ApmConfig;

    fn state() -> ApmState {
        ApmState::new(ApmConfig::default())
    }

    fn router(state: &ApmState) -> Router {
        Router::new()
            .route("/stories/{id}", get(|| async { "a story" }))
            .route(
                "/boom",
                get(|| async {
                    panic!("handler exploded");
                    #[allow(unreachable_code)]
                    ()
                }),
            )
            .layer(from_fn_with_state(state.clone(), track_timing))
    }

    #[tokio::test]
    async fn test_completed_request_records_once() {
        let state = state();
        let app = router(&state);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/stories/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.requests.completed, 1);
        assert_eq!(snapshot.requests.server_errors, 0);
        assert_eq!(snapshot.requests.in_flight, 0);

        // The endpoint label is the route template, not the raw path.
        let text = state.metrics.encode_text().unwrap();
        assert!(text.contains("/stories/{id}"));
        assert!(!text.contains("/stories/42"));
    }

    #[tokio::test]
    async fn test_panicking_handler_records_500() {
        let state = state();
        let app = router(&state);

        let handle = tokio::spawn(async move {
            app.oneshot(
                axum::http::Request::builder()
                    .uri("/boom")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
        });

        // The panic propagates out of the spawned task...
        assert!(handle.await.is_err());

        // ...but the terminal record was still emitted, exactly once, as 500.
        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.requests.completed, 1);
        assert_eq!(snapshot.requests.server_errors, 1);
        assert_eq!(snapshot.requests.in_flight, 0);
    }

    #[tokio::test]
    async fn test_disabled_passes_through_untouched() {
        let state = ApmState::new(ApmConfig {
            enabled: false,
            ..Default::default()
        });
        let app = router(&state);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/stories/7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.metrics.snapshot().requests.completed, 0);
    }
}

//! Structured request logging.
//!
//! The outermost middleware: every request gets a correlation identifier, a
//! tracing span scoped to its execution, and exactly one structured record at
//! exit — whatever the outcome, including a deadline 504 produced further in.
//! Span scoping ties the logging context to this request's future, so nothing
//! leaks into an unrelated request handled later on the same worker.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use http::header::USER_AGENT;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::context::{client_ip, AuthenticatedUser, REQUEST_ID_HEADER};

/// Log one structured record per request, correlated by request id.
///
/// The request id is taken from the inbound `X-Request-ID` header (stamped
/// by the request-id layer, or by an upstream proxy whose id we keep); if
/// the middleware runs without that layer a fresh one is generated here. The
/// id reaches the response header via the propagation layer.
pub async fn log_request(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(req.headers(), peer);

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        client_ip = %ip,
    );

    let start = Instant::now();
    let response = next.run(req).instrument(span.clone()).await;

    // The auth collaborator stamps the resolved user onto the response.
    let user = response
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.clone());

    info!(
        parent: &span,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        user_agent = %user_agent,
        user = user.as_deref().unwrap_or(""),
        "request handled"
    );

    response
}

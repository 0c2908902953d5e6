//! Request-lifecycle middleware chain.
//!
//! Layered outer-to-inner as: request logging → hard deadline → client-type
//! attribution → request timing → application. Entry effects run in that
//! order and exit effects in reverse; no middleware blocks beyond the wrapped
//! handler's own blocking behavior, and only the deadline enforcer ever
//! interrupts the work it wraps.

pub mod client_type;
pub mod deadline;
pub mod request_log;
pub mod timing;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use http::header::HeaderName;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::context::REQUEST_ID_HEADER;
use crate::ApmState;

/// Apply the full middleware chain to a router.
///
/// Axum applies layers bottom-up, so the last layer added here is the
/// outermost: request-id stamping wraps logging wraps the deadline wraps
/// attribution wraps timing.
pub fn instrument_router(router: Router, state: &ApmState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    router
        .layer(from_fn_with_state(state.clone(), timing::track_timing))
        .layer(from_fn_with_state(state.clone(), client_type::attribute_client))
        .layer(from_fn_with_state(state.clone(), deadline::enforce_deadline))
        .layer(from_fn(request_log::log_request))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// Metric label for the request's route.
///
/// Prefers the matched route template (`/stories/{id}`) over the raw path so
/// path parameters do not explode label cardinality; unrouted requests fall
/// back to the raw path and rely on the label budget.
pub(crate) fn endpoint_label(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned())
}

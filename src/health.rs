//! Health, readiness and metrics-export surface.
//!
//! Served on a dedicated admin port, away from application traffic:
//!
//! - `GET /health/live` — liveness: the process can answer at all
//! - `GET /health/ready` — readiness: every registered dependency answers
//!   within its bounded check
//! - `GET /health` — combined view: readiness plus sink status and uptime
//! - `GET /metrics` — OpenMetrics text exposition
//! - `GET /metrics/json` — aggregate JSON snapshot
//!
//! Orchestration infrastructure polls these constantly, so every handler is
//! read-only, bounded, and answers with a clean JSON error instead of ever
//! propagating a failure — even mid-outage the probe itself must behave.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ApmConfig;
use crate::error::ApmError;
use crate::metrics::ApmMetrics;

// ─────────────────────────────────────────────────────────────────────────────
// Dependency Checks
// ─────────────────────────────────────────────────────────────────────────────

/// A readiness dependency (primary data store, cache, ...).
///
/// Implementations should answer quickly when healthy; the probe bounds each
/// call with the configured check timeout regardless.
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    /// Name reported in probe responses.
    fn name(&self) -> &'static str;

    /// Probe the dependency. `Err` carries an operator-readable reason.
    async fn check(&self) -> Result<(), String>;
}

/// One dependency's outcome within a probe response.
#[derive(Debug, Serialize)]
pub struct CheckResult {
    /// Whether the dependency answered successfully
    pub ok: bool,
    /// Failure reason, when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Probe State
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state behind the probe surface.
pub struct Probe {
    config: Arc<ApmConfig>,
    metrics: Arc<ApmMetrics>,
    checks: Vec<Arc<dyn DependencyCheck>>,
    started_at: Instant,
    version: &'static str,
}

impl Probe {
    /// Create a probe with no dependency checks registered.
    #[must_use]
    pub fn new(config: Arc<ApmConfig>, metrics: Arc<ApmMetrics>) -> Self {
        Self {
            config,
            metrics,
            checks: Vec::new(),
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Register a dependency required for readiness.
    #[must_use]
    pub fn with_check(mut self, check: Arc<dyn DependencyCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Run every registered check, each bounded by the configured timeout.
    async fn run_checks(&self) -> (BTreeMap<&'static str, CheckResult>, bool) {
        let mut results = BTreeMap::new();
        let mut all_ok = true;
        for check in &self.checks {
            let outcome =
                tokio::time::timeout(self.config.dependency_check_timeout, check.check()).await;
            let result = match outcome {
                Ok(Ok(())) => CheckResult {
                    ok: true,
                    error: None,
                },
                Ok(Err(reason)) => CheckResult {
                    ok: false,
                    error: Some(reason),
                },
                Err(_) => CheckResult {
                    ok: false,
                    error: Some(format!(
                        "check timed out after {}ms",
                        self.config.dependency_check_timeout.as_millis()
                    )),
                },
            };
            all_ok &= result.ok;
            results.insert(check.name(), result);
        }
        (results, all_ok)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe response.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    /// Always "alive" — if the process can serialize this, it is
    pub status: &'static str,
}

/// Readiness probe response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready"
    pub status: &'static str,
    /// Per-dependency outcomes
    pub checks: BTreeMap<&'static str, CheckResult>,
    /// First failing dependency, when not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Combined health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Seconds since the probe was constructed
    pub uptime_seconds: u64,
    /// Whether the metrics sink is recording
    pub apm_enabled: bool,
    /// Per-dependency outcomes
    pub checks: BTreeMap<&'static str, CheckResult>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router & Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Build the probe router.
pub fn probe_router(probe: Arc<Probe>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/health/live", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/json", get(metrics_json_handler))
        .with_state(probe)
}

/// Liveness: trivially 200 while the process can respond.
async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(LivenessResponse { status: "alive" }))
}

/// Readiness: 200 only when every dependency answers in time.
async fn readiness_handler(State(probe): State<Arc<Probe>>) -> Response {
    let (checks, all_ok) = probe.run_checks().await;
    if all_ok {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                checks,
                reason: None,
            }),
        )
            .into_response()
    } else {
        let reason = checks
            .iter()
            .find(|(_, result)| !result.ok)
            .map(|(name, _)| (*name).to_string());
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                checks,
                reason,
            }),
        )
            .into_response()
    }
}

/// Combined view: dependency state plus sink status and uptime.
async fn health_handler(State(probe): State<Arc<Probe>>) -> Response {
    let (checks, all_ok) = probe.run_checks().await;
    let body = HealthResponse {
        status: if all_ok { "healthy" } else { "degraded" },
        version: probe.version,
        uptime_seconds: probe.started_at.elapsed().as_secs(),
        apm_enabled: probe.metrics.is_enabled(),
        checks,
    };
    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// OpenMetrics text exposition of the sink.
async fn metrics_handler(State(probe): State<Arc<Probe>>) -> Response {
    match probe.metrics.encode_text() {
        Ok(text) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to encode metrics" })),
            )
                .into_response()
        }
    }
}

/// Aggregate JSON snapshot of the sink.
async fn metrics_json_handler(State(probe): State<Arc<Probe>>) -> impl IntoResponse {
    Json(probe.metrics.snapshot())
}

// ─────────────────────────────────────────────────────────────────────────────
// Admin Server
// ─────────────────────────────────────────────────────────────────────────────

/// Admin server configuration.
#[derive(Debug, Clone)]
pub struct AdminServerConfig {
    /// Port to listen on (default: 9464)
    pub port: u16,
    /// Bind address (default: 127.0.0.1)
    pub bind_addr: String,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            port: 9464,
            bind_addr: "127.0.0.1".to_string(),
        }
    }
}

impl AdminServerConfig {
    /// Full bind address string.
    #[must_use]
    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Serves the probe surface on a dedicated port.
///
/// Separate from the application port so orchestration probes keep working
/// while application traffic is saturated, and so the surface is never
/// exposed to application clients.
pub struct AdminServer {
    config: AdminServerConfig,
    probe: Arc<Probe>,
}

impl AdminServer {
    /// Create an admin server with the default bind address.
    #[must_use]
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            config: AdminServerConfig::default(),
            probe,
        }
    }

    /// Create an admin server with a custom bind configuration.
    #[must_use]
    pub fn with_config(probe: Arc<Probe>, config: AdminServerConfig) -> Self {
        Self { config, probe }
    }

    /// Bind and serve until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or serving fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ApmError> {
        let bind_addr = self.config.bind_string();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ApmError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;

        info!(addr = %bind_addr, "admin server listening");

        axum::serve(listener, probe_router(self.probe))
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("admin server shutting down");
            })
            .await
            .map_err(|source| ApmError::Serve { source })?;

        Ok(())
    }
}

//! APM configuration.
//!
//! All knobs are read once, at construction time, and injected into every
//! component as a shared `Arc<ApmConfig>`. There is no hot reload and no
//! global lookup; tests construct a config directly.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FOLIO_APM_ENABLED` | `true` | Master switch for the whole layer |
//! | `FOLIO_APM_REQUEST_TIMEOUT_SECS` | `30` | Hard per-request deadline (0 disables) |
//! | `FOLIO_APM_SLOW_QUERY_THRESHOLD_MS` | `100` | Queries above this are flagged slow |
//! | `FOLIO_APM_EXEMPT_PATHS` | `/admin` | Comma-separated path prefixes exempt from the deadline |
//! | `FOLIO_APM_DEPTH_SAMPLE_TIMEOUT_MS` | `250` | Bound on each broker depth query |
//! | `FOLIO_APM_DEPENDENCY_CHECK_TIMEOUT_MS` | `500` | Bound on each readiness dependency check |

use std::time::Duration;

use tracing::warn;

/// Configuration for the APM layer.
#[derive(Debug, Clone)]
pub struct ApmConfig {
    /// Master switch. When false the whole layer passes requests, tasks and
    /// queries through untouched.
    pub enabled: bool,
    /// Hard wall-clock deadline per request (default: 30s).
    ///
    /// A zero duration disables deadline enforcement entirely; this is an
    /// explicit operator escape hatch, not an error.
    pub request_timeout: Duration,
    /// Queries slower than this are counted and logged as slow (default: 100ms).
    pub slow_query_threshold: Duration,
    /// Path prefixes that are never subject to the request deadline
    /// (default: `/admin`).
    pub exempt_path_prefixes: Vec<String>,
    /// Bound on each task-broker depth query (default: 250ms).
    pub depth_sample_timeout: Duration,
    /// Bound on each readiness dependency check (default: 500ms).
    pub dependency_check_timeout: Duration,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout: Duration::from_secs(30),
            slow_query_threshold: Duration::from_millis(100),
            exempt_path_prefixes: vec!["/admin".to_string()],
            depth_sample_timeout: Duration::from_millis(250),
            dependency_check_timeout: Duration::from_millis(500),
        }
    }
}

impl ApmConfig {
    /// Load configuration from environment variables.
    ///
    /// Invalid values log a warning and fall back to the default rather than
    /// failing startup.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        let enabled = std::env::var("FOLIO_APM_ENABLED")
            .ok()
            .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
            .unwrap_or(default.enabled);

        let request_timeout = parse_duration_env(
            "FOLIO_APM_REQUEST_TIMEOUT_SECS",
            DurationUnit::Seconds,
            default.request_timeout,
        );

        let slow_query_threshold = parse_duration_env(
            "FOLIO_APM_SLOW_QUERY_THRESHOLD_MS",
            DurationUnit::Millis,
            default.slow_query_threshold,
        );

        let exempt_path_prefixes = match std::env::var("FOLIO_APM_EXEMPT_PATHS") {
            Ok(value) => value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => default.exempt_path_prefixes,
        };

        let depth_sample_timeout = parse_duration_env(
            "FOLIO_APM_DEPTH_SAMPLE_TIMEOUT_MS",
            DurationUnit::Millis,
            default.depth_sample_timeout,
        );

        let dependency_check_timeout = parse_duration_env(
            "FOLIO_APM_DEPENDENCY_CHECK_TIMEOUT_MS",
            DurationUnit::Millis,
            default.dependency_check_timeout,
        );

        Self {
            enabled,
            request_timeout,
            slow_query_threshold,
            exempt_path_prefixes,
            depth_sample_timeout,
            dependency_check_timeout,
        }
        .validated()
    }

    /// Adjust inconsistent values, warning about each adjustment.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.slow_query_threshold.is_zero() {
            warn!(
                default_ms = 100,
                "slow query threshold of zero would flag every query, using default"
            );
            self.slow_query_threshold = Duration::from_millis(100);
        }
        if self.dependency_check_timeout.is_zero() {
            warn!(
                default_ms = 500,
                "dependency check timeout of zero would fail every probe, using default"
            );
            self.dependency_check_timeout = Duration::from_millis(500);
        }
        self
    }

    /// Returns true if the path is exempt from deadline enforcement.
    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

enum DurationUnit {
    Seconds,
    Millis,
}

/// Parse a duration environment variable with warning on invalid values.
fn parse_duration_env(var_name: &str, unit: DurationUnit, default: Duration) -> Duration {
    match std::env::var(var_name) {
        Ok(value) => match value.parse::<u64>() {
            Ok(n) => match unit {
                DurationUnit::Seconds => Duration::from_secs(n),
                DurationUnit::Millis => Duration::from_millis(n),
            },
            Err(_) => {
                warn!(
                    var = var_name,
                    value = %value,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

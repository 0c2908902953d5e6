//! folio-apm — request-lifecycle observability for the Folio backend.
//!
//! This crate is the platform's APM core: it times every request, attributes
//! cost to the originating client type, bounds worst-case request latency
//! with a hard per-request deadline, tracks background-task and
//! database-query performance, and exports all of it through structured logs,
//! Prometheus metrics, and health/readiness probes.
//!
//! The application itself is a collaborator, not a concern: requests enter
//! and responses (or nothing, when a deadline fires) leave; tasks run and
//! finish; queries execute and report. Instrumentation is transparent to all
//! of it — an error raised by wrapped work is recorded and re-raised
//! unchanged, and a failure inside this layer never reaches the operation it
//! was observing.
//!
//! # Wiring
//!
//! ```ignore
//! use std::sync::Arc;
//! use folio_apm::{ApmState, health, middleware};
//!
//! folio_apm::logging::init_logging();
//! let state = ApmState::new(folio_apm::config::ApmConfig::from_env());
//!
//! // Application router, instrumented.
//! let app = middleware::instrument_router(app_router, &state);
//!
//! // Probe surface on the admin port.
//! let probe = Arc::new(health::Probe::new(state.config.clone(), state.metrics.clone()));
//! tokio::spawn(health::AdminServer::new(probe).run(shutdown_token));
//! ```

pub mod cardinality;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod obfuscate;
pub mod query;
pub mod task;

use std::sync::Arc;

pub use config::ApmConfig;
pub use context::{AuthenticatedUser, ClientType};
pub use error::ApmError;
pub use metrics::ApmMetrics;
pub use query::QueryTracker;
pub use task::{TaskBroker, TaskTracker};

/// Shared handle injected into every middleware and tracker.
///
/// Cheap to clone; construction is the one place configuration is read.
#[derive(Clone)]
pub struct ApmState {
    /// Layer configuration, read once at construction.
    pub config: Arc<ApmConfig>,
    /// The process-wide metrics sink.
    pub metrics: Arc<ApmMetrics>,
}

impl ApmState {
    /// Validate the configuration and build the sink.
    #[must_use]
    pub fn new(config: ApmConfig) -> Self {
        let config = Arc::new(config.validated());
        let metrics = Arc::new(ApmMetrics::new(&config));
        Self { config, metrics }
    }

    /// A query tracker sharing this state.
    #[must_use]
    pub fn query_tracker(&self) -> QueryTracker {
        QueryTracker::new(Arc::clone(&self.config), Arc::clone(&self.metrics))
    }

    /// A task tracker sharing this state, without a broker attached.
    #[must_use]
    pub fn task_tracker(&self) -> TaskTracker {
        TaskTracker::new(Arc::clone(&self.config), Arc::clone(&self.metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_shares_one_sink() {
        let state = ApmState::new(ApmConfig::default());
        let tracker = state.query_tracker();
        tracker.track("SELECT 1", std::time::Duration::from_millis(1), 1);
        assert_eq!(state.metrics.snapshot().queries.total, 1);
    }

    #[test]
    fn test_state_validates_config() {
        let state = ApmState::new(ApmConfig {
            slow_query_threshold: std::time::Duration::ZERO,
            ..Default::default()
        });
        // Validation replaced the zero threshold with the default.
        assert_eq!(
            state.config.slow_query_threshold,
            std::time::Duration::from_millis(100)
        );
    }
}

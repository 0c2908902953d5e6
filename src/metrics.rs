//! Process-wide metrics sink.
//!
//! Every tracker and middleware in this crate lands its samples here. The
//! sink is safe for concurrent recording from any number of tasks (counters
//! and histograms are internally synchronized; aggregate mirrors are plain
//! atomics) and recording never fails: when the layer is disabled every
//! `record_*` call is a no-op, and an export problem is the exporter
//! endpoint's to log — it can never reach the operation being observed.
//!
//! Two read-only views are exposed:
//! - [`ApmMetrics::encode_text`] — OpenMetrics text for `GET /metrics`
//! - [`ApmMetrics::snapshot`] — aggregate JSON view for `GET /metrics/json`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use serde::Serialize;

use crate::cardinality::LabelBudget;
use crate::config::ApmConfig;
use crate::context::ClientType;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for the request counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// HTTP method
    pub method: String,
    /// Route template (budgeted), not the raw path
    pub endpoint: String,
    /// Response status code
    pub status: String,
}

/// Labels for the request duration histogram.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    /// HTTP method
    pub method: String,
    /// Route template (budgeted)
    pub endpoint: String,
}

/// Labels for client-attributed request counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClientLabels {
    /// Client type ("web", "mobile-ios", "mobile-android", "unknown")
    pub client_type: String,
    /// Response status code
    pub status: String,
}

/// Labels for client-attributed duration histograms.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClientTypeLabels {
    /// Client type
    pub client_type: String,
}

/// Labels for database query counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueryLabels {
    /// "true" when the query exceeded the slow threshold
    pub slow: String,
}

/// Labels for background task counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TaskLabels {
    /// Task name (budgeted)
    pub task: String,
    /// "success" or "failure"
    pub outcome: String,
}

/// Labels for background task duration histograms.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TaskNameLabels {
    /// Task name (budgeted)
    pub task: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Histogram Buckets
// ─────────────────────────────────────────────────────────────────────────────

/// Request duration buckets in milliseconds.
const REQUEST_DURATION_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0,
];

/// Query duration buckets in milliseconds, clustered around the slow
/// threshold's order of magnitude.
const QUERY_DURATION_BUCKETS: &[f64] =
    &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0];

/// Task duration buckets in milliseconds.
const TASK_DURATION_BUCKETS: &[f64] = &[
    10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 15000.0, 60000.0,
];

/// Distinct endpoint label values admitted before folding.
const ENDPOINT_LABEL_LIMIT: usize = 256;

/// Distinct task-name label values admitted before folding.
const TASK_LABEL_LIMIT: usize = 128;

// ─────────────────────────────────────────────────────────────────────────────
// ApmMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// The metrics sink.
///
/// Owns the Prometheus registry and all metric families, plus atomic
/// aggregate mirrors backing the JSON snapshot view. Constructed once and
/// shared as `Arc<ApmMetrics>`.
pub struct ApmMetrics {
    enabled: bool,
    started_at: Instant,
    registry: Registry,

    requests_total: Family<RequestLabels, Counter>,
    request_duration_ms: Family<EndpointLabels, Histogram>,
    client_requests_total: Family<ClientLabels, Counter>,
    client_request_duration_ms: Family<ClientTypeLabels, Histogram>,
    request_timeouts_total: Family<EndpointLabels, Counter>,
    db_queries_total: Family<QueryLabels, Counter>,
    db_query_duration_ms: Histogram,
    tasks_total: Family<TaskLabels, Counter>,
    task_duration_ms: Family<TaskNameLabels, Histogram>,
    task_queue_depth: Gauge,
    requests_in_flight: Gauge,

    endpoint_budget: LabelBudget,
    task_budget: LabelBudget,

    agg: Aggregates,
}

/// Atomic mirrors of the aggregate counts, read by the JSON snapshot.
#[derive(Default)]
struct Aggregates {
    requests_completed: AtomicU64,
    request_server_errors: AtomicU64,
    requests_timed_out: AtomicU64,
    queries: AtomicU64,
    slow_queries: AtomicU64,
    tasks: AtomicU64,
    task_failures: AtomicU64,
    last_queue_depth: AtomicU64,
}

impl ApmMetrics {
    /// Create the sink and register every family with a fresh registry.
    #[must_use]
    pub fn new(config: &ApmConfig) -> Self {
        let mut registry = Registry::with_prefix("folio");

        // Counter names are registered without the _total suffix; the
        // OpenMetrics encoder appends it.
        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "http_requests",
            "HTTP requests by method, endpoint and status",
            requests_total.clone(),
        );

        let request_duration_ms = Family::<EndpointLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(REQUEST_DURATION_BUCKETS.iter().copied())
        });
        registry.register(
            "http_request_duration_ms",
            "HTTP request latency in milliseconds",
            request_duration_ms.clone(),
        );

        let client_requests_total = Family::<ClientLabels, Counter>::default();
        registry.register(
            "client_requests",
            "HTTP requests attributed to a client type",
            client_requests_total.clone(),
        );

        let client_request_duration_ms =
            Family::<ClientTypeLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(REQUEST_DURATION_BUCKETS.iter().copied())
            });
        registry.register(
            "client_request_duration_ms",
            "HTTP request latency in milliseconds by client type",
            client_request_duration_ms.clone(),
        );

        let request_timeouts_total = Family::<EndpointLabels, Counter>::default();
        registry.register(
            "request_timeouts",
            "Requests terminated by the hard deadline",
            request_timeouts_total.clone(),
        );

        let db_queries_total = Family::<QueryLabels, Counter>::default();
        registry.register(
            "db_queries",
            "Database queries by slow classification",
            db_queries_total.clone(),
        );

        let db_query_duration_ms = Histogram::new(QUERY_DURATION_BUCKETS.iter().copied());
        registry.register(
            "db_query_duration_ms",
            "Database query latency in milliseconds",
            db_query_duration_ms.clone(),
        );

        let tasks_total = Family::<TaskLabels, Counter>::default();
        registry.register(
            "tasks",
            "Background task executions by name and outcome",
            tasks_total.clone(),
        );

        let task_duration_ms = Family::<TaskNameLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(TASK_DURATION_BUCKETS.iter().copied())
        });
        registry.register(
            "task_duration_ms",
            "Background task run time in milliseconds",
            task_duration_ms.clone(),
        );

        let task_queue_depth = Gauge::default();
        registry.register(
            "task_queue_depth",
            "Broker queue depth at the last task completion",
            task_queue_depth.clone(),
        );

        let requests_in_flight = Gauge::default();
        registry.register(
            "requests_in_flight",
            "Requests currently being processed",
            requests_in_flight.clone(),
        );

        Self {
            enabled: config.enabled,
            started_at: Instant::now(),
            registry,
            requests_total,
            request_duration_ms,
            client_requests_total,
            client_request_duration_ms,
            request_timeouts_total,
            db_queries_total,
            db_query_duration_ms,
            tasks_total,
            task_duration_ms,
            task_queue_depth,
            requests_in_flight,
            endpoint_budget: LabelBudget::new(ENDPOINT_LABEL_LIMIT),
            task_budget: LabelBudget::new(TASK_LABEL_LIMIT),
            agg: Aggregates::default(),
        }
    }

    /// Whether the layer is recording at all.
    ///
    /// Every component checks this before doing any work, making the whole
    /// layer a no-op when disabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a request that reached a response (completed or excepted).
    pub fn record_request(
        &self,
        method: &Method,
        endpoint: &str,
        status: StatusCode,
        duration: Duration,
    ) {
        if !self.enabled {
            return;
        }
        let endpoint = self.endpoint_budget.admit(endpoint);
        self.requests_total
            .get_or_create(&RequestLabels {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
                status: status.as_u16().to_string(),
            })
            .inc();
        self.request_duration_ms
            .get_or_create(&EndpointLabels {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
            })
            .observe(duration.as_secs_f64() * 1000.0);

        self.agg.requests_completed.fetch_add(1, Ordering::Relaxed);
        if status.is_server_error() {
            self.agg
                .request_server_errors
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request attributed to a client type.
    pub fn record_client_request(
        &self,
        client_type: ClientType,
        status: StatusCode,
        duration: Duration,
    ) {
        if !self.enabled {
            return;
        }
        self.client_requests_total
            .get_or_create(&ClientLabels {
                client_type: client_type.as_str().to_string(),
                status: status.as_u16().to_string(),
            })
            .inc();
        self.client_request_duration_ms
            .get_or_create(&ClientTypeLabels {
                client_type: client_type.as_str().to_string(),
            })
            .observe(duration.as_secs_f64() * 1000.0);
    }

    /// Record a request terminated by the hard deadline.
    pub fn record_timeout(&self, method: &Method, endpoint: &str) {
        if !self.enabled {
            return;
        }
        let endpoint = self.endpoint_budget.admit(endpoint);
        self.request_timeouts_total
            .get_or_create(&EndpointLabels {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
            })
            .inc();
        self.agg.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a database query.
    pub fn record_query(&self, slow: bool, duration: Duration) {
        if !self.enabled {
            return;
        }
        self.db_queries_total
            .get_or_create(&QueryLabels {
                slow: slow.to_string(),
            })
            .inc();
        self.db_query_duration_ms
            .observe(duration.as_secs_f64() * 1000.0);

        self.agg.queries.fetch_add(1, Ordering::Relaxed);
        if slow {
            self.agg.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a background task execution.
    pub fn record_task(&self, task_name: &str, success: bool, duration: Duration, queue_depth: u64) {
        if !self.enabled {
            return;
        }
        let task = self.task_budget.admit(task_name);
        self.tasks_total
            .get_or_create(&TaskLabels {
                task: task.to_string(),
                outcome: if success { "success" } else { "failure" }.to_string(),
            })
            .inc();
        self.task_duration_ms
            .get_or_create(&TaskNameLabels {
                task: task.to_string(),
            })
            .observe(duration.as_secs_f64() * 1000.0);
        self.task_queue_depth.set(queue_depth as i64);

        self.agg.tasks.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.agg.task_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.agg
            .last_queue_depth
            .store(queue_depth, Ordering::Relaxed);
    }

    /// Track a request entering processing.
    pub fn inc_in_flight(&self) {
        if self.enabled {
            self.requests_in_flight.inc();
        }
    }

    /// Track a request leaving processing, on any exit path.
    pub fn dec_in_flight(&self) {
        if self.enabled {
            self.requests_in_flight.dec();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read-only views
    // ─────────────────────────────────────────────────────────────────────────

    /// Encode the registry in OpenMetrics text format.
    ///
    /// # Errors
    ///
    /// Returns the underlying formatting error; the exporter endpoint turns
    /// it into a clean 500 without touching any observed operation.
    pub fn encode_text(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    /// Aggregate counts as a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enabled: self.enabled,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            requests: RequestCounts {
                completed: self.agg.requests_completed.load(Ordering::Relaxed),
                server_errors: self.agg.request_server_errors.load(Ordering::Relaxed),
                timed_out: self.agg.requests_timed_out.load(Ordering::Relaxed),
                in_flight: self.requests_in_flight.get(),
            },
            queries: QueryCounts {
                total: self.agg.queries.load(Ordering::Relaxed),
                slow: self.agg.slow_queries.load(Ordering::Relaxed),
            },
            tasks: TaskCounts {
                total: self.agg.tasks.load(Ordering::Relaxed),
                failed: self.agg.task_failures.load(Ordering::Relaxed),
                last_queue_depth: self.agg.last_queue_depth.load(Ordering::Relaxed),
            },
            labels_folded: self.endpoint_budget.folded_count() + self.task_budget.folded_count(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot Types
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate view served by `GET /metrics/json`.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Whether the layer is recording
    pub enabled: bool,
    /// Seconds since the sink was constructed
    pub uptime_seconds: u64,
    /// Request-level aggregates
    pub requests: RequestCounts,
    /// Query-level aggregates
    pub queries: QueryCounts,
    /// Task-level aggregates
    pub tasks: TaskCounts,
    /// Recordings folded into the label overflow bucket
    pub labels_folded: u64,
}

/// Request aggregates.
#[derive(Debug, Serialize)]
pub struct RequestCounts {
    /// Requests that produced a response (including 5xx)
    pub completed: u64,
    /// Requests that ended with a 5xx status
    pub server_errors: u64,
    /// Requests terminated by the hard deadline
    pub timed_out: u64,
    /// Requests currently in processing
    pub in_flight: i64,
}

/// Query aggregates.
#[derive(Debug, Serialize)]
pub struct QueryCounts {
    /// All recorded queries
    pub total: u64,
    /// Queries over the slow threshold
    pub slow: u64,
}

/// Task aggregates.
#[derive(Debug, Serialize)]
pub struct TaskCounts {
    /// All recorded task executions
    pub total: u64,
    /// Executions that ended in failure
    pub failed: u64,
    /// Broker depth sampled at the most recent execution
    pub last_queue_depth: u64,
}

//! Database query tracking.
//!
//! Call sites hand this layer a query descriptor, a duration and a row count;
//! classification against the slow threshold and obfuscation of the
//! descriptor happen here, never at the call site. The wrapping forms
//! guarantee a record on every exit path: [`QueryTimer`] records on drop if
//! the wrapped work unwound, and [`QueryTracker::observe`] records before an
//! error is handed back unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::ApmConfig;
use crate::metrics::ApmMetrics;
use crate::obfuscate::obfuscate_query;

/// Tracks data-access work against the slow-query threshold.
#[derive(Clone)]
pub struct QueryTracker {
    config: Arc<ApmConfig>,
    metrics: Arc<ApmMetrics>,
}

impl QueryTracker {
    /// Create a tracker sharing the layer's config and sink.
    #[must_use]
    pub fn new(config: Arc<ApmConfig>, metrics: Arc<ApmMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Record one query execution.
    ///
    /// No-op when the layer is disabled. The descriptor is obfuscated before
    /// it reaches any log field; slow queries are flagged distinctly and
    /// logged at warn level.
    pub fn track(&self, query: &str, duration: Duration, rows_returned: u64) {
        if !self.metrics.is_enabled() {
            return;
        }
        let slow = duration > self.config.slow_query_threshold;
        self.metrics.record_query(slow, duration);

        let obfuscated = obfuscate_query(query);
        let duration_ms = duration.as_millis() as u64;
        if slow {
            warn!(
                query = %obfuscated,
                duration_ms,
                rows_returned,
                threshold_ms = self.config.slow_query_threshold.as_millis() as u64,
                "slow query"
            );
        } else {
            debug!(query = %obfuscated, duration_ms, rows_returned, "query");
        }
    }

    /// Start a timer for a unit of data-access work.
    ///
    /// Call [`QueryTimer::finish`] with the row count on success; a timer
    /// dropped without finishing (error or unwind path) still records, with a
    /// row count of zero.
    #[must_use]
    pub fn timer(&self, query: &str) -> QueryTimer {
        QueryTimer {
            tracker: self.clone(),
            query: query.to_string(),
            start: Instant::now(),
            finished: false,
        }
    }

    /// Time a future performing data-access work.
    ///
    /// `rows` extracts the row count from a successful result. The work's
    /// outcome is recorded on both paths and the result — error included —
    /// is returned unchanged.
    pub async fn observe<F, T, E, R>(&self, query: &str, rows: R, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        R: FnOnce(&T) -> u64,
    {
        if !self.metrics.is_enabled() {
            return work.await;
        }
        let timer = self.timer(query);
        let result = work.await;
        match &result {
            Ok(value) => timer.finish(rows(value)),
            Err(_) => timer.finish(0),
        }
        result
    }
}

/// Drop-safe timer for one query.
pub struct QueryTimer {
    tracker: QueryTracker,
    query: String,
    start: Instant,
    finished: bool,
}

impl QueryTimer {
    /// Finish the timer, recording the elapsed time and row count.
    pub fn finish(mut self, rows_returned: u64) {
        self.finished = true;
        self.tracker
            .track(&self.query, self.start.elapsed(), rows_returned);
    }
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        if !self.finished {
            // Error or unwind path: the query still ran and still counts.
            self.tracker.track(&self.query, self.start.elapsed(), 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> QueryTracker {
        tracker_with(ApmConfig::default())
    }

    fn tracker_with(config: ApmConfig) -> QueryTracker {
        let config = Arc::new(config);
        let metrics = Arc::new(ApmMetrics::new(&config));
        QueryTracker::new(config, metrics)
    }

    #[test]
    fn test_track_classifies_against_threshold() {
        let tracker = tracker();
        tracker.track("SELECT 1", Duration::from_millis(5), 1);
        tracker.track("SELECT * FROM stories", Duration::from_millis(250), 40);

        let snapshot = tracker.metrics.snapshot();
        assert_eq!(snapshot.queries.total, 2);
        assert_eq!(snapshot.queries.slow, 1);
    }

    #[test]
    fn test_threshold_boundary_is_not_slow() {
        let tracker = tracker();
        tracker.track("SELECT 1", Duration::from_millis(100), 1);
        assert_eq!(tracker.metrics.snapshot().queries.slow, 0);
    }

    #[test]
    fn test_timer_records_on_finish() {
        let tracker = tracker();
        let timer = tracker.timer("SELECT * FROM users WHERE id = 42");
        timer.finish(1);
        assert_eq!(tracker.metrics.snapshot().queries.total, 1);
    }

    #[test]
    fn test_timer_records_on_drop() {
        let tracker = tracker();
        {
            let _timer = tracker.timer("DELETE FROM drafts WHERE id = 9");
            // Dropped without finish, as on an error path.
        }
        assert_eq!(tracker.metrics.snapshot().queries.total, 1);
    }

    #[tokio::test]
    async fn test_observe_records_success() {
        let tracker = tracker();
        let result: Result<Vec<u32>, String> = tracker
            .observe(
                "SELECT id FROM stories",
                |rows| rows.len() as u64,
                async { Ok(vec![1, 2, 3]) },
            )
            .await;
        assert_eq!(result.unwrap().len(), 3);
        assert_eq!(tracker.metrics.snapshot().queries.total, 1);
    }

    #[tokio::test]
    async fn test_observe_reraises_error_unchanged() {
        let tracker = tracker();
        let result: Result<Vec<u32>, String> = tracker
            .observe("SELECT id FROM stories", |rows: &Vec<u32>| rows.len() as u64, async {
                Err("connection reset".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "connection reset");
        // The failed query was still recorded, exactly once.
        assert_eq!(tracker.metrics.snapshot().queries.total, 1);
    }

    #[tokio::test]
    async fn test_observe_disabled_is_transparent() {
        let tracker = tracker_with(ApmConfig {
            enabled: false,
            ..Default::default()
        });
        let result: Result<u32, String> = tracker
            .observe("SELECT 1", |_| 1, async { Ok(7) })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(tracker.metrics.snapshot().queries.total, 0);
    }
}

//! Background task tracking.
//!
//! Task runners report each unit of work here with its outcome; the tracker
//! samples the broker's queue depth at the moment tracking starts. Depth
//! sampling is bounded and degrades to zero on any failure — a broker outage
//! must never make task tracking slow or fall over.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ApmConfig;
use crate::metrics::ApmMetrics;

/// Error returned by a [`TaskBroker`] depth query.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker did not answer.
    #[error("broker unreachable: {reason}")]
    Unreachable {
        /// Transport-level detail
        reason: String,
    },
}

/// Interface to the task broker's queue counters.
///
/// Implemented by the task-runner integration; this layer only ever reads
/// the two counts and adds them together.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Tasks currently executing on workers.
    async fn active_count(&self) -> Result<u64, BrokerError>;

    /// Tasks reserved by workers but not yet started.
    async fn reserved_count(&self) -> Result<u64, BrokerError>;
}

/// Tracks background task executions.
#[derive(Clone)]
pub struct TaskTracker {
    config: Arc<ApmConfig>,
    metrics: Arc<ApmMetrics>,
    broker: Option<Arc<dyn TaskBroker>>,
}

impl TaskTracker {
    /// Create a tracker without a broker; queue depth samples as zero.
    #[must_use]
    pub fn new(config: Arc<ApmConfig>, metrics: Arc<ApmMetrics>) -> Self {
        Self {
            config,
            metrics,
            broker: None,
        }
    }

    /// Attach a broker for queue depth sampling.
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn TaskBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Sample the broker's queue depth (active + reserved).
    ///
    /// Bounded by the configured sample timeout; any failure degrades to 0.
    pub async fn sample_queue_depth(&self) -> u64 {
        let Some(broker) = &self.broker else {
            return 0;
        };
        let sample = async {
            let active = broker.active_count().await?;
            let reserved = broker.reserved_count().await?;
            Ok::<u64, BrokerError>(active + reserved)
        };
        match timeout(self.config.depth_sample_timeout, sample).await {
            Ok(Ok(depth)) => depth,
            Ok(Err(err)) => {
                debug!(error = %err, "queue depth sample failed, degrading to 0");
                0
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.config.depth_sample_timeout.as_millis() as u64,
                    "queue depth sample timed out, degrading to 0"
                );
                0
            }
        }
    }

    /// Record one task execution.
    pub fn track(&self, task_name: &str, duration: Duration, success: bool, queue_depth: u64) {
        if !self.metrics.is_enabled() {
            return;
        }
        self.metrics
            .record_task(task_name, success, duration, queue_depth);
        debug!(
            task = task_name,
            duration_ms = duration.as_millis() as u64,
            success,
            queue_depth,
            "task finished"
        );
    }

    /// Run a task future under tracking.
    ///
    /// Queue depth is sampled before the work starts. The success flag is
    /// false exactly when the work returned an error, and the error is
    /// handed back unchanged after the record is emitted.
    pub async fn instrument<F, T, E>(&self, task_name: &str, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.metrics.is_enabled() {
            return work.await;
        }
        let queue_depth = self.sample_queue_depth().await;
        let start = Instant::now();
        let result = work.await;
        self.track(task_name, start.elapsed(), result.is_ok(), queue_depth);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBroker {
        active: u64,
        reserved: u64,
    }

    #[async_trait]
    impl TaskBroker for FixedBroker {
        async fn active_count(&self) -> Result<u64, BrokerError> {
            Ok(self.active)
        }

        async fn reserved_count(&self) -> Result<u64, BrokerError> {
            Ok(self.reserved)
        }
    }

    struct FailingBroker;

    #[async_trait]
    impl TaskBroker for FailingBroker {
        async fn active_count(&self) -> Result<u64, BrokerError> {
            Err(BrokerError::Unreachable {
                reason: "connection refused".to_string(),
            })
        }

        async fn reserved_count(&self) -> Result<u64, BrokerError> {
            Err(BrokerError::Unreachable {
                reason: "connection refused".to_string(),
            })
        }
    }

    struct StalledBroker;

    #[async_trait]
    impl TaskBroker for StalledBroker {
        async fn active_count(&self) -> Result<u64, BrokerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0)
        }

        async fn reserved_count(&self) -> Result<u64, BrokerError> {
            Ok(0)
        }
    }

    fn tracker_with_broker(broker: Arc<dyn TaskBroker>) -> TaskTracker {
        let config = Arc::new(ApmConfig {
            depth_sample_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        let metrics = Arc::new(ApmMetrics::new(&config));
        TaskTracker::new(config, metrics).with_broker(broker)
    }

    #[tokio::test]
    async fn test_instrument_success_with_depth() {
        let tracker = tracker_with_broker(Arc::new(FixedBroker {
            active: 2,
            reserved: 1,
        }));

        let result: Result<&str, String> = tracker
            .instrument("send_email", async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("sent")
            })
            .await;

        assert_eq!(result.unwrap(), "sent");
        let snapshot = tracker.metrics.snapshot();
        assert_eq!(snapshot.tasks.total, 1);
        assert_eq!(snapshot.tasks.failed, 0);
        assert_eq!(snapshot.tasks.last_queue_depth, 3);
    }

    #[tokio::test]
    async fn test_instrument_failure_propagates_error() {
        let tracker = tracker_with_broker(Arc::new(FixedBroker {
            active: 0,
            reserved: 0,
        }));

        let result: Result<(), String> = tracker
            .instrument("render_feed", async { Err("template missing".to_string()) })
            .await;

        assert_eq!(result.unwrap_err(), "template missing");
        let snapshot = tracker.metrics.snapshot();
        assert_eq!(snapshot.tasks.total, 1);
        assert_eq!(snapshot.tasks.failed, 1);
    }

    #[tokio::test]
    async fn test_depth_degrades_on_broker_error() {
        let tracker = tracker_with_broker(Arc::new(FailingBroker));
        assert_eq!(tracker.sample_queue_depth().await, 0);
    }

    #[tokio::test]
    async fn test_depth_degrades_on_broker_stall() {
        let tracker = tracker_with_broker(Arc::new(StalledBroker));
        let start = Instant::now();
        assert_eq!(tracker.sample_queue_depth().await, 0);
        // Bounded by the sample timeout, not the broker's stall.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_no_broker_samples_zero() {
        let config = Arc::new(ApmConfig::default());
        let metrics = Arc::new(ApmMetrics::new(&config));
        let tracker = TaskTracker::new(config, metrics);
        assert_eq!(tracker.sample_queue_depth().await, 0);
    }

    #[tokio::test]
    async fn test_disabled_tracker_is_transparent() {
        let config = Arc::new(ApmConfig {
            enabled: false,
            ..Default::default()
        });
        let metrics = Arc::new(ApmMetrics::new(&config));
        let tracker = TaskTracker::new(config, metrics);

        let result: Result<u32, String> = tracker.instrument("noop", async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(tracker.metrics.snapshot().tasks.total, 0);
    }
}

//! Metrics collection for matchwatch.
//!
//! Lock-free counters for the background task pipeline and the outbound
//! rate limiter. One instance is created at startup and shared via `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Application metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === Task Metrics ===
    /// Tasks accepted by the queue
    pub tasks_enqueued: AtomicU64,
    /// Tasks rejected at submission (stopped queue, full queue, unknown type)
    pub tasks_rejected: AtomicU64,
    /// Handler invocations started
    pub tasks_started: AtomicU64,
    /// Tasks that reached COMPLETED
    pub tasks_completed: AtomicU64,
    /// Tasks that reached terminal FAILED
    pub tasks_failed: AtomicU64,
    /// Retry attempts scheduled
    pub tasks_retried: AtomicU64,
    /// Tasks still running when the shutdown grace period expired
    pub tasks_abandoned: AtomicU64,
    /// Total handler execution time in microseconds
    pub task_execution_us_total: AtomicU64,

    // === Rate Limit Metrics ===
    /// Calls that passed the rate limiter
    pub ratelimit_requests_allowed: AtomicU64,
    /// Calls denied because a circuit breaker was open
    pub ratelimit_requests_rejected: AtomicU64,
    /// Times a caller had to wait for quota or spacing
    pub ratelimit_waits: AtomicU64,
    /// Total time callers spent waiting, in milliseconds
    pub ratelimit_wait_ms_total: AtomicU64,
    /// 429 responses observed
    pub ratelimit_429_total: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks_enqueued: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            tasks_started: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            tasks_abandoned: AtomicU64::new(0),
            task_execution_us_total: AtomicU64::new(0),

            ratelimit_requests_allowed: AtomicU64::new(0),
            ratelimit_requests_rejected: AtomicU64::new(0),
            ratelimit_waits: AtomicU64::new(0),
            ratelimit_wait_ms_total: AtomicU64::new(0),
            ratelimit_429_total: AtomicU64::new(0),
        }
    }

    /// Record a task accepted by the queue.
    pub fn record_task_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task rejected at submission.
    pub fn record_task_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler invocation.
    pub fn record_task_started(&self) {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the execution time of one handler invocation.
    pub fn record_task_execution(&self, duration: Duration) {
        self.task_execution_us_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a task reaching a terminal state.
    pub fn record_task_finished(&self, success: bool) {
        if success {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a retry being scheduled.
    pub fn record_task_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record tasks abandoned at shutdown.
    pub fn record_tasks_abandoned(&self, count: u64) {
        self.tasks_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a call that passed the rate limiter.
    pub fn record_request_allowed(&self) {
        self.ratelimit_requests_allowed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call denied by an open breaker.
    pub fn record_request_rejected(&self) {
        self.ratelimit_requests_rejected
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent waiting for quota.
    pub fn record_wait(&self, waited: Duration) {
        self.ratelimit_waits.fetch_add(1, Ordering::Relaxed);
        self.ratelimit_wait_ms_total
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a 429 response.
    pub fn record_429(&self) {
        self.ratelimit_429_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_abandoned: self.tasks_abandoned.load(Ordering::Relaxed),
            task_execution_avg_us: self.average_execution_us(),

            ratelimit_requests_allowed: self.ratelimit_requests_allowed.load(Ordering::Relaxed),
            ratelimit_requests_rejected: self
                .ratelimit_requests_rejected
                .load(Ordering::Relaxed),
            ratelimit_waits: self.ratelimit_waits.load(Ordering::Relaxed),
            ratelimit_wait_ms_total: self.ratelimit_wait_ms_total.load(Ordering::Relaxed),
            ratelimit_429_total: self.ratelimit_429_total.load(Ordering::Relaxed),
        }
    }

    /// Calculate average handler execution time.
    fn average_execution_us(&self) -> u64 {
        let total = self.task_execution_us_total.load(Ordering::Relaxed);
        let count = self.tasks_started.load(Ordering::Relaxed);
        if count > 0 {
            total / count
        } else {
            0
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let counters: [(&str, &str, u64); 11] = [
            ("tasks_enqueued", "Tasks accepted by the queue", snapshot.tasks_enqueued),
            ("tasks_rejected", "Tasks rejected at submission", snapshot.tasks_rejected),
            ("tasks_started", "Handler invocations", snapshot.tasks_started),
            ("tasks_completed", "Tasks completed", snapshot.tasks_completed),
            ("tasks_failed", "Tasks failed after all retries", snapshot.tasks_failed),
            ("tasks_retried", "Retry attempts scheduled", snapshot.tasks_retried),
            ("tasks_abandoned", "Tasks abandoned at shutdown", snapshot.tasks_abandoned),
            (
                "ratelimit_requests_allowed",
                "Outbound calls allowed",
                snapshot.ratelimit_requests_allowed,
            ),
            (
                "ratelimit_requests_rejected",
                "Outbound calls rejected by an open breaker",
                snapshot.ratelimit_requests_rejected,
            ),
            ("ratelimit_waits", "Outbound calls that waited for quota", snapshot.ratelimit_waits),
            ("ratelimit_429_total", "429 responses received", snapshot.ratelimit_429_total),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!("# HELP matchwatch_{name} {help}\n"));
            output.push_str(&format!("# TYPE matchwatch_{name} counter\n"));
            output.push_str(&format!("matchwatch_{name} {value}\n"));
        }

        output.push_str("# HELP matchwatch_task_execution_avg_us Average handler execution time\n");
        output.push_str("# TYPE matchwatch_task_execution_avg_us gauge\n");
        output.push_str(&format!(
            "matchwatch_task_execution_avg_us {}\n",
            snapshot.task_execution_avg_us
        ));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    // Tasks
    pub tasks_enqueued: u64,
    pub tasks_rejected: u64,
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_abandoned: u64,
    pub task_execution_avg_us: u64,

    // Rate limiting
    pub ratelimit_requests_allowed: u64,
    pub ratelimit_requests_rejected: u64,
    pub ratelimit_waits: u64,
    pub ratelimit_wait_ms_total: u64,
    pub ratelimit_429_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.tasks_enqueued.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.ratelimit_429_total.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_task_lifecycle_counters() {
        let metrics = Metrics::new();

        metrics.record_task_enqueued();
        metrics.record_task_enqueued();
        metrics.record_task_started();
        metrics.record_task_finished(true);
        metrics.record_task_started();
        metrics.record_task_retried();
        metrics.record_task_finished(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_enqueued, 2);
        assert_eq!(snapshot.tasks_started, 2);
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.tasks_retried, 1);
    }

    #[test]
    fn test_average_execution_empty() {
        let metrics = Metrics::new();
        assert_eq!(metrics.average_execution_us(), 0);
    }

    #[test]
    fn test_average_execution() {
        let metrics = Metrics::new();
        metrics.record_task_started();
        metrics.record_task_execution(Duration::from_micros(100));
        metrics.record_task_started();
        metrics.record_task_execution(Duration::from_micros(300));
        assert_eq!(metrics.average_execution_us(), 200);
    }

    #[test]
    fn test_rate_limit_counters() {
        let metrics = Metrics::new();
        metrics.record_request_allowed();
        metrics.record_request_rejected();
        metrics.record_wait(Duration::from_millis(250));
        metrics.record_wait(Duration::from_millis(750));
        metrics.record_429();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ratelimit_requests_allowed, 1);
        assert_eq!(snapshot.ratelimit_requests_rejected, 1);
        assert_eq!(snapshot.ratelimit_waits, 2);
        assert_eq!(snapshot.ratelimit_wait_ms_total, 1000);
        assert_eq!(snapshot.ratelimit_429_total, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.record_task_enqueued();

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("matchwatch_tasks_enqueued 1"));
        assert!(prometheus.contains("# TYPE matchwatch_tasks_failed counter"));
        assert!(prometheus.contains("matchwatch_task_execution_avg_us 0"));
    }
}

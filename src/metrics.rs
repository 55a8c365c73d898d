//! Request metrics for the gateway
//!
//! Tracks totals, successes, failures, auth failures, and an incrementally
//! updated mean response time. Counters are process-local and reset on
//! restart.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Request metrics for the gateway
pub struct MetricsCollector {
    /// Total requests seen, any outcome
    total_requests: AtomicU64,
    /// Requests that completed without an error status
    successful_requests: AtomicU64,
    /// Requests that ended in a 4xx/5xx
    failed_requests: AtomicU64,
    /// Subset of failures caused by authentication (401)
    auth_failures: AtomicU64,
    /// Epoch milliseconds of the most recent request, 0 before the first
    last_request_ms: AtomicI64,
    /// Incremental mean latency; folded under a lock to keep
    /// (avg * n + elapsed) / (n + 1) exact
    latency: Mutex<LatencyMean>,
    /// Process start, for uptime reporting
    started: Instant,
}

#[derive(Default)]
struct LatencyMean {
    avg_ms: f64,
    samples: u64,
}

impl MetricsCollector {
    /// Create a new collector with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            last_request_ms: AtomicI64::new(0),
            latency: Mutex::new(LatencyMean::default()),
            started: Instant::now(),
        }
    }

    /// Record one completed request. Called exactly once per request,
    /// whatever the outcome.
    pub fn record_request(&self, success: bool, auth_failure: bool, elapsed_ms: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        if auth_failure {
            self.auth_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_request_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);

        let mut latency = self.latency.lock();
        #[allow(clippy::cast_precision_loss)]
        let n = latency.samples as f64;
        latency.avg_ms = (latency.avg_ms * n + elapsed_ms) / (n + 1.0);
        latency.samples += 1;
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self, active_sessions: usize) -> MetricsSnapshot {
        let latency = self.latency.lock();
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            avg_response_time_ms: latency.avg_ms,
            last_request_ms: self.last_request_ms.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
            active_sessions,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of gateway metrics, served by GET /metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total requests seen
    pub total_requests: u64,
    /// Requests that completed without an error status
    pub successful_requests: u64,
    /// Requests that ended in a 4xx/5xx
    pub failed_requests: u64,
    /// Failures caused by authentication
    pub auth_failures: u64,
    /// Mean response time in milliseconds
    pub avg_response_time_ms: f64,
    /// Epoch milliseconds of the most recent request, 0 before the first
    pub last_request_ms: i64,
    /// Process uptime in seconds
    pub uptime_secs: u64,
    /// Live sessions at snapshot time
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.record_request(true, false, 10.0);
        metrics.record_request(true, false, 20.0);
        metrics.record_request(false, true, 30.0);

        let snap = metrics.snapshot(2);
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.successful_requests, 2);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.auth_failures, 1);
        assert_eq!(snap.active_sessions, 2);
        assert!(snap.last_request_ms > 0);
    }

    #[test]
    fn test_incremental_mean() {
        let metrics = MetricsCollector::new();
        metrics.record_request(true, false, 10.0);
        assert!((metrics.snapshot(0).avg_response_time_ms - 10.0).abs() < f64::EPSILON);

        metrics.record_request(true, false, 20.0);
        assert!((metrics.snapshot(0).avg_response_time_ms - 15.0).abs() < f64::EPSILON);

        metrics.record_request(true, false, 30.0);
        assert!((metrics.snapshot(0).avg_response_time_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_not_counted_as_success() {
        let metrics = MetricsCollector::new();
        metrics.record_request(false, false, 5.0);

        let snap = metrics.snapshot(0);
        assert_eq!(snap.successful_requests, 0);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.auth_failures, 0);
    }

    #[test]
    fn test_zero_state() {
        let metrics = MetricsCollector::default();
        let snap = metrics.snapshot(0);
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.last_request_ms, 0);
        assert!(snap.avg_response_time_ms.abs() < f64::EPSILON);
    }
}

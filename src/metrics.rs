use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Dispatch and streaming counters
///
/// Thread-safe atomic counters shared by every request task.
#[derive(Default)]
pub struct GatewayMetrics {
    /// Total number of dispatches started
    pub dispatches: AtomicU64,

    /// Dispatches that returned an upstream success
    pub successes: AtomicU64,

    /// Dispatches that exhausted every candidate
    pub exhausted: AtomicU64,

    /// Dispatches rejected because no credential was eligible
    pub no_eligible: AtomicU64,

    /// Re-issues against the same credential
    pub retries: AtomicU64,

    /// Moves to the next candidate
    pub switches: AtomicU64,

    /// Streams that failed after partial delivery
    pub truncated_streams: AtomicU64,

    /// Usage records emitted
    pub usage_records: AtomicU64,

    /// Total time to first upstream byte in microseconds, over successes
    pub total_dispatch_time_us: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful dispatch and how long it took to get a response
    pub fn record_success(&self, duration: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.total_dispatch_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_eligible(&self) {
        self.no_eligible.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_switch(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_truncated(&self) {
        self.truncated_streams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_usage(&self) {
        self.usage_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average time to a successful upstream response in microseconds
    pub fn avg_dispatch_time_us(&self) -> u64 {
        let total = self.total_dispatch_time_us.load(Ordering::Relaxed);
        let count = self.successes.load(Ordering::Relaxed);
        if count > 0 { total / count } else { 0 }
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.dispatches.load(Ordering::Relaxed);
        let successful = self.successes.load(Ordering::Relaxed);
        if total > 0 {
            (successful as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Get snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            no_eligible: self.no_eligible.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            truncated_streams: self.truncated_streams.load(Ordering::Relaxed),
            usage_records: self.usage_records.load(Ordering::Relaxed),
            avg_dispatch_time_us: self.avg_dispatch_time_us(),
            success_rate: self.success_rate(),
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.dispatches,
            &self.successes,
            &self.exhausted,
            &self.no_eligible,
            &self.retries,
            &self.switches,
            &self.truncated_streams,
            &self.usage_records,
            &self.total_dispatch_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Immutable snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub dispatches: u64,
    pub successes: u64,
    pub exhausted: u64,
    pub no_eligible: u64,
    pub retries: u64,
    pub switches: u64,
    pub truncated_streams: u64,
    pub usage_records: u64,
    pub avg_dispatch_time_us: u64,
    pub success_rate: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Gateway Metrics: {} dispatches ({:.1}% success), {} exhausted, {} unavailable, {} retries, {} switches, {} truncated, avg {:.2}ms",
            self.dispatches,
            self.success_rate,
            self.exhausted,
            self.no_eligible,
            self.retries,
            self.switches,
            self.truncated_streams,
            self.avg_dispatch_time_us as f64 / 1000.0
        )
    }
}

lazy_static::lazy_static! {
    /// Global metrics instance
    pub static ref GATEWAY_METRICS: GatewayMetrics = GatewayMetrics::new();
}

//! Metrics collection for the stage file proxy
//!
//! This module provides thread-safe metrics collection using atomic operations.
//! It tracks decisions by outcome, origin fetches and fetch latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the proxy
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    // Decision outcomes
    total_decisions: AtomicU64,
    skipped_not_in_namespace: AtomicU64,
    skipped_disabled: AtomicU64,
    skipped_resolvable: AtomicU64,
    hotlink_redirects: AtomicU64,
    local_redirects: AtomicU64,
    failed_decisions: AtomicU64,

    // Fetch statistics
    origin_fetches: AtomicU64,
    failed_fetches: AtomicU64,
    deduplicated_waits: AtomicU64,
    already_local: AtomicU64,
    bytes_from_origin: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_fetch_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_decisions: u64,
    pub skipped_not_in_namespace: u64,
    pub skipped_disabled: u64,
    pub skipped_resolvable: u64,
    pub hotlink_redirects: u64,
    pub local_redirects: u64,
    pub failed_decisions: u64,

    pub origin_fetches: u64,
    pub failed_fetches: u64,
    pub deduplicated_waits: u64,
    pub already_local: u64,
    pub bytes_from_origin: u64,

    pub total_fetch_duration_us: u64,
}

impl ProxyMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip_not_in_namespace(&self) {
        self.total_decisions.fetch_add(1, Ordering::Relaxed);
        self.skipped_not_in_namespace.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip_disabled(&self) {
        self.total_decisions.fetch_add(1, Ordering::Relaxed);
        self.skipped_disabled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip_resolvable(&self) {
        self.total_decisions.fetch_add(1, Ordering::Relaxed);
        self.skipped_resolvable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hotlink(&self) {
        self.total_decisions.fetch_add(1, Ordering::Relaxed);
        self.hotlink_redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_redirect(&self) {
        self.total_decisions.fetch_add(1, Ordering::Relaxed);
        self.local_redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_decision(&self) {
        self.total_decisions.fetch_add(1, Ordering::Relaxed);
        self.failed_decisions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one network retrieval against the origin
    ///
    /// # Arguments
    /// * `success` - Whether the file was retrieved and published
    /// * `bytes` - Body size received (0 on failure)
    /// * `duration` - Time spent fetching and writing
    pub fn record_origin_fetch(&self, success: bool, bytes: u64, duration: Duration) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_fetches.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
        self.total_fetch_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a request that joined another request's in-flight fetch
    pub fn record_deduplicated_wait(&self) {
        self.deduplicated_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fetch that was skipped because the file appeared locally
    pub fn record_already_local(&self) {
        self.already_local.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are read independently, so a snapshot taken under load may
    /// not be perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_decisions: self.total_decisions.load(Ordering::Relaxed),
            skipped_not_in_namespace: self.skipped_not_in_namespace.load(Ordering::Relaxed),
            skipped_disabled: self.skipped_disabled.load(Ordering::Relaxed),
            skipped_resolvable: self.skipped_resolvable.load(Ordering::Relaxed),
            hotlink_redirects: self.hotlink_redirects.load(Ordering::Relaxed),
            local_redirects: self.local_redirects.load(Ordering::Relaxed),
            failed_decisions: self.failed_decisions.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            failed_fetches: self.failed_fetches.load(Ordering::Relaxed),
            deduplicated_waits: self.deduplicated_waits.load(Ordering::Relaxed),
            already_local: self.already_local.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            total_fetch_duration_us: self.total_fetch_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    ///
    /// This is primarily useful for testing.
    pub fn reset(&self) {
        self.total_decisions.store(0, Ordering::Relaxed);
        self.skipped_not_in_namespace.store(0, Ordering::Relaxed);
        self.skipped_disabled.store(0, Ordering::Relaxed);
        self.skipped_resolvable.store(0, Ordering::Relaxed);
        self.hotlink_redirects.store(0, Ordering::Relaxed);
        self.local_redirects.store(0, Ordering::Relaxed);
        self.failed_decisions.store(0, Ordering::Relaxed);
        self.origin_fetches.store(0, Ordering::Relaxed);
        self.failed_fetches.store(0, Ordering::Relaxed);
        self.deduplicated_waits.store(0, Ordering::Relaxed);
        self.already_local.store(0, Ordering::Relaxed);
        self.bytes_from_origin.store(0, Ordering::Relaxed);
        self.total_fetch_duration_us.store(0, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Total skipped decisions across all reasons
    pub fn skipped(&self) -> u64 {
        self.skipped_not_in_namespace + self.skipped_disabled + self.skipped_resolvable
    }

    /// Origin fetch failure rate as a percentage (0.0 to 100.0)
    pub fn fetch_failure_rate(&self) -> f64 {
        if self.origin_fetches == 0 {
            0.0
        } else {
            (self.failed_fetches as f64 / self.origin_fetches as f64) * 100.0
        }
    }

    /// Average origin fetch duration in milliseconds
    pub fn avg_fetch_duration_ms(&self) -> f64 {
        if self.origin_fetches == 0 {
            0.0
        } else {
            (self.total_fetch_duration_us as f64 / self.origin_fetches as f64) / 1000.0
        }
    }
}

//! Pool metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters maintained by the pool.
///
/// Counters are updated with relaxed ordering; they feed monitoring, not
/// pool decisions.
#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    checkouts_succeeded: AtomicU64,
    checkouts_failed: AtomicU64,
    validations_performed: AtomicU64,
    validations_failed: AtomicU64,
    connections_pruned: AtomicU64,
}

impl PoolMetrics {
    pub(crate) fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkout(&self) {
        self.checkouts_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkout_failure(&self) {
        self.checkouts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation(&self) {
        self.validations_performed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.validations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pruned(&self) {
        self.connections_pruned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            checkouts_succeeded: self.checkouts_succeeded.load(Ordering::Relaxed),
            checkouts_failed: self.checkouts_failed.load(Ordering::Relaxed),
            validations_performed: self.validations_performed.load(Ordering::Relaxed),
            validations_failed: self.validations_failed.load(Ordering::Relaxed),
            connections_pruned: self.connections_pruned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the pool's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetricsSnapshot {
    /// Connections created over the pool's lifetime.
    pub connections_created: u64,
    /// Connections destroyed over the pool's lifetime.
    pub connections_destroyed: u64,
    /// Checkouts that returned a handle.
    pub checkouts_succeeded: u64,
    /// Checkouts that failed (exhausted, validation, creation, closed).
    pub checkouts_failed: u64,
    /// Validation probes executed.
    pub validations_performed: u64,
    /// Validation probes that marked a handle invalid.
    pub validations_failed: u64,
    /// Connections removed by the pruning task.
    pub connections_pruned: u64,
}

impl PoolMetricsSnapshot {
    /// Fraction of checkouts that succeeded, in `[0.0, 1.0]`.
    ///
    /// Returns `1.0` when no checkout has been attempted yet.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_succeeded + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_succeeded as f64 / total as f64
        }
    }
}

//! Idle-connection pruning strategies.
//!
//! A [`PruneStrategy`] decides which idle handles are eligible for
//! removal and how often the pruning task runs. The pool enforces the
//! floor: no strategy can shrink the total below the configured minimum,
//! and pruning never touches handles that are checked out.

use std::time::Duration;

use tokio::time::Instant;

/// Default interval between prune runs.
pub const DEFAULT_PRUNE_PERIOD: Duration = Duration::from_secs(300);

/// Default idle time after which a handle becomes eligible for pruning.
pub const DEFAULT_IDLE_TIME: Duration = Duration::from_secs(600);

/// Snapshot of an idle handle handed to a [`PruneStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct IdleHandleInfo {
    /// Pool-assigned handle identifier.
    pub id: u64,
    /// When the handle last entered or left a checkout.
    pub last_activity_at: Instant,
}

/// Policy deciding which idle handles to evict and how often.
pub trait PruneStrategy: Send + Sync {
    /// Interval between prune runs; `None` disables the prune timer.
    fn period(&self) -> Option<Duration>;

    /// Select handles to remove, oldest first.
    ///
    /// The pool caps the removal count so the total never drops below
    /// the configured minimum; strategies only classify eligibility.
    fn select(&self, idle: &[IdleHandleInfo], now: Instant) -> Vec<u64>;
}

/// Default strategy: evict handles idle longer than `idle_time`,
/// checked every `prune_period`.
#[derive(Debug, Clone)]
pub struct IdlePruneStrategy {
    prune_period: Duration,
    idle_time: Duration,
}

impl IdlePruneStrategy {
    /// Create a strategy with the given period and idle threshold.
    #[must_use]
    pub fn new(prune_period: Duration, idle_time: Duration) -> Self {
        Self {
            prune_period,
            idle_time,
        }
    }

    /// Interval between prune runs.
    #[must_use]
    pub fn prune_period(&self) -> Duration {
        self.prune_period
    }

    /// Idle time after which a handle becomes eligible.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.idle_time
    }
}

impl Default for IdlePruneStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_PRUNE_PERIOD, DEFAULT_IDLE_TIME)
    }
}

impl PruneStrategy for IdlePruneStrategy {
    fn period(&self) -> Option<Duration> {
        Some(self.prune_period)
    }

    fn select(&self, idle: &[IdleHandleInfo], now: Instant) -> Vec<u64> {
        let mut eligible: Vec<&IdleHandleInfo> = idle
            .iter()
            .filter(|info| now.saturating_duration_since(info.last_activity_at) > self.idle_time)
            .collect();
        eligible.sort_by_key(|info| info.last_activity_at);
        eligible.into_iter().map(|info| info.id).collect()
    }
}

/// Strategy that never evicts idle handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPruneStrategy;

impl PruneStrategy for NoPruneStrategy {
    fn period(&self) -> Option<Duration> {
        None
    }

    fn select(&self, _idle: &[IdleHandleInfo], _now: Instant) -> Vec<u64> {
        Vec::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info(id: u64, idle_for: Duration, now: Instant) -> IdleHandleInfo {
        IdleHandleInfo {
            id,
            last_activity_at: now - idle_for,
        }
    }

    #[test]
    fn test_idle_strategy_selects_only_expired() {
        let strategy = IdlePruneStrategy::new(Duration::from_secs(1), Duration::from_secs(60));
        let now = Instant::now();
        let idle = vec![
            info(1, Duration::from_secs(120), now),
            info(2, Duration::from_secs(30), now),
            info(3, Duration::from_secs(61), now),
        ];

        let selected = strategy.select(&idle, now);
        assert_eq!(selected, vec![1, 3]);
    }

    #[test]
    fn test_idle_strategy_orders_oldest_first() {
        let strategy = IdlePruneStrategy::new(Duration::from_secs(1), Duration::from_secs(10));
        let now = Instant::now();
        let idle = vec![
            info(1, Duration::from_secs(20), now),
            info(2, Duration::from_secs(50), now),
            info(3, Duration::from_secs(30), now),
        ];

        let selected = strategy.select(&idle, now);
        assert_eq!(selected, vec![2, 3, 1]);
    }

    #[test]
    fn test_idle_strategy_empty_when_nothing_expired() {
        let strategy = IdlePruneStrategy::default();
        let now = Instant::now();
        let idle = vec![info(1, Duration::from_secs(1), now)];

        assert!(strategy.select(&idle, now).is_empty());
    }

    #[test]
    fn test_no_prune_strategy_is_disabled() {
        let strategy = NoPruneStrategy;
        assert!(strategy.period().is_none());

        let now = Instant::now();
        let idle = vec![info(1, Duration::from_secs(3600), now)];
        assert!(strategy.select(&idle, now).is_empty());
    }
}

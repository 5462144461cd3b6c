//! Handle lifecycle bookkeeping.
//!
//! The pool tracks every handle it owns with a small piece of metadata.
//! A handle is either AVAILABLE (parked in the idle queue) or ACTIVE
//! (lent to exactly one caller); it moves AVAILABLE→ACTIVE only through
//! checkout and ACTIVE→AVAILABLE only through a successful return.

use std::time::Duration;

use tokio::time::Instant;

/// State of a pooled handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Parked in the pool, ready for checkout.
    Available,
    /// Lent to a caller.
    Active,
}

impl HandleState {
    /// Check if the handle can be checked out.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// Check if the handle is lent out.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Metadata the pool tracks for every handle it owns.
#[derive(Debug, Clone)]
pub struct HandleMetadata {
    id: u64,
    created_at: Instant,
    last_activity_at: Instant,
    last_validated_at: Option<Instant>,
    checkout_count: u64,
    state: HandleState,
}

impl HandleMetadata {
    /// Create metadata for a newly created handle.
    pub(crate) fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_activity_at: now,
            last_validated_at: None,
            checkout_count: 0,
            state: HandleState::Available,
        }
    }

    /// Pool-assigned identifier, unique for the pool's lifetime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the handle was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the handle last entered or left a checkout.
    #[must_use]
    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    /// Number of times the handle has been checked out.
    #[must_use]
    pub fn checkout_count(&self) -> u64 {
        self.checkout_count
    }

    /// Current state of the handle.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// How long the handle has been idle as of `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }

    /// Check if the handle has been idle longer than `idle_time`.
    #[must_use]
    pub fn is_idle_longer_than(&self, idle_time: Duration, now: Instant) -> bool {
        self.idle_for(now) > idle_time
    }

    /// Check if a background validation is due.
    ///
    /// The reference point is the later of the last validation and the
    /// last checkout activity, so recently used handles are not probed.
    #[must_use]
    pub fn needs_validation(&self, period: Duration, now: Instant) -> bool {
        let basis = self
            .last_validated_at
            .map_or(self.last_activity_at, |v| v.max(self.last_activity_at));
        now.saturating_duration_since(basis) > period
    }

    /// Mark the handle as checked out.
    pub(crate) fn mark_checkout(&mut self) {
        self.last_activity_at = Instant::now();
        self.checkout_count += 1;
        self.state = HandleState::Active;
    }

    /// Mark the handle as returned to the idle queue.
    pub(crate) fn mark_checkin(&mut self) {
        self.last_activity_at = Instant::now();
        self.state = HandleState::Available;
    }

    /// Mark the handle as having passed a background validation.
    pub(crate) fn mark_validated(&mut self) {
        self.last_validated_at = Some(Instant::now());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_state_predicates() {
        assert!(HandleState::Available.is_available());
        assert!(!HandleState::Available.is_active());
        assert!(HandleState::Active.is_active());
        assert!(!HandleState::Active.is_available());
    }

    #[test]
    fn test_metadata_new() {
        let meta = HandleMetadata::new(1);
        assert_eq!(meta.id(), 1);
        assert_eq!(meta.checkout_count(), 0);
        assert_eq!(meta.state(), HandleState::Available);
    }

    #[test]
    fn test_metadata_checkout_checkin_cycle() {
        let mut meta = HandleMetadata::new(1);
        meta.mark_checkout();
        assert_eq!(meta.state(), HandleState::Active);
        assert_eq!(meta.checkout_count(), 1);

        meta.mark_checkin();
        assert_eq!(meta.state(), HandleState::Available);
        assert_eq!(meta.checkout_count(), 1);
    }

    #[test]
    fn test_idle_detection() {
        let meta = HandleMetadata::new(1);
        let later = Instant::now() + Duration::from_secs(10);
        assert!(meta.is_idle_longer_than(Duration::from_secs(5), later));
        assert!(!meta.is_idle_longer_than(Duration::from_secs(60), later));
    }

    #[test]
    fn test_validation_due_uses_latest_stamp() {
        let mut meta = HandleMetadata::new(1);
        let later = Instant::now() + Duration::from_secs(10);
        assert!(meta.needs_validation(Duration::from_secs(5), later));

        meta.mark_validated();
        assert!(!meta.needs_validation(Duration::from_secs(60), later));
    }
}

//! Pool configuration.

use std::time::Duration;

/// Configuration for the blocking connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
///
/// The configuration is immutable once a pool has been initialized.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Minimum number of connections to maintain.
    pub min_connections: u32,

    /// Maximum number of connections allowed.
    pub max_connections: u32,

    /// Time a checkout blocks waiting for a connection before failing.
    pub block_wait_time: Duration,

    /// Whether to validate connections on checkout.
    pub validate_on_check_out: bool,

    /// Whether to validate connections when they are returned.
    pub validate_on_check_in: bool,

    /// Whether to validate idle connections in the background.
    pub validate_periodically: bool,

    /// Interval after which an idle connection is due for validation.
    pub validate_period: Duration,

    /// Whether initialization aborts on the first connection failure.
    ///
    /// When disabled, failed slots are skipped and the pool may start
    /// below `min_connections`; it grows back lazily on demand.
    pub fail_fast_initialize: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 3,
            max_connections: 10,
            block_wait_time: Duration::from_secs(30),
            validate_on_check_out: false,
            validate_on_check_in: false,
            validate_periodically: false,
            validate_period: Duration::from_secs(1800),
            fail_fast_initialize: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the time a checkout blocks before failing with
    /// [`PoolError::Exhausted`](crate::error::PoolError::Exhausted).
    #[must_use]
    pub fn block_wait_time(mut self, wait: Duration) -> Self {
        self.block_wait_time = wait;
        self
    }

    /// Enable or disable validating connections on checkout.
    #[must_use]
    pub fn validate_on_check_out(mut self, enabled: bool) -> Self {
        self.validate_on_check_out = enabled;
        self
    }

    /// Enable or disable validating connections on return.
    #[must_use]
    pub fn validate_on_check_in(mut self, enabled: bool) -> Self {
        self.validate_on_check_in = enabled;
        self
    }

    /// Enable or disable background validation of idle connections.
    #[must_use]
    pub fn validate_periodically(mut self, enabled: bool) -> Self {
        self.validate_periodically = enabled;
        self
    }

    /// Set the interval after which an idle connection is due for validation.
    #[must_use]
    pub fn validate_period(mut self, period: Duration) -> Self {
        self.validate_period = period;
        self
    }

    /// Enable or disable fail-fast initialization.
    #[must_use]
    pub fn fail_fast_initialize(mut self, enabled: bool) -> Self {
        self.fail_fast_initialize = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.max_connections == 0 {
            return Err(crate::error::PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(crate::error::PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.validate_periodically && self.validate_period.is_zero() {
            return Err(crate::error::PoolError::Configuration(
                "validate_period must be non-zero when validating periodically".into(),
            ));
        }
        Ok(())
    }
}

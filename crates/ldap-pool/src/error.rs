//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by connection factories and handles.
///
/// This is the boundary error type for everything the pool delegates to a
/// backend: establishing transport connections, closing them, and the
/// minimal probe operations validators issue.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to establish the underlying transport connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    Closed,

    /// A directory operation failed.
    #[error("operation failed: {0}")]
    Operation(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Fail-fast initialization could not reach the minimum pool size.
    #[error("pool initialization failed: {0}")]
    InitializationFailed(#[source] ConnectionError),

    /// No connection became available within the block wait time.
    #[error("pool exhausted; no connection available within {0:?}")]
    Exhausted(Duration),

    /// Checkout validation failures exceeded the retry budget.
    ///
    /// Repeated failures usually mean the directory itself is unhealthy,
    /// not just a single stale connection.
    #[error("connection validation failed after {attempts} attempts")]
    ValidationFailed {
        /// Number of candidate handles destroyed before giving up.
        attempts: u32,
    },

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Pool has not been initialized yet.
    #[error("pool is not initialized")]
    NotInitialized,

    /// A returned handle is not managed by this pool.
    #[error("handle {id} is not managed by this pool")]
    UnknownHandle {
        /// Identifier of the offending handle.
        id: u64,
    },

    /// Connection creation failed during lazy growth.
    #[error("failed to create connection: {0}")]
    CreateFailed(#[source] ConnectionError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error is transient and the checkout may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Exhausted(_) | Self::ValidationFailed { .. } | Self::CreateFailed(_)
        )
    }
}

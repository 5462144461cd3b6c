//! Connection factory and source traits.
//!
//! Two seams separate the pool from everything protocol-specific:
//!
//! - [`ConnectionFactory`] is the SPI the pool *consumes*: backends
//!   create and destroy opaque [`ConnectionHandle`]s. The pool is
//!   generic over this trait and never branches on backend identity.
//! - [`ConnectionSource`] is the interface the pool *exposes*: callers
//!   (bind handlers, search executors) obtain ready-to-use connections
//!   from it without knowing whether pooling is in play.
//!   [`PooledConnectionFactory`] and [`DirectConnectionFactory`] are the
//!   two interchangeable implementations.

use async_trait::async_trait;

use crate::error::{ConnectionError, PoolError};
use crate::pool::{BlockingConnectionPool, PooledConnection};

/// An opaque, poolable directory connection.
#[async_trait]
pub trait ConnectionHandle: Send + 'static {
    /// Open the underlying transport connection.
    async fn open(&mut self) -> Result<(), ConnectionError>;

    /// Close the underlying transport connection.
    async fn close(&mut self);
}

/// Creates and destroys connection handles.
///
/// Implementations must be safe to call concurrently from pool-internal
/// tasks.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The handle type this factory produces.
    type Handle: ConnectionHandle;

    /// Create a new, unopened handle.
    async fn create(&self) -> Result<Self::Handle, ConnectionError>;

    /// Destroy a handle, closing its transport connection.
    async fn destroy(&self, mut handle: Self::Handle) {
        handle.close().await;
    }
}

/// A provider of ready-to-use directory connections.
///
/// Both pooled and non-pooled factories implement this trait so
/// consumers stay agnostic to pooling.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// The connection type handed to callers.
    type Connection: ConnectionHandle;

    /// Obtain an open connection.
    async fn get_connection(&self) -> Result<Self::Connection, PoolError>;
}

/// Connection source that opens a fresh connection per request.
///
/// The returned handle's `close()` really closes the transport; there is
/// no reuse.
#[derive(Debug, Clone)]
pub struct DirectConnectionFactory<F> {
    factory: F,
}

impl<F: ConnectionFactory> DirectConnectionFactory<F> {
    /// Create a direct source over the given factory.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F: ConnectionFactory> ConnectionSource for DirectConnectionFactory<F> {
    type Connection = F::Handle;

    async fn get_connection(&self) -> Result<F::Handle, PoolError> {
        let mut handle = self
            .factory
            .create()
            .await
            .map_err(PoolError::CreateFailed)?;
        if let Err(e) = handle.open().await {
            self.factory.destroy(handle).await;
            return Err(PoolError::CreateFailed(e));
        }
        Ok(handle)
    }
}

/// Adapter exposing a [`BlockingConnectionPool`] as a [`ConnectionSource`].
///
/// The connection it yields is the pool's guard: its `close()` performs a
/// pool return, not a transport close, so every handle ends up back in
/// the pool it came from.
pub struct PooledConnectionFactory<F: ConnectionFactory> {
    pool: BlockingConnectionPool<F>,
}

impl<F: ConnectionFactory> PooledConnectionFactory<F> {
    /// Create an adapter over the given pool.
    pub fn new(pool: BlockingConnectionPool<F>) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &BlockingConnectionPool<F> {
        &self.pool
    }
}

impl<F: ConnectionFactory> Clone for PooledConnectionFactory<F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnectionFactory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnectionFactory").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F: ConnectionFactory> ConnectionSource for PooledConnectionFactory<F> {
    type Connection = PooledConnection<F>;

    async fn get_connection(&self) -> Result<PooledConnection<F>, PoolError> {
        self.pool.checkout().await
    }
}

//! # ldap-driver-pool
//!
//! Blocking connection pool for LDAP directory connections.
//!
//! The pool manages a bounded set of live directory connections on top
//! of a pluggable [`ConnectionFactory`], handing out validated handles
//! under load, reclaiming idle ones, and surviving backend outages at
//! startup. It is generic over the backend: anything that can create
//! and destroy an opaque [`ConnectionHandle`] can be pooled.
//!
//! ## Features
//!
//! - Bounded min/max pool size with FIFO reuse (oldest idle first)
//! - Blocking checkout with a configurable wait timeout
//! - Pluggable validation: search probe, compare probe, or none;
//!   on checkout, on return, and periodically over idle handles
//! - Pluggable idle pruning, never shrinking below the minimum
//! - Fail-fast initialization for early detection of backend outages
//! - [`PooledConnectionFactory`] adapter so pooled and non-pooled
//!   connection sources are interchangeable to callers
//!
//! ## Example
//!
//! ```rust,ignore
//! use ldap_driver_pool::{BlockingConnectionPool, PoolConfig, SearchValidator};
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .min_connections(3)
//!     .max_connections(10)
//!     .validate_on_check_out(true)
//!     .block_wait_time(Duration::from_secs(5));
//!
//! let pool = BlockingConnectionPool::builder(factory)
//!     .config(config)
//!     .validator(SearchValidator::new())
//!     .build()?;
//! pool.initialize().await?;
//!
//! let conn = pool.checkout().await?;
//! // Use the connection...
//! conn.close().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod factory;
pub mod lifecycle;
pub mod metrics;
pub mod pool;
pub mod prune;
pub mod validate;

// Re-export commonly used types
pub use config::PoolConfig;
pub use error::{ConnectionError, PoolError};
pub use factory::{
    ConnectionFactory, ConnectionHandle, ConnectionSource, DirectConnectionFactory,
    PooledConnectionFactory,
};
pub use lifecycle::{HandleMetadata, HandleState};
pub use metrics::PoolMetricsSnapshot;
pub use pool::{BlockingConnectionPool, PoolBuilder, PoolStatus, PooledConnection};
pub use prune::{IdleHandleInfo, IdlePruneStrategy, NoPruneStrategy, PruneStrategy};
pub use validate::{
    AlwaysValidValidator, CompareProbe, CompareValidator, ProbeStatus, ProbeSupport, SearchProbe,
    SearchValidator, Validator,
};

//! # ldap-testing
//!
//! Test infrastructure for LDAP driver development.
//!
//! This crate provides an in-process mock directory backend for unit and
//! integration tests: a [`MockDirectory`] connection factory with
//! scriptable failure injection and full create/destroy accounting, so
//! pool behavior can be tested deterministically without a directory
//! server.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ldap_testing::MockDirectory;
//! use ldap_driver_pool::{BlockingConnectionPool, PoolConfig};
//!
//! #[tokio::test]
//! async fn test_with_mock_directory() {
//!     // Second connection attempt fails, everything else succeeds.
//!     let directory = MockDirectory::builder().fail_create_at(2).build();
//!
//!     let pool = BlockingConnectionPool::new(directory.clone(), PoolConfig::default())
//!         .unwrap();
//!     // ...
//!     assert_eq!(directory.created(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockConnection, MockDirectory, MockDirectoryBuilder};

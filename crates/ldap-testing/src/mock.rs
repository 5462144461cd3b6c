//! In-process mock directory backend with scriptable failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ldap_driver_pool::{
    CompareProbe, ConnectionError, ConnectionFactory, ConnectionHandle, ProbeStatus, ProbeSupport,
    SearchProbe,
};

/// LDAP `unavailable` result code, reported by failing probes.
const RESULT_UNAVAILABLE: u32 = 52;

#[derive(Debug, Default)]
struct ConnFlags {
    open: AtomicBool,
    poisoned: AtomicBool,
}

#[derive(Debug)]
struct Shared {
    create_attempts: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    fail_creates_after: AtomicU64,
    probes_fail: AtomicBool,
    fail_create_at: Mutex<HashSet<u64>>,
    conns: Mutex<HashMap<u64, Arc<ConnFlags>>>,
    connect_latency: Duration,
}

/// Builder for [`MockDirectory`].
#[derive(Debug, Default)]
pub struct MockDirectoryBuilder {
    fail_create_at: HashSet<u64>,
    fail_creates_after: Option<u64>,
    connect_latency: Duration,
}

impl MockDirectoryBuilder {
    /// Make the n-th `create` call fail (1-based).
    #[must_use]
    pub fn fail_create_at(mut self, n: u64) -> Self {
        self.fail_create_at.insert(n);
        self
    }

    /// Make every `create` call after the first `n` fail, simulating a
    /// backend outage.
    #[must_use]
    pub fn fail_creates_after(mut self, n: u64) -> Self {
        self.fail_creates_after = Some(n);
        self
    }

    /// Add artificial latency to every `create` call.
    #[must_use]
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Build the mock directory.
    #[must_use]
    pub fn build(self) -> MockDirectory {
        MockDirectory {
            shared: Arc::new(Shared {
                create_attempts: AtomicU64::new(0),
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                fail_creates_after: AtomicU64::new(self.fail_creates_after.unwrap_or(u64::MAX)),
                probes_fail: AtomicBool::new(false),
                fail_create_at: Mutex::new(self.fail_create_at),
                conns: Mutex::new(HashMap::new()),
                connect_latency: self.connect_latency,
            }),
        }
    }
}

/// Mock connection factory.
///
/// Clones share state, so tests can keep one clone for assertions while
/// the pool owns another. Connections are numbered in creation order
/// starting at 1; probe and create failures can be scripted per call or
/// flipped globally mid-test.
#[derive(Debug, Clone)]
pub struct MockDirectory {
    shared: Arc<Shared>,
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDirectory {
    /// Create a mock directory where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> MockDirectoryBuilder {
        MockDirectoryBuilder::default()
    }

    /// Number of connections successfully created.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Number of connections destroyed.
    #[must_use]
    pub fn destroyed(&self) -> u64 {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Number of connections currently alive (created minus destroyed).
    #[must_use]
    pub fn live(&self) -> u64 {
        self.created().saturating_sub(self.destroyed())
    }

    /// Make every `create` call after the first `n` fail.
    pub fn set_fail_creates_after(&self, n: u64) {
        self.shared.fail_creates_after.store(n, Ordering::SeqCst);
    }

    /// Make every probe on every connection fail, simulating a directory
    /// that accepts connections but cannot answer.
    pub fn set_probes_fail(&self, fail: bool) {
        self.shared.probes_fail.store(fail, Ordering::SeqCst);
    }

    /// Poison the connection with the given id: its probes fail and it
    /// cannot be reopened.
    pub fn poison(&self, id: u64) {
        if let Some(flags) = self.shared.conns.lock().get(&id) {
            flags.poisoned.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ConnectionFactory for MockDirectory {
    type Handle = MockConnection;

    async fn create(&self) -> Result<MockConnection, ConnectionError> {
        let n = self.shared.create_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.shared.connect_latency.is_zero() {
            tokio::time::sleep(self.shared.connect_latency).await;
        }
        if n > self.shared.fail_creates_after.load(Ordering::SeqCst)
            || self.shared.fail_create_at.lock().contains(&n)
        {
            return Err(ConnectionError::Connect(format!(
                "scripted failure for connection {n}"
            )));
        }
        let flags = Arc::new(ConnFlags::default());
        self.shared.conns.lock().insert(n, Arc::clone(&flags));
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: n,
            flags,
            shared: Arc::clone(&self.shared),
        })
    }

    async fn destroy(&self, mut handle: MockConnection) {
        handle.close().await;
        self.shared.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A connection produced by [`MockDirectory`].
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    flags: Arc<ConnFlags>,
    shared: Arc<Shared>,
}

impl MockConnection {
    /// Creation-order identifier of this connection (1-based).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Check if the transport is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.flags.open.load(Ordering::SeqCst)
    }

    /// Poison this connection: its probes fail and it cannot be
    /// reopened.
    pub fn poison(&self) {
        self.flags.poisoned.store(true, Ordering::SeqCst);
    }

    fn answering(&self) -> bool {
        self.flags.open.load(Ordering::SeqCst)
            && !self.flags.poisoned.load(Ordering::SeqCst)
            && !self.shared.probes_fail.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandle for MockConnection {
    async fn open(&mut self) -> Result<(), ConnectionError> {
        if self.flags.poisoned.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.flags.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.flags.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProbeSupport for MockConnection {
    async fn search(&mut self, _probe: &SearchProbe) -> Result<ProbeStatus, ConnectionError> {
        if self.answering() {
            Ok(ProbeStatus::Success)
        } else {
            Ok(ProbeStatus::Failure(RESULT_UNAVAILABLE))
        }
    }

    async fn compare(&mut self, _probe: &CompareProbe) -> Result<ProbeStatus, ConnectionError> {
        if self.answering() {
            Ok(ProbeStatus::Success)
        } else {
            Ok(ProbeStatus::Failure(RESULT_UNAVAILABLE))
        }
    }
}

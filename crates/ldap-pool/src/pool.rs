//! Blocking connection pool implementation.
//!
//! The pool owns every handle it creates. Handles live in one of two
//! disjoint collections: `available` (a FIFO queue, oldest idle first)
//! and `active` (lent to exactly one caller each). All membership
//! changes happen under a single mutex held only for the change itself;
//! validation and connection open/close I/O run outside that critical
//! section so a slow backend never stalls unrelated pool operations.
//!
//! Checkout order among waiters is first-blocked, first-served: waiters
//! park in a FIFO queue of one-shot channels and a returned handle is
//! handed directly to the head waiter. Because grants happen while the
//! state lock is held and a timed-out waiter deregisters under the same
//! lock, a handle is granted to exactly one waiter (never zero, never
//! two) and a timeout that races a return resolves deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::{ConnectionError, PoolError};
use crate::factory::{ConnectionFactory, ConnectionHandle};
use crate::lifecycle::HandleMetadata;
use crate::metrics::{PoolMetrics, PoolMetricsSnapshot};
use crate::prune::{IdleHandleInfo, IdlePruneStrategy, PruneStrategy};
use crate::validate::{AlwaysValidValidator, Validator};

/// Candidate handles destroyed per checkout before giving up.
const CHECKOUT_VALIDATION_ATTEMPTS: u32 = 3;

/// A bounded, blocking pool of directory connections.
///
/// Cloning is cheap; clones share the same pool. The pool must be
/// [`initialize`](Self::initialize)d before use and should be
/// [`shutdown`](Self::shutdown) when no longer needed.
///
/// # Example
///
/// ```rust,ignore
/// use ldap_driver_pool::{BlockingConnectionPool, PoolConfig, SearchValidator};
///
/// let pool = BlockingConnectionPool::builder(factory)
///     .config(PoolConfig::new().min_connections(2).max_connections(10))
///     .validator(SearchValidator::new())
///     .build()?;
/// pool.initialize().await?;
///
/// let conn = pool.checkout().await?;
/// // Use the connection...
/// conn.close().await?;
/// ```
pub struct BlockingConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for BlockingConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`BlockingConnectionPool`].
pub struct PoolBuilder<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    validator: Arc<dyn Validator<F::Handle>>,
    prune_strategy: Arc<dyn PruneStrategy>,
}

impl<F: ConnectionFactory> PoolBuilder<F> {
    /// Create a builder with default configuration, an
    /// [`AlwaysValidValidator`] and an [`IdlePruneStrategy`].
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            config: PoolConfig::default(),
            validator: Arc::new(AlwaysValidValidator),
            prune_strategy: Arc::new(IdlePruneStrategy::default()),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the validation strategy.
    #[must_use]
    pub fn validator(mut self, validator: impl Validator<F::Handle> + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Set the pruning strategy.
    #[must_use]
    pub fn prune_strategy(mut self, strategy: impl PruneStrategy + 'static) -> Self {
        self.prune_strategy = Arc::new(strategy);
        self
    }

    /// Build the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] if the configuration is
    /// invalid.
    pub fn build(self) -> Result<BlockingConnectionPool<F>, PoolError> {
        self.config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(BlockingConnectionPool {
            inner: Arc::new(PoolInner {
                factory: self.factory,
                config: self.config,
                validator: self.validator,
                prune_strategy: self.prune_strategy,
                state: Mutex::new(PoolState::new()),
                metrics: PoolMetrics::default(),
                shutdown_tx,
                maintenance: Mutex::new(None),
            }),
        })
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle handles ready for checkout.
    pub available: u32,
    /// Number of handles currently lent out.
    pub active: u32,
    /// Total handles owned by the pool, including ones in transit.
    pub total: u32,
    /// Maximum allowed handles.
    pub max: u32,
}

impl PoolStatus {
    /// Active handles as a percentage of the maximum.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            f64::from(self.active) / f64::from(self.max) * 100.0
        }
    }
}

enum Phase {
    Created,
    Initializing,
    Ready,
    Closed,
}

struct Idle<H> {
    conn: H,
    meta: HandleMetadata,
}

enum Grant<H> {
    Handle(Idle<H>),
    CreatePermit,
}

struct Waiter<H> {
    id: u64,
    tx: oneshot::Sender<Grant<H>>,
}

struct PoolState<H> {
    phase: Phase,
    available: VecDeque<Idle<H>>,
    active: HashMap<u64, HandleMetadata>,
    waiters: VecDeque<Waiter<H>>,
    /// Handles (or reserved slots) owned by the pool but currently
    /// outside both collections: in-flight creates, returns under
    /// validation, idle handles being probed, and grants in transit.
    in_flight: u32,
    next_handle_id: u64,
    next_waiter_id: u64,
}

impl<H> PoolState<H> {
    fn new() -> Self {
        Self {
            phase: Phase::Created,
            available: VecDeque::new(),
            active: HashMap::new(),
            waiters: VecDeque::new(),
            in_flight: 0,
            next_handle_id: 1,
            next_waiter_id: 1,
        }
    }

    fn total(&self) -> u32 {
        self.available.len() as u32 + self.active.len() as u32 + self.in_flight
    }

    /// Hand the handle to the first live waiter, else park it at the
    /// tail of the idle queue.
    fn park_or_grant(&mut self, idle: Idle<H>) {
        let mut pending = idle;
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(Grant::Handle(pending)) {
                Ok(()) => {
                    // The grant is in transit until the waiter registers it.
                    self.in_flight += 1;
                    return;
                }
                Err(Grant::Handle(back)) => pending = back,
                // Unreachable: this function only sends Handle grants.
                Err(Grant::CreatePermit) => return,
            }
        }
        self.available.push_back(pending);
    }

    /// Grant create permits to waiters while capacity is free.
    fn release_capacity(&mut self, max_connections: u32) {
        while self.total() < max_connections {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.tx.send(Grant::CreatePermit).is_ok() {
                self.in_flight += 1;
            }
        }
    }

    fn remove_waiter(&mut self, id: u64) -> bool {
        if let Some(pos) = self.waiters.iter().position(|w| w.id == id) {
            self.waiters.remove(pos);
            true
        } else {
            false
        }
    }
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    validator: Arc<dyn Validator<F::Handle>>,
    prune_strategy: Arc<dyn PruneStrategy>,
    state: Mutex<PoolState<F::Handle>>,
    metrics: PoolMetrics,
    shutdown_tx: watch::Sender<bool>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

enum Step<F: ConnectionFactory> {
    Candidate(Idle<F::Handle>),
    Create,
    Wait(WaitTicket<F>),
}

/// A parked waiter's receiving end.
///
/// Dropping the ticket deregisters the waiter; a grant that raced the
/// drop is salvaged under the state lock and passed on, so no handle is
/// ever lost to a cancelled checkout.
struct WaitTicket<F: ConnectionFactory> {
    id: u64,
    rx: Option<oneshot::Receiver<Grant<F::Handle>>>,
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> WaitTicket<F> {
    async fn wait(mut self, remaining: Duration) -> Result<Grant<F::Handle>, PoolError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(PoolError::PoolClosed);
        };
        match tokio::time::timeout(remaining, rx).await {
            Ok(Ok(grant)) => {
                self.rx = None;
                Ok(grant)
            }
            Ok(Err(_)) => {
                self.rx = None;
                Err(PoolError::PoolClosed)
            }
            Err(_elapsed) => {
                // Resolve the timeout/grant race under the state lock:
                // either we deregister first, or a grant is already in
                // the channel and we consume it.
                let salvaged = {
                    let mut state = self.inner.state.lock();
                    if state.remove_waiter(self.id) {
                        None
                    } else {
                        self.rx.take().and_then(|mut rx| rx.try_recv().ok())
                    }
                };
                self.rx = None;
                match salvaged {
                    Some(grant) => Ok(grant),
                    None => Err(PoolError::Exhausted(self.inner.config.block_wait_time)),
                }
            }
        }
    }
}

impl<F: ConnectionFactory> Drop for WaitTicket<F> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        let mut state = self.inner.state.lock();
        if state.remove_waiter(self.id) {
            return;
        }
        if let Ok(grant) = rx.try_recv() {
            match grant {
                Grant::Handle(idle) => {
                    state.in_flight -= 1;
                    state.park_or_grant(idle);
                }
                Grant::CreatePermit => {
                    state.in_flight -= 1;
                    state.release_capacity(self.inner.config.max_connections);
                }
            }
        }
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn next_step(self: &Arc<Self>) -> Result<Step<F>, PoolError> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Created | Phase::Initializing => return Err(PoolError::NotInitialized),
            Phase::Closed => return Err(PoolError::PoolClosed),
            Phase::Ready => {}
        }
        if let Some(idle) = state.available.pop_front() {
            state.in_flight += 1;
            return Ok(Step::Candidate(idle));
        }
        if state.total() < self.config.max_connections {
            state.in_flight += 1;
            return Ok(Step::Create);
        }
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { id, tx });
        Ok(Step::Wait(WaitTicket {
            id,
            rx: Some(rx),
            inner: Arc::clone(self),
        }))
    }

    async fn create_open(&self) -> Result<F::Handle, ConnectionError> {
        let mut conn = self.factory.create().await?;
        if let Err(e) = conn.open().await {
            self.factory.destroy(conn).await;
            return Err(e);
        }
        self.metrics.record_created();
        Ok(conn)
    }

    /// Create and open a connection against a previously reserved slot.
    ///
    /// On success the reservation carries over to the returned candidate;
    /// on failure it is released and parked waiters may claim it.
    async fn grow(self: &Arc<Self>) -> Result<Idle<F::Handle>, ConnectionError> {
        match self.create_open().await {
            Ok(conn) => {
                let mut state = self.state.lock();
                let id = state.next_handle_id;
                state.next_handle_id += 1;
                tracing::debug!(id, "created pooled connection");
                Ok(Idle {
                    conn,
                    meta: HandleMetadata::new(id),
                })
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.in_flight -= 1;
                state.release_capacity(self.config.max_connections);
                Err(e)
            }
        }
    }

    /// Move a candidate into the active set and wrap it for the caller.
    ///
    /// Fails (returning the candidate) if the pool closed in the
    /// meantime.
    fn activate(self: &Arc<Self>, idle: Idle<F::Handle>) -> Result<PooledConnection<F>, Idle<F::Handle>> {
        let mut state = self.state.lock();
        if !matches!(state.phase, Phase::Ready) {
            return Err(idle);
        }
        let mut idle = idle;
        state.in_flight -= 1;
        idle.meta.mark_checkout();
        state.active.insert(idle.meta.id(), idle.meta.clone());
        drop(state);
        Ok(PooledConnection {
            conn: Some(idle.conn),
            meta: idle.meta,
            invalid: false,
            inner: Arc::clone(self),
        })
    }

    /// Destroy a candidate and release its slot.
    async fn discard(self: &Arc<Self>, idle: Idle<F::Handle>, reason: &str) {
        tracing::debug!(id = idle.meta.id(), reason, "destroying pooled connection");
        self.factory.destroy(idle.conn).await;
        self.metrics.record_destroyed();
        let mut state = self.state.lock();
        state.in_flight -= 1;
        state.release_capacity(self.config.max_connections);
    }

    /// Return a handle to the pool.
    async fn checkin(
        self: Arc<Self>,
        mut conn: F::Handle,
        mut meta: HandleMetadata,
        invalid: bool,
    ) -> Result<(), PoolError> {
        let closed = {
            let mut state = self.state.lock();
            if state.active.remove(&meta.id()).is_none() {
                return Err(PoolError::UnknownHandle { id: meta.id() });
            }
            state.in_flight += 1;
            matches!(state.phase, Phase::Closed)
        };
        if closed {
            self.factory.destroy(conn).await;
            self.metrics.record_destroyed();
            self.state.lock().in_flight -= 1;
            return Ok(());
        }

        let healthy = if invalid {
            false
        } else if self.config.validate_on_check_in {
            self.metrics.record_validation();
            let ok = self.validator.is_valid(&mut conn).await;
            if !ok {
                self.metrics.record_validation_failure();
            }
            ok
        } else {
            true
        };

        if healthy {
            let mut state = self.state.lock();
            state.in_flight -= 1;
            meta.mark_checkin();
            state.park_or_grant(Idle { conn, meta });
            return Ok(());
        }

        tracing::debug!(id = meta.id(), invalid, "destroying returned connection");
        self.factory.destroy(conn).await;
        self.metrics.record_destroyed();
        let replace = {
            let mut state = self.state.lock();
            state.in_flight -= 1;
            let below = matches!(state.phase, Phase::Ready)
                && state.total() < self.config.min_connections;
            if below {
                // Reservation for the replacement, taken under the same
                // lock as the decision.
                state.in_flight += 1;
            } else {
                state.release_capacity(self.config.max_connections);
            }
            below
        };
        if replace {
            Self::spawn_replacement(Arc::clone(&self));
        }
        Ok(())
    }

    /// Create a replacement connection in the background.
    ///
    /// The caller has already reserved the slot. Failures are logged;
    /// growth then falls back to the next demand-driven checkout.
    fn spawn_replacement(inner: Arc<Self>) {
        tokio::spawn(async move {
            match inner.create_open().await {
                Ok(conn) => {
                    let leftover = {
                        let mut state = inner.state.lock();
                        state.in_flight -= 1;
                        if matches!(state.phase, Phase::Closed) {
                            Some(conn)
                        } else {
                            let id = state.next_handle_id;
                            state.next_handle_id += 1;
                            tracing::debug!(id, "replaced destroyed connection");
                            state.park_or_grant(Idle {
                                conn,
                                meta: HandleMetadata::new(id),
                            });
                            None
                        }
                    };
                    if let Some(conn) = leftover {
                        inner.factory.destroy(conn).await;
                        inner.metrics.record_destroyed();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connection replacement failed");
                    let mut state = inner.state.lock();
                    state.in_flight -= 1;
                    state.release_capacity(inner.config.max_connections);
                }
            }
        });
    }

    /// One prune pass: destroy idle handles the strategy selects,
    /// never dropping the total below the configured minimum.
    async fn prune_idle(self: &Arc<Self>) {
        let victims: Vec<Idle<F::Handle>> = {
            let mut state = self.state.lock();
            if !matches!(state.phase, Phase::Ready) {
                return;
            }
            let now = Instant::now();
            let info: Vec<IdleHandleInfo> = state
                .available
                .iter()
                .map(|idle| IdleHandleInfo {
                    id: idle.meta.id(),
                    last_activity_at: idle.meta.last_activity_at(),
                })
                .collect();
            let mut ids = self.prune_strategy.select(&info, now);
            let removable = state.total().saturating_sub(self.config.min_connections) as usize;
            ids.truncate(removable);
            if ids.is_empty() {
                return;
            }
            let doomed: HashSet<u64> = ids.into_iter().collect();
            let parked = std::mem::take(&mut state.available);
            let mut victims = Vec::new();
            for idle in parked {
                if doomed.contains(&idle.meta.id()) {
                    victims.push(idle);
                } else {
                    state.available.push_back(idle);
                }
            }
            state.in_flight += victims.len() as u32;
            victims
        };
        tracing::debug!(count = victims.len(), "pruning idle connections");
        for idle in victims {
            let id = idle.meta.id();
            self.factory.destroy(idle.conn).await;
            self.metrics.record_destroyed();
            self.metrics.record_pruned();
            tracing::debug!(id, "pruned idle connection");
            let mut state = self.state.lock();
            state.in_flight -= 1;
            state.release_capacity(self.config.max_connections);
        }
    }

    /// One background validation pass over idle handles that are due.
    ///
    /// Handles leave the idle queue for the duration of their probe so a
    /// concurrent checkout can never receive a handle mid-probe. Faults
    /// are isolated per handle; one bad connection never stalls the rest.
    async fn validate_idle(self: &Arc<Self>) {
        let due: Vec<Idle<F::Handle>> = {
            let mut state = self.state.lock();
            if !matches!(state.phase, Phase::Ready) {
                return;
            }
            let now = Instant::now();
            let period = self.config.validate_period;
            let parked = std::mem::take(&mut state.available);
            let mut due = Vec::new();
            for idle in parked {
                if idle.meta.needs_validation(period, now) {
                    due.push(idle);
                } else {
                    state.available.push_back(idle);
                }
            }
            state.in_flight += due.len() as u32;
            due
        };
        for mut idle in due {
            self.metrics.record_validation();
            if self.validator.is_valid(&mut idle.conn).await {
                idle.meta.mark_validated();
                let leftover = {
                    let mut state = self.state.lock();
                    state.in_flight -= 1;
                    if matches!(state.phase, Phase::Closed) {
                        Some(idle.conn)
                    } else {
                        state.park_or_grant(idle);
                        None
                    }
                };
                if let Some(conn) = leftover {
                    self.factory.destroy(conn).await;
                    self.metrics.record_destroyed();
                }
            } else {
                self.metrics.record_validation_failure();
                tracing::warn!(
                    id = idle.meta.id(),
                    "idle connection failed validation; destroying"
                );
                self.factory.destroy(idle.conn).await;
                self.metrics.record_destroyed();
                let replace = {
                    let mut state = self.state.lock();
                    state.in_flight -= 1;
                    let below = matches!(state.phase, Phase::Ready)
                        && state.total() < self.config.min_connections;
                    if below {
                        state.in_flight += 1;
                    } else {
                        state.release_capacity(self.config.max_connections);
                    }
                    below
                };
                if replace {
                    Self::spawn_replacement(Arc::clone(self));
                }
            }
        }
    }
}

fn new_interval(period: Duration) -> tokio::time::Interval {
    let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    timer
}

async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl<F: ConnectionFactory> BlockingConnectionPool<F> {
    /// Create a builder for a pool over the given factory.
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder::new(factory)
    }

    /// Create a pool with the given configuration, an
    /// [`AlwaysValidValidator`] and an [`IdlePruneStrategy`].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] if the configuration is
    /// invalid.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        Self::builder(factory).config(config).build()
    }

    /// Initialize the pool, creating the minimum number of connections.
    ///
    /// With `fail_fast_initialize` enabled (the default), the first
    /// creation failure aborts initialization, destroys anything created
    /// so far and leaves the pool unusable. With it disabled, failed
    /// slots are skipped and the pool starts short of the minimum,
    /// growing back on demand.
    ///
    /// Calling again after a successful initialization is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InitializationFailed`] on a fail-fast abort
    /// and [`PoolError::PoolClosed`] after shutdown.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Ready => return Ok(()),
                Phase::Closed => return Err(PoolError::PoolClosed),
                Phase::Initializing => {
                    return Err(PoolError::Configuration(
                        "initialization already in progress".into(),
                    ));
                }
                Phase::Created => state.phase = Phase::Initializing,
            }
        }

        for slot in 0..self.inner.config.min_connections {
            {
                self.inner.state.lock().in_flight += 1;
            }
            match self.inner.grow().await {
                Ok(idle) => {
                    let mut state = self.inner.state.lock();
                    state.in_flight -= 1;
                    state.available.push_back(idle);
                }
                Err(e) => {
                    if self.inner.config.fail_fast_initialize {
                        let drained: Vec<Idle<F::Handle>> = {
                            let mut state = self.inner.state.lock();
                            state.phase = Phase::Closed;
                            state.available.drain(..).collect()
                        };
                        for idle in drained {
                            self.inner.factory.destroy(idle.conn).await;
                            self.inner.metrics.record_destroyed();
                        }
                        tracing::error!(error = %e, "pool initialization failed");
                        return Err(PoolError::InitializationFailed(e));
                    }
                    tracing::warn!(
                        slot,
                        error = %e,
                        "failed to create initial connection; pool starts short"
                    );
                }
            }
        }

        {
            let mut state = self.inner.state.lock();
            state.phase = Phase::Ready;
        }
        self.spawn_maintenance();
        let status = self.status();
        tracing::info!(
            available = status.available,
            min = self.inner.config.min_connections,
            max = self.inner.config.max_connections,
            "connection pool initialized"
        );
        Ok(())
    }

    /// Check out a connection, blocking up to the configured
    /// `block_wait_time` if the pool is exhausted.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Exhausted`] if no handle became available in time.
    /// - [`PoolError::ValidationFailed`] if checkout validation kept
    ///   failing across the retry budget.
    /// - [`PoolError::CreateFailed`] if lazy growth hit a factory error.
    /// - [`PoolError::PoolClosed`] / [`PoolError::NotInitialized`] for
    ///   lifecycle misuse.
    pub async fn checkout(&self) -> Result<PooledConnection<F>, PoolError> {
        let result = self.checkout_inner().await;
        match &result {
            Ok(_) => self.inner.metrics.record_checkout(),
            Err(_) => self.inner.metrics.record_checkout_failure(),
        }
        result
    }

    async fn checkout_inner(&self) -> Result<PooledConnection<F>, PoolError> {
        let deadline = Instant::now() + self.inner.config.block_wait_time;
        let mut attempts = 0u32;
        loop {
            let step = self.inner.next_step()?;
            let candidate = match step {
                Step::Candidate(idle) => idle,
                Step::Create => self.inner.grow().await.map_err(PoolError::CreateFailed)?,
                Step::Wait(ticket) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match ticket.wait(remaining).await? {
                        Grant::Handle(idle) => idle,
                        Grant::CreatePermit => {
                            self.inner.grow().await.map_err(PoolError::CreateFailed)?
                        }
                    }
                }
            };

            let candidate = if self.inner.config.validate_on_check_out {
                self.inner.metrics.record_validation();
                let mut candidate = candidate;
                if self.inner.validator.is_valid(&mut candidate.conn).await {
                    candidate
                } else {
                    self.inner.metrics.record_validation_failure();
                    self.inner
                        .discard(candidate, "failed checkout validation")
                        .await;
                    attempts += 1;
                    if attempts >= CHECKOUT_VALIDATION_ATTEMPTS {
                        return Err(PoolError::ValidationFailed { attempts });
                    }
                    continue;
                }
            } else {
                candidate
            };

            match self.inner.activate(candidate) {
                Ok(guard) => return Ok(guard),
                Err(idle) => {
                    self.inner.discard(idle, "pool closed during checkout").await;
                    return Err(PoolError::PoolClosed);
                }
            }
        }
    }

    /// Check out an idle connection without blocking or creating.
    ///
    /// Returns `Ok(None)` when no idle handle is available right now.
    ///
    /// # Errors
    ///
    /// Same as [`checkout`](Self::checkout), minus
    /// [`PoolError::Exhausted`].
    pub async fn try_checkout(&self) -> Result<Option<PooledConnection<F>>, PoolError> {
        let mut attempts = 0u32;
        loop {
            let candidate = {
                let mut state = self.inner.state.lock();
                match state.phase {
                    Phase::Created | Phase::Initializing => {
                        return Err(PoolError::NotInitialized);
                    }
                    Phase::Closed => return Err(PoolError::PoolClosed),
                    Phase::Ready => {}
                }
                match state.available.pop_front() {
                    Some(idle) => {
                        state.in_flight += 1;
                        idle
                    }
                    None => return Ok(None),
                }
            };

            let candidate = if self.inner.config.validate_on_check_out {
                self.inner.metrics.record_validation();
                let mut candidate = candidate;
                if self.inner.validator.is_valid(&mut candidate.conn).await {
                    candidate
                } else {
                    self.inner.metrics.record_validation_failure();
                    self.inner
                        .discard(candidate, "failed checkout validation")
                        .await;
                    attempts += 1;
                    if attempts >= CHECKOUT_VALIDATION_ATTEMPTS {
                        return Err(PoolError::ValidationFailed { attempts });
                    }
                    continue;
                }
            } else {
                candidate
            };

            match self.inner.activate(candidate) {
                Ok(guard) => {
                    self.inner.metrics.record_checkout();
                    return Ok(Some(guard));
                }
                Err(idle) => {
                    self.inner.discard(idle, "pool closed during checkout").await;
                    return Err(PoolError::PoolClosed);
                }
            }
        }
    }

    /// Shut the pool down.
    ///
    /// Destroys every idle handle, cancels all parked waiters with
    /// [`PoolError::PoolClosed`], and stops the maintenance task. Active
    /// handles are destroyed as they are returned.
    pub async fn shutdown(&self) {
        let (drained, waiters, task) = {
            let mut state = self.inner.state.lock();
            state.phase = Phase::Closed;
            let drained: Vec<Idle<F::Handle>> = state.available.drain(..).collect();
            let waiters: Vec<Waiter<F::Handle>> = state.waiters.drain(..).collect();
            (drained, waiters, self.inner.maintenance.lock().take())
        };
        drop(waiters);
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "maintenance task join failed");
            }
        }
        for idle in drained {
            self.inner.factory.destroy(idle.conn).await;
            self.inner.metrics.record_destroyed();
        }
        tracing::info!("connection pool shut down");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Closed)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.available.len() as u32,
            active: state.active.len() as u32,
            total: state.total(),
            max: self.inner.config.max_connections,
        }
    }

    /// Get a snapshot of the pool's metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn spawn_maintenance(&self) {
        let prune_period = self.inner.prune_strategy.period().filter(|p| !p.is_zero());
        let validate_period = self
            .inner
            .config
            .validate_periodically
            .then_some(self.inner.config.validate_period);
        if prune_period.is_none() && validate_period.is_none() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let mut prune_timer = prune_period.map(new_interval);
            let mut validate_timer = validate_period.map(new_interval);
            loop {
                tokio::select! {
                    () = tick(&mut prune_timer) => inner.prune_idle().await,
                    () = tick(&mut validate_timer) => inner.validate_idle().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!("pool maintenance task stopped");
        });
        *self.inner.maintenance.lock() = Some(task);
    }
}

/// A connection checked out from the pool.
///
/// Dereferences to the underlying handle. Returning it via
/// [`close`](Self::close) runs the full return protocol (on-checkin
/// validation, waiter hand-off); dropping the guard returns it on a
/// spawned task as a fallback.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Handle>,
    meta: HandleMetadata,
    invalid: bool,
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("meta", &self.meta)
            .field("invalid", &self.invalid)
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Metadata the pool tracks for this handle.
    #[must_use]
    pub fn metadata(&self) -> &HandleMetadata {
        &self.meta
    }

    /// Mark the handle invalid.
    ///
    /// Call this after observing a protocol error on the connection; the
    /// pool destroys the handle on return instead of recycling it.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    /// Return the connection to the pool.
    ///
    /// This does not close the transport; the pool recycles the handle
    /// or destroys it if it was invalidated or fails return validation.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownHandle`] if the pool does not track
    /// this handle.
    pub async fn close(mut self) -> Result<(), PoolError> {
        match self.conn.take() {
            Some(conn) => {
                let inner = Arc::clone(&self.inner);
                inner.checkin(conn, self.meta.clone(), self.invalid).await
            }
            None => Ok(()),
        }
    }

    /// Detach the connection from the pool.
    ///
    /// The handle leaves pool accounting entirely; the caller becomes
    /// responsible for closing it.
    #[must_use]
    pub fn detach(mut self) -> F::Handle {
        #[allow(clippy::expect_used)]
        let conn = self
            .conn
            .take()
            .expect("BUG: PooledConnection used after return to pool");
        let mut state = self.inner.state.lock();
        state.active.remove(&self.meta.id());
        state.release_capacity(self.inner.config.max_connections);
        drop(state);
        tracing::debug!(id = self.meta.id(), "detached connection from pool");
        conn
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Handle;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &F::Handle {
        self.conn
            .as_ref()
            .expect("BUG: PooledConnection used after return to pool")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut F::Handle {
        self.conn
            .as_mut()
            .expect("BUG: PooledConnection used after return to pool")
    }
}

#[async_trait::async_trait]
impl<F: ConnectionFactory> ConnectionHandle for PooledConnection<F> {
    async fn open(&mut self) -> Result<(), ConnectionError> {
        match self.conn.as_mut() {
            Some(conn) => conn.open().await,
            None => Err(ConnectionError::Closed),
        }
    }

    /// Returns the handle to the pool instead of closing the transport.
    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let inner = Arc::clone(&self.inner);
            if let Err(e) = inner.checkin(conn, self.meta.clone(), self.invalid).await {
                tracing::error!(error = %e, "connection return failed");
            }
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let meta = self.meta.clone();
        let invalid = self.invalid;
        // Returning requires async work (validation, destroy); fall back
        // to a spawned task. Outside a runtime the slot stays accounted
        // to a handle that no longer exists, which only happens during
        // process shutdown.
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = inner.checkin(conn, meta, invalid).await {
                        tracing::error!(error = %e, "connection return failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    id = meta.id(),
                    "runtime unavailable during drop; connection not returned to pool"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn idle(id: u64) -> Idle<()> {
        Idle {
            conn: (),
            meta: HandleMetadata::new(id),
        }
    }

    #[test]
    fn test_state_total_counts_all_slots() {
        let mut state: PoolState<()> = PoolState::new();
        state.available.push_back(idle(1));
        state.active.insert(2, HandleMetadata::new(2));
        state.in_flight = 3;
        assert_eq!(state.total(), 5);
    }

    #[test]
    fn test_park_without_waiters_appends_to_tail() {
        let mut state: PoolState<()> = PoolState::new();
        state.available.push_back(idle(1));
        state.park_or_grant(idle(2));
        let ids: Vec<u64> = state.available.iter().map(|i| i.meta.id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_grant_prefers_first_live_waiter() {
        let mut state: PoolState<()> = PoolState::new();

        let (dead_tx, dead_rx) = oneshot::channel();
        drop(dead_rx);
        state.waiters.push_back(Waiter { id: 1, tx: dead_tx });

        let (live_tx, mut live_rx) = oneshot::channel();
        state.waiters.push_back(Waiter { id: 2, tx: live_tx });

        state.park_or_grant(idle(7));
        assert!(state.available.is_empty());
        assert_eq!(state.in_flight, 1);
        assert!(matches!(live_rx.try_recv(), Ok(Grant::Handle(i)) if i.meta.id() == 7));
    }

    #[test]
    fn test_grant_parks_when_all_waiters_dead() {
        let mut state: PoolState<()> = PoolState::new();
        let (dead_tx, dead_rx) = oneshot::channel::<Grant<()>>();
        drop(dead_rx);
        state.waiters.push_back(Waiter { id: 1, tx: dead_tx });

        state.park_or_grant(idle(7));
        assert_eq!(state.available.len(), 1);
        assert_eq!(state.in_flight, 0);
        assert!(state.waiters.is_empty());
    }

    #[test]
    fn test_release_capacity_grants_one_permit_per_free_slot() {
        let mut state: PoolState<()> = PoolState::new();
        state.in_flight = 3;

        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        state.waiters.push_back(Waiter { id: 1, tx: tx1 });
        state.waiters.push_back(Waiter { id: 2, tx: tx2 });

        state.release_capacity(4);
        assert_eq!(state.in_flight, 4);
        assert!(matches!(rx1.try_recv(), Ok(Grant::CreatePermit)));
        assert!(rx2.try_recv().is_err());
        assert_eq!(state.waiters.len(), 1);
    }

    #[test]
    fn test_remove_waiter() {
        let mut state: PoolState<()> = PoolState::new();
        let (tx, _rx) = oneshot::channel();
        state.waiters.push_back(Waiter { id: 5, tx });

        assert!(state.remove_waiter(5));
        assert!(!state.remove_waiter(5));
    }

    mod stub {
        use super::super::*;

        pub struct StubConn;

        #[async_trait::async_trait]
        impl ConnectionHandle for StubConn {
            async fn open(&mut self) -> Result<(), ConnectionError> {
                Ok(())
            }

            async fn close(&mut self) {}
        }

        pub struct StubFactory;

        #[async_trait::async_trait]
        impl ConnectionFactory for StubFactory {
            type Handle = StubConn;

            async fn create(&self) -> Result<StubConn, ConnectionError> {
                Ok(StubConn)
            }
        }
    }

    #[tokio::test]
    async fn test_checkin_rejects_unknown_handle() {
        let pool = BlockingConnectionPool::new(
            stub::StubFactory,
            PoolConfig::new().min_connections(0).max_connections(2),
        )
        .unwrap();
        pool.initialize().await.unwrap();

        let inner = Arc::clone(&pool.inner);
        let err = inner
            .checkin(stub::StubConn, HandleMetadata::new(99), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::UnknownHandle { id: 99 }));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_checkout_before_initialize_fails() {
        let pool = BlockingConnectionPool::new(stub::StubFactory, PoolConfig::default()).unwrap();
        let err = pool.checkout().await.unwrap_err();
        assert!(matches!(err, PoolError::NotInitialized));
    }
}

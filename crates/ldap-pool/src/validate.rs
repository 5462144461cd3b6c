//! Connection validation strategies.
//!
//! A [`Validator`] answers "is this handle still usable?". The pool runs
//! validators on checkout, on return, and periodically over idle handles,
//! depending on configuration. Validators must be read-only against
//! directory state and cheap; the pool treats any probe error as invalid
//! (fail closed), so a flaky network never hands a caller a dead
//! connection.

use async_trait::async_trait;

use crate::error::ConnectionError;

/// Default search probe filter.
pub const DEFAULT_PROBE_FILTER: &str = "(objectClass=*)";

/// Attribute selector requesting no attributes (RFC 4511 `1.1`).
pub const NO_ATTRIBUTES: &str = "1.1";

/// Outcome of a liveness probe at the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The directory answered the probe; an empty result still counts.
    Success,
    /// The directory answered with a failure result code.
    Failure(u32),
}

impl ProbeStatus {
    /// Check if the probe succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Object-scope search request used by [`SearchValidator`].
///
/// The default probes the root DSE with `(objectClass=*)` and requests
/// no attributes, which every directory server answers without touching
/// entry data.
#[derive(Debug, Clone)]
pub struct SearchProbe {
    /// Base DN to search from.
    pub base_dn: String,
    /// Search filter.
    pub filter: String,
    /// Attributes to return.
    pub attributes: Vec<String>,
}

impl Default for SearchProbe {
    fn default() -> Self {
        Self {
            base_dn: String::new(),
            filter: DEFAULT_PROBE_FILTER.into(),
            attributes: vec![NO_ATTRIBUTES.into()],
        }
    }
}

/// Attribute assertion used by [`CompareValidator`].
///
/// The default asserts `objectClass: top` at the root DSE.
#[derive(Debug, Clone)]
pub struct CompareProbe {
    /// Entry DN to compare against.
    pub dn: String,
    /// Attribute name.
    pub attribute: String,
    /// Assertion value.
    pub value: String,
}

impl Default for CompareProbe {
    fn default() -> Self {
        Self {
            dn: String::new(),
            attribute: "objectClass".into(),
            value: "top".into(),
        }
    }
}

/// Minimal protocol surface a handle must expose for liveness probing.
///
/// Backends implement this alongside
/// [`ConnectionHandle`](crate::factory::ConnectionHandle); the rest of the
/// wire protocol stays opaque to the pool.
#[async_trait]
pub trait ProbeSupport: Send {
    /// Execute an object-scope search probe.
    async fn search(&mut self, probe: &SearchProbe) -> Result<ProbeStatus, ConnectionError>;

    /// Execute an attribute compare probe.
    ///
    /// Both compare-true and compare-false map to
    /// [`ProbeStatus::Success`]; either proves the server is answering.
    async fn compare(&mut self, probe: &CompareProbe) -> Result<ProbeStatus, ConnectionError>;
}

/// Strategy deciding whether a pooled handle is still usable.
#[async_trait]
pub trait Validator<H>: Send + Sync {
    /// Check whether the handle is still usable.
    async fn is_valid(&self, handle: &mut H) -> bool;
}

/// Validator that issues a minimal object-scope search.
#[derive(Debug, Clone, Default)]
pub struct SearchValidator {
    probe: SearchProbe,
}

impl SearchValidator {
    /// Create a validator probing the root DSE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with a custom search probe.
    #[must_use]
    pub fn with_probe(probe: SearchProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl<H: ProbeSupport> Validator<H> for SearchValidator {
    async fn is_valid(&self, handle: &mut H) -> bool {
        match handle.search(&self.probe).await {
            Ok(status) => status.is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "search probe failed");
                false
            }
        }
    }
}

/// Validator that issues an attribute compare.
#[derive(Debug, Clone, Default)]
pub struct CompareValidator {
    probe: CompareProbe,
}

impl CompareValidator {
    /// Create a validator asserting `objectClass: top` at the root DSE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with a custom compare probe.
    #[must_use]
    pub fn with_probe(probe: CompareProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl<H: ProbeSupport> Validator<H> for CompareValidator {
    async fn is_valid(&self, handle: &mut H) -> bool {
        match handle.compare(&self.probe).await {
            Ok(status) => status.is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "compare probe failed");
                false
            }
        }
    }
}

/// Validator that accepts every handle.
///
/// Used in trusted, low-churn environments to avoid extra round trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValidValidator;

#[async_trait]
impl<H: Send> Validator<H> for AlwaysValidValidator {
    async fn is_valid(&self, _handle: &mut H) -> bool {
        true
    }
}

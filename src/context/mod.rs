//! The per-test execution context.
//!
//! A [`StepContext`] owns one chain slot, one watchdog, and the in-body
//! flag that scopes where scheduling is legal. The scheduling primitives
//! themselves live in a sibling file; this module is the state and its
//! lifecycle.

mod primitives;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{ChainId, ChainStore};
use crate::error::{Result, StepError};
use crate::poll::DEFAULT_POLL_INTERVAL;
use crate::timer::{Timer, TokioTimer};
use crate::value::StepFuture;
use crate::watchdog::{FailureSink, RecordingSink, Watchdog};

/// The deadline armed for every test unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for a [`StepContext`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use stepchain::ContextConfig;
///
/// let config = ContextConfig::new()
///     .timeout(Duration::from_secs(10))
///     .poll_interval(Duration::from_millis(25));
/// ```
#[derive(Clone)]
pub struct ContextConfig {
    pub(crate) timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) sink: Arc<dyn FailureSink>,
}

impl ContextConfig {
    /// Creates the default configuration: a two second timeout, a 100 ms
    /// poll interval, the tokio timer, and a fresh [`RecordingSink`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timer: Arc::new(TokioTimer::new()),
            sink: Arc::new(RecordingSink::new()),
        }
    }

    /// Sets the watchdog deadline armed for each test. Zero disables the
    /// watchdog.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how often waiting predicates are re-evaluated.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replaces the timer backing sleeps and deadlines.
    #[must_use]
    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Replaces the sink watchdog failures are reported to.
    #[must_use]
    pub fn failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextConfig")
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// The explicit execution context step-aware tests schedule through.
///
/// Cloning is cheap and shares state, so step callbacks can capture a
/// context clone; scheduling through a clone still fails outside the
/// synchronous extent of the test body.
#[derive(Clone)]
pub struct StepContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    chain: ChainStore,
    in_body: AtomicBool,
    watchdog: Watchdog,
    timer: Arc<dyn Timer>,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl StepContext {
    /// Creates a context with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Creates a context from `config`.
    #[must_use]
    pub fn with_config(config: ContextConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                chain: ChainStore::new(),
                in_body: AtomicBool::new(false),
                watchdog: Watchdog::new(config.sink, Arc::clone(&config.timer)),
                timer: config.timer,
                poll_interval: config.poll_interval,
                default_timeout: config.timeout,
            }),
        }
    }

    /// Returns `true` while a chain is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.chain.is_live()
    }

    /// Returns `true` during the synchronous extent of the test body.
    #[must_use]
    pub fn in_body(&self) -> bool {
        self.inner.in_body.load(Ordering::SeqCst)
    }

    /// How often waiting predicates are re-evaluated.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// The deadline armed for each test unless overridden.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Re-arms the watchdog with a new deadline for the current test,
    /// cancelling the previously armed one. A zero timeout is a no-op that
    /// leaves the armed deadline running.
    ///
    /// # Errors
    ///
    /// Fails like the scheduling primitives when no chain is live or when
    /// called outside the test body.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.check_scheduling()?;
        self.arm_watchdog(timeout);
        Ok(())
    }

    // Lifecycle, driven by the harness.

    pub(crate) fn begin(&self) -> ChainId {
        self.inner.chain.begin()
    }

    pub(crate) fn end(&self) {
        self.inner.chain.end();
        self.inner.watchdog.disarm();
    }

    pub(crate) fn arm_watchdog(&self, deadline: Duration) {
        if let Some(binding) = self.inner.chain.binding() {
            self.inner.watchdog.arm(deadline, binding);
        }
    }

    pub(crate) fn enter_body(&self) -> BodyScope<'_> {
        self.inner.in_body.store(true, Ordering::SeqCst);
        BodyScope {
            flag: &self.inner.in_body,
        }
    }

    pub(crate) fn take_tail(&self) -> Option<StepFuture> {
        self.inner.chain.take_tail()
    }

    #[cfg(test)]
    pub(crate) fn armed_deadline(&self) -> Option<Duration> {
        self.inner.watchdog.armed_deadline()
    }

    /// Liveness is checked before the in-body flag, so the two misuses
    /// report distinct errors.
    pub(crate) fn check_scheduling(&self) -> Result<()> {
        if !self.inner.chain.is_live() {
            return Err(StepError::NoActiveChain);
        }
        if !self.in_body() {
            return Err(StepError::NotInStepContext);
        }
        Ok(())
    }
}

impl Default for StepContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("live", &self.is_live())
            .field("in_body", &self.in_body())
            .finish_non_exhaustive()
    }
}

/// Keeps the in-body flag raised while it lives. Dropping lowers the flag,
/// so a panicking body cannot leave it set.
pub(crate) struct BodyScope<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BodyScope<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

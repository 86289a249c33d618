//! The built-in host adapter.
//!
//! A [`StepHarness`] wires chain lifecycle, the synchronous test body, and
//! the watchdog into one awaitable run: create the chain and arm the
//! deadline before the body, run the body with the in-body flag raised,
//! spawn the composed tail, then race the completion signal against the
//! watchdog and tear everything down unconditionally.

mod completion;
mod signal;

pub use completion::Completion;
pub use signal::CompletionSignal;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::context::{ContextConfig, StepContext};
use crate::error::{self, Result, StepError, StepFailure, TimeoutError};
use crate::value::StepValue;
use crate::watchdog::{FailureSink, RecordingSink};

use signal::BodySignal;

/// How a test body takes control of its completion.
pub enum TestBody {
    /// The body schedules steps; the chain's settlement completes the test.
    Simple(Box<dyn FnOnce(&StepContext) -> Result<()> + Send>),
    /// The body receives a [`Completion`] handle that overrides the chain
    /// as the completion signal. The chain still executes; its settlement
    /// just no longer ends the test.
    WithCompletion(Box<dyn FnOnce(&StepContext, Completion) -> Result<()> + Send>),
}

impl TestBody {
    /// Wraps a plain body.
    pub fn simple<F>(body: F) -> Self
    where
        F: FnOnce(&StepContext) -> Result<()> + Send + 'static,
    {
        Self::Simple(Box::new(body))
    }

    /// Wraps a body that settles the test through a [`Completion`] handle.
    pub fn with_completion<F>(body: F) -> Self
    where
        F: FnOnce(&StepContext, Completion) -> Result<()> + Send + 'static,
    {
        Self::WithCompletion(Box::new(body))
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(_) => f.write_str("TestBody::Simple"),
            Self::WithCompletion(_) => f.write_str("TestBody::WithCompletion"),
        }
    }
}

/// How a test execution ended.
#[derive(Debug)]
pub enum TestOutcome {
    /// The completion signal settled successfully. Carries the chain's
    /// final value (empty for callback-style tests).
    Passed(StepValue),
    /// A step failed, a step panicked, or the completion handle reported a
    /// failure.
    Failed(StepFailure),
    /// The watchdog fired before the completion signal settled.
    TimedOut(TimeoutError),
    /// The body misused the scheduling API.
    Misuse(StepError),
}

impl TestOutcome {
    /// Returns `true` if the test passed.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed(_))
    }

    /// Unwraps the passing value.
    ///
    /// # Panics
    ///
    /// Panics with the resolved diagnostic if the test did not pass.
    pub fn assert_passed(self) -> StepValue {
        match self {
            Self::Passed(value) => value,
            Self::Failed(failure) => panic!("{failure}"),
            Self::TimedOut(timeout) => panic!("{timeout}"),
            Self::Misuse(misuse) => panic!("{misuse}"),
        }
    }
}

/// Drives step-aware tests against one [`StepContext`].
///
/// # Example
///
/// ```rust,ignore
/// let harness = StepHarness::new();
/// let outcome = harness
///     .run_test(TestBody::simple(|cx| {
///         cx.wait_until(|_| server.ready())?;
///         cx.and_then(|_| assert_eq!(server.connections(), 1))?;
///         Ok(())
///     }))
///     .await;
/// assert!(outcome.is_passed());
/// ```
pub struct StepHarness {
    context: StepContext,
    sink: Arc<RecordingSink>,
    timeout: Duration,
}

impl StepHarness {
    /// Creates a harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Creates a harness from `config`. The configured failure sink is
    /// replaced with the harness's own recording sink, which is where the
    /// timed-out outcome is read from.
    #[must_use]
    pub fn with_config(config: ContextConfig) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let timeout = config.timeout;
        let wired = config.failure_sink(Arc::clone(&sink) as Arc<dyn FailureSink>);
        Self {
            context: StepContext::with_config(wired),
            sink,
            timeout,
        }
    }

    /// The context tests schedule steps through.
    #[must_use]
    pub fn context(&self) -> &StepContext {
        &self.context
    }

    /// Starts a test execution: creates the chain and arms the watchdog
    /// with the configured deadline. A no-op while a chain is already
    /// live, leaving the armed deadline untouched.
    pub fn before_test(&self) {
        self.before_test_with_timeout(self.timeout);
    }

    /// Starts a test execution with an explicit watchdog deadline. A zero
    /// deadline arms nothing, so the test can only end through its
    /// completion signal.
    pub fn before_test_with_timeout(&self, timeout: Duration) {
        if self.context.is_live() {
            return;
        }
        // A timeout recorded by a previous run must not settle this one.
        self.sink.reset();
        self.context.begin();
        self.context.arm_watchdog(timeout);
    }

    /// Tears the execution down: discards the chain and disarms the
    /// watchdog. Runs unconditionally after every test; idempotent.
    pub fn after_test(&self) {
        self.context.end();
    }

    /// Runs `body` synchronously and returns the signal that decides the
    /// test's outcome.
    ///
    /// The in-body flag is raised only for the synchronous extent of the
    /// body; a panicking body cannot leave it raised. The composed tail is
    /// spawned onto the runtime. For callback bodies the tail runs
    /// detached and the [`Completion`] handle alone settles the test.
    pub fn run_body(&self, body: TestBody) -> CompletionSignal {
        let watchdog = self.watchdog_future();

        let body_signal = match body {
            TestBody::Simple(run) => match self.invoke(|| run(&self.context)) {
                Invoked::Completed => match self.context.take_tail() {
                    Some(tail) => BodySignal::Chain(tokio::spawn(tail)),
                    None => BodySignal::Immediate(Some(TestOutcome::Passed(StepValue::none()))),
                },
                Invoked::Decided(outcome) => BodySignal::Immediate(Some(outcome)),
            },
            TestBody::WithCompletion(run) => {
                let (handle, receiver) = Completion::channel();
                match self.invoke(|| run(&self.context, handle)) {
                    Invoked::Completed => {
                        if let Some(tail) = self.context.take_tail() {
                            // The chain still runs; only the handle (or the
                            // watchdog) settles the test.
                            drop(tokio::spawn(async move {
                                let _ = tail.await;
                            }));
                        }
                        BodySignal::Callback(Some(receiver))
                    }
                    Invoked::Decided(outcome) => BodySignal::Immediate(Some(outcome)),
                }
            }
        };

        CompletionSignal::new(watchdog, body_signal)
    }

    /// Runs a complete test: setup, body, completion race, teardown.
    pub async fn run_test(&self, body: TestBody) -> TestOutcome {
        self.before_test();
        let signal = self.run_body(body);
        let outcome = signal.await;
        self.after_test();
        outcome
    }

    fn invoke<F>(&self, run: F) -> Invoked
    where
        F: FnOnce() -> Result<()>,
    {
        let scope = self.context.enter_body();
        let invoked = panic::catch_unwind(AssertUnwindSafe(run));
        drop(scope);

        match invoked {
            Ok(Ok(())) => Invoked::Completed,
            Ok(Err(misuse)) => Invoked::Decided(TestOutcome::Misuse(misuse)),
            Err(payload) => Invoked::Decided(TestOutcome::Failed(StepFailure::Panicked(
                error::panic_message(payload.as_ref()),
            ))),
        }
    }

    fn watchdog_future(&self) -> BoxFuture<'static, TimeoutError> {
        let sink = Arc::clone(&self.sink);
        Box::pin(async move { sink.wait_fired().await })
    }
}

enum Invoked {
    /// The body returned `Ok(())`; the completion signal takes over.
    Completed,
    /// The body itself decided the outcome (misuse or panic).
    Decided(TestOutcome),
}

impl Default for StepHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StepHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepHarness")
            .field("timeout", &self.timeout)
            .field("live", &self.context.is_live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_before_test_is_idempotent_while_live() {
        let harness = StepHarness::new();
        harness.before_test_with_timeout(Duration::from_secs(30));
        // A second setup call must not replace the chain or the deadline.
        harness.before_test();
        assert_eq!(
            harness.context.armed_deadline(),
            Some(Duration::from_secs(30))
        );
        harness.after_test();
    }

    #[tokio::test]
    async fn test_after_test_tears_everything_down() {
        let harness = StepHarness::new();
        harness.before_test();
        assert!(harness.context.is_live());

        harness.after_test();
        assert!(!harness.context.is_live());
        assert_eq!(harness.context.armed_deadline(), None);
    }

    #[tokio::test]
    async fn test_a_misuse_error_from_the_body_decides_the_outcome() {
        let harness = StepHarness::new();
        let outcome = harness
            .run_test(TestBody::simple(|_cx| Err(StepError::NotInStepContext)))
            .await;
        assert!(matches!(
            outcome,
            TestOutcome::Misuse(StepError::NotInStepContext)
        ));
    }

    #[tokio::test]
    async fn test_a_panicking_body_fails_and_lowers_the_flag() {
        let harness = StepHarness::new();
        let outcome = harness
            .run_test(TestBody::simple(|_cx| panic!("body exploded")))
            .await;

        match outcome {
            TestOutcome::Failed(StepFailure::Panicked(text)) => {
                assert_eq!(text, "body exploded");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!harness.context.in_body());
        assert!(!harness.context.is_live());
    }

    #[tokio::test]
    async fn test_an_empty_body_passes_with_the_empty_value() {
        let harness = StepHarness::new();
        let outcome = harness.run_test(TestBody::simple(|_cx| Ok(()))).await;
        match outcome {
            TestOutcome::Passed(value) => assert!(value.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}

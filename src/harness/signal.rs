//! The future that decides a test's outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{self, StepFailure, TimeoutError};
use crate::harness::completion::Verdict;
use crate::harness::TestOutcome;
use crate::value::StepValue;

/// Future returned by
/// [`run_body`](crate::harness::StepHarness::run_body); resolves with the
/// test's outcome.
///
/// The watchdog branch is polled first on every wakeup, so a deadline that
/// fires in the same scheduling turn the chain settles in still wins: the
/// deadline passing means the test took too long, however close the finish
/// was.
pub struct CompletionSignal {
    watchdog: BoxFuture<'static, TimeoutError>,
    body: BodySignal,
}

pub(crate) enum BodySignal {
    /// The outcome was decided synchronously by the body itself.
    Immediate(Option<TestOutcome>),
    /// The spawned tail's settlement is the completion signal.
    Chain(JoinHandle<std::result::Result<StepValue, StepFailure>>),
    /// An explicit completion handle; `None` once every handle was dropped
    /// uninvoked, which leaves the watchdog as the only way to settle.
    Callback(Option<oneshot::Receiver<Verdict>>),
}

impl CompletionSignal {
    pub(crate) fn new(watchdog: BoxFuture<'static, TimeoutError>, body: BodySignal) -> Self {
        Self { watchdog, body }
    }
}

impl Future for CompletionSignal {
    type Output = TestOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(timeout) = this.watchdog.as_mut().poll(cx) {
            return Poll::Ready(TestOutcome::TimedOut(timeout));
        }

        match &mut this.body {
            BodySignal::Immediate(outcome) => match outcome.take() {
                Some(decided) => Poll::Ready(decided),
                None => Poll::Pending,
            },
            BodySignal::Chain(handle) => match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(Ok(value))) => Poll::Ready(TestOutcome::Passed(value)),
                Poll::Ready(Ok(Err(failure))) => Poll::Ready(TestOutcome::Failed(failure)),
                Poll::Ready(Err(join_error)) => {
                    let failure = if join_error.is_panic() {
                        StepFailure::Panicked(error::panic_message(
                            join_error.into_panic().as_ref(),
                        ))
                    } else {
                        StepFailure::Superseded
                    };
                    Poll::Ready(TestOutcome::Failed(failure))
                }
                Poll::Pending => Poll::Pending,
            },
            BodySignal::Callback(receiver) => {
                let Some(active) = receiver else {
                    return Poll::Pending;
                };
                match Pin::new(active).poll(cx) {
                    Poll::Ready(Ok(Ok(()))) => {
                        Poll::Ready(TestOutcome::Passed(StepValue::none()))
                    }
                    Poll::Ready(Ok(Err(message))) => {
                        Poll::Ready(TestOutcome::Failed(StepFailure::Message(message)))
                    }
                    Poll::Ready(Err(_dropped)) => {
                        *receiver = None;
                        Poll::Pending
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

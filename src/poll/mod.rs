//! Polling until a predicate produces a value.
//!
//! The loop re-presents the chained value to the predicate on every
//! attempt, treats a panicking attempt as "no value yet", and checks chain
//! identity after every sleep so a wait scheduled by a finished test stops
//! silently instead of leaking into the next one.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::ChainBinding;
use crate::error::{self, EvalError};
use crate::message::Message;
use crate::timer::Timer;
use crate::value::StepValue;

/// How often waiting predicates are re-evaluated unless configured
/// otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What one predicate attempt produced.
///
/// Implemented for `bool`, where `true` ends the wait and resolves the
/// chain with `true`, and for `Option<T>`, where a `Some` ends the wait and
/// resolves the chain with its value.
pub trait IntoPollResult {
    /// The value a successful attempt resolves the chain with.
    type Value;

    /// Converts the attempt into `Some(value)` when the wait is over.
    fn into_poll_result(self) -> Option<Self::Value>;
}

impl IntoPollResult for bool {
    type Value = bool;

    fn into_poll_result(self) -> Option<bool> {
        self.then_some(true)
    }
}

impl<T> IntoPollResult for Option<T> {
    type Value = T;

    fn into_poll_result(self) -> Option<T> {
        self
    }
}

/// How a polling wait ended.
pub(crate) enum PollOutcome<T> {
    /// The predicate produced a value.
    Resolved(T),
    /// The bound chain stopped being the live one.
    Superseded,
}

/// Runs one predicate attempt, converting a panic into [`EvalError`].
pub(crate) fn evaluate<T>(attempt: impl FnOnce() -> Option<T>) -> Result<Option<T>, EvalError> {
    panic::catch_unwind(AssertUnwindSafe(attempt))
        .map_err(|payload| EvalError::new(error::panic_message(payload.as_ref())))
}

/// Polls `predicate` against `value` until it produces a result.
///
/// A panicking attempt replaces the bound chain's pending diagnostic with
/// the panic text and counts as "not yet", so `assert!` failures inside a
/// predicate read as "condition not met yet" rather than aborting the wait.
/// The loop ends silently once `binding` no longer refers to the live
/// chain.
pub(crate) async fn poll_until<F, R>(
    binding: ChainBinding,
    value: StepValue,
    mut predicate: F,
    interval: Duration,
    timer: Arc<dyn Timer>,
) -> PollOutcome<R::Value>
where
    F: FnMut(&StepValue) -> R + Send,
    R: IntoPollResult,
{
    loop {
        match evaluate(|| predicate(&value).into_poll_result()) {
            Ok(Some(produced)) => return PollOutcome::Resolved(produced),
            Ok(None) => {}
            Err(caught) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    chain = binding.owner().as_u64(),
                    reason = caught.reason(),
                    "poll.predicate_panicked"
                );

                binding.set_pending(Message::from(format!(
                    "stepchain#wait_until() timed out. This is the last panic that was caught: {}",
                    caught.reason()
                )));
            }
        }

        timer.sleep(interval).await;

        if !binding.is_current() {
            #[cfg(feature = "tracing")]
            tracing::debug!(chain = binding.owner().as_u64(), "poll.superseded");

            return PollOutcome::Superseded;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::chain::ChainStore;
    use crate::timer::TokioTimer;

    #[test]
    fn test_evaluate_passes_values_through() {
        assert_eq!(evaluate(|| Some(3_u32)).unwrap(), Some(3));
        assert_eq!(evaluate(|| None::<u32>).unwrap(), None);
    }

    #[test]
    fn test_evaluate_captures_str_panics() {
        let caught = evaluate(|| -> Option<u32> { panic!("socket not open") }).unwrap_err();
        assert_eq!(caught.reason(), "socket not open");
    }

    #[test]
    fn test_evaluate_captures_formatted_panics() {
        let port = 4242;
        let caught =
            evaluate(|| -> Option<u32> { panic!("port {port} still closed") }).unwrap_err();
        assert_eq!(caught.reason(), "port 4242 still closed");
    }

    #[test]
    fn test_bool_attempts_resolve_with_true() {
        assert_eq!(false.into_poll_result(), None);
        assert_eq!(true.into_poll_result(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_the_predicate_produces() {
        let store = ChainStore::new();
        store.begin();
        let binding = store.binding().unwrap();
        let start = tokio::time::Instant::now();

        let attempts = AtomicU32::new(0);
        let outcome = poll_until(
            binding,
            StepValue::none(),
            |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                (n == 3).then_some(n)
            },
            DEFAULT_POLL_INTERVAL,
            Arc::new(TokioTimer::new()),
        )
        .await;

        match outcome {
            PollOutcome::Resolved(n) => assert_eq!(n, 3),
            PollOutcome::Superseded => panic!("wait was not superseded"),
        }
        // Two failed attempts cost one interval each; success returns
        // without sleeping.
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_attempts_count_as_not_yet() {
        let store = ChainStore::new();
        store.begin();
        let binding = store.binding().unwrap();
        let probe = store.binding().unwrap();

        let attempts = AtomicU32::new(0);
        let outcome = poll_until(
            binding,
            StepValue::none(),
            |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                assert!(n >= 3, "still warming up");
                true
            },
            DEFAULT_POLL_INTERVAL,
            Arc::new(TokioTimer::new()),
        )
        .await;

        assert!(matches!(outcome, PollOutcome::Resolved(true)));
        // The panic text from the last failed attempt became the pending
        // diagnostic.
        let pending = probe.take_pending_if_current().unwrap().unwrap();
        assert!(pending.resolve().contains("still warming up"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_the_wait_ends_silently_once_superseded() {
        let store = ChainStore::new();
        store.begin();
        let binding = store.binding().unwrap();

        let task = tokio::spawn(poll_until(
            binding,
            StepValue::none(),
            |_| false,
            DEFAULT_POLL_INTERVAL,
            Arc::new(TokioTimer::new()) as Arc<dyn Timer>,
        ));

        // Let the first attempt run, then replace the chain.
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.end();
        store.begin();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, PollOutcome::Superseded));
    }
}

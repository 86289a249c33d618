//! Deadline failure independent of the step chain.
//!
//! The watchdog owns one cancellable scheduled task per armed deadline. On
//! expiry it resolves the bound chain's pending diagnostic and reports a
//! [`TimeoutError`] straight to the [`FailureSink`]; the chain's tail never
//! observes it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::chain::ChainBinding;
use crate::error::TimeoutError;
use crate::timer::{ScheduledTask, Timer};

/// The diagnostic used when no step installed one before the deadline.
pub(crate) const DEFAULT_TIMEOUT_MESSAGE: &str =
    "stepchain#run_test(): timed out - the `Completion` handle was never invoked.";

/// Where watchdog failures are delivered.
///
/// Firing bypasses the chain entirely: a test that stalls forever still
/// fails, and a chain that settles late cannot un-fail it.
pub trait FailureSink: Send + Sync {
    /// Reports that the monitored execution exceeded its deadline.
    fn report_timeout(&self, error: TimeoutError);
}

/// Sink that records the first reported timeout and wakes a waiter.
///
/// This is the sink a harness reads its timed-out outcome from. It serves
/// one logical waiter; reports after the first are dropped.
#[derive(Default)]
pub struct RecordingSink {
    fired: Mutex<Option<TimeoutError>>,
    notify: Notify,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fired: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// The recorded timeout, if one has been reported.
    #[must_use]
    pub fn fired(&self) -> Option<TimeoutError> {
        self.fired.lock().clone()
    }

    /// Waits until a timeout has been reported.
    pub async fn wait_fired(&self) -> TimeoutError {
        loop {
            if let Some(error) = self.fired() {
                return error;
            }
            self.notify.notified().await;
        }
    }

    /// Clears a recorded timeout so the sink can serve a later run.
    pub fn reset(&self) {
        *self.fired.lock() = None;
    }
}

impl FailureSink for RecordingSink {
    fn report_timeout(&self, error: TimeoutError) {
        let mut fired = self.fired.lock();
        if fired.is_none() {
            *fired = Some(error);
            // notify_one leaves a permit behind, so a waiter that checks
            // just before this report still wakes up.
            self.notify.notify_one();
        }
    }
}

/// The deadline watchdog for one context.
pub(crate) struct Watchdog {
    armed: Mutex<Option<(Duration, ScheduledTask)>>,
    sink: Arc<dyn FailureSink>,
    timer: Arc<dyn Timer>,
}

impl Watchdog {
    pub fn new(sink: Arc<dyn FailureSink>, timer: Arc<dyn Timer>) -> Self {
        Self {
            armed: Mutex::new(None),
            sink,
            timer,
        }
    }

    /// Arms (or re-arms) the deadline for the chain behind `binding`.
    ///
    /// A zero deadline is a no-op that leaves any armed deadline running.
    /// Re-arming cancels the previously armed deadline.
    pub fn arm(&self, deadline: Duration, binding: ChainBinding) {
        if deadline.is_zero() {
            return;
        }

        let sink = Arc::clone(&self.sink);
        let sleep = self.timer.sleep(deadline);
        let task = ScheduledTask::spawn(async move {
            sleep.await;
            // Stale binding: the chain this deadline was armed for is gone.
            let Some(pending) = binding.take_pending_if_current() else {
                return;
            };
            let resolved = pending.map(|message| message.resolve());
            let text = match resolved {
                Some(text) if !text.is_empty() => text,
                _ => DEFAULT_TIMEOUT_MESSAGE.to_owned(),
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(chain = binding.owner().as_u64(), "watchdog.fired");

            sink.report_timeout(TimeoutError::new(text, deadline));
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(deadline = ?deadline, "watchdog.armed");

        *self.armed.lock() = Some((deadline, task));
    }

    /// Cancels the armed deadline, if any. Idempotent.
    pub fn disarm(&self) {
        let disarmed = self.armed.lock().take();

        #[cfg(feature = "tracing")]
        if disarmed.is_some() {
            tracing::debug!("watchdog.disarmed");
        }

        // Dropping the entry aborts its scheduled task.
        drop(disarmed);
    }

    /// The armed deadline, if any.
    #[cfg(test)]
    pub fn armed_deadline(&self) -> Option<Duration> {
        self.armed.lock().as_ref().map(|(deadline, _)| *deadline)
    }
}

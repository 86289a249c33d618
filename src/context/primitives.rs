//! The scheduling primitives.
//!
//! All of them fail fast with a [`StepError`](crate::error::StepError) when
//! called without a live chain or outside the test body, and none of them
//! block: each returns as soon as its step is composed onto the chain.

use std::any::{type_name, Any};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, StepError, StepFailure};
use crate::message::Message;
use crate::poll::{self, IntoPollResult, PollOutcome};
use crate::value::{IntoStepResult, StepOutput, StepValue};

use super::StepContext;

impl StepContext {
    /// Schedules `step` to run after every previously scheduled step has
    /// resolved. The step receives the value the previous step resolved
    /// with, and its return value becomes the chained value for the next
    /// step.
    ///
    /// # Errors
    ///
    /// Fails without touching the chain if no chain is live
    /// ([`NoActiveChain`](StepError::NoActiveChain)) or if called outside
    /// the synchronous extent of the test body
    /// ([`NotInStepContext`](StepError::NotInStepContext)).
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// cx.wait_until(|_| registry.lookup("worker"))?;
    /// cx.and_then(|found| {
    ///     assert!(found.downcast_ref::<Worker>().is_some());
    /// })?;
    /// ```
    pub fn and_then<F, R>(&self, step: F) -> Result<()>
    where
        F: FnOnce(StepValue) -> R + Send + 'static,
        R: IntoStepResult,
    {
        self.and_then_with("stepchain#and_then(): returned future never resolved.", step)
    }

    /// Like [`and_then`](Self::and_then), with `message` reported instead
    /// of the default diagnostic if the watchdog fires while this step is
    /// the one running.
    ///
    /// # Errors
    ///
    /// Fails when no chain is live or when called outside the test body.
    pub fn and_then_with<M, F, R>(&self, message: M, step: F) -> Result<()>
    where
        M: Into<Message>,
        F: FnOnce(StepValue) -> R + Send + 'static,
        R: IntoStepResult,
    {
        self.check_scheduling()?;
        self.inner
            .chain
            .compose(message.into(), move |value| step(value).into_step_result())
    }

    /// Schedules a step that re-evaluates `predicate` every
    /// [`poll_interval`](Self::poll_interval) until it produces a value,
    /// then resolves the chain with that value.
    ///
    /// The predicate receives the chained value on every attempt. A
    /// panicking attempt (a failed `assert!`, an out-of-bounds index)
    /// counts as "not yet"; its panic text becomes the reported diagnostic
    /// if the test times out before a later attempt succeeds.
    ///
    /// # Errors
    ///
    /// Fails when no chain is live or when called outside the test body.
    pub fn wait_until<F, R>(&self, predicate: F) -> Result<()>
    where
        F: FnMut(&StepValue) -> R + Send + 'static,
        R: IntoPollResult,
        R::Value: Any + Send,
    {
        let message = format!(
            "stepchain#wait_until() timed out since the following predicate never produced a value: {}",
            type_name::<F>()
        );
        self.wait_until_with(message, predicate)
    }

    /// Like [`wait_until`](Self::wait_until), with an explicit diagnostic
    /// for the waiting step.
    ///
    /// # Errors
    ///
    /// Fails when no chain is live or when called outside the test body.
    pub fn wait_until_with<M, F, R>(&self, message: M, predicate: F) -> Result<()>
    where
        M: Into<Message>,
        F: FnMut(&StepValue) -> R + Send + 'static,
        R: IntoPollResult,
        R::Value: Any + Send,
    {
        self.check_scheduling()?;
        let binding = self.inner.chain.binding().ok_or(StepError::NoActiveChain)?;
        let interval = self.inner.poll_interval;
        let timer = Arc::clone(&self.inner.timer);
        self.inner.chain.compose(message.into(), move |value| {
            Ok(StepOutput::later(async move {
                match poll::poll_until(binding, value, predicate, interval, timer).await {
                    PollOutcome::Resolved(produced) => Ok(StepValue::of(produced)),
                    PollOutcome::Superseded => Err(StepFailure::Superseded),
                }
            }))
        })
    }

    /// Schedules a step that waits `ms` milliseconds, then resolves the
    /// chain with the empty value.
    ///
    /// Prefer [`wait_until`](Self::wait_until): fixed sleeps make suites
    /// slow when the duration is generous and flaky when it is not. This
    /// exists for the cases where nothing observable distinguishes "done"
    /// from "not done yet".
    ///
    /// # Errors
    ///
    /// Fails when no chain is live or when called outside the test body.
    pub fn wait_millis(&self, ms: u64) -> Result<()> {
        self.check_scheduling()?;
        let timer = Arc::clone(&self.inner.timer);
        let message = format!("stepchain#wait_millis() timed out while waiting {ms} milliseconds");
        self.inner.chain.compose(Message::from(message), move |_value| {
            Ok(StepOutput::later(async move {
                timer.sleep(Duration::from_millis(ms)).await;
                Ok(StepValue::none())
            }))
        })
    }

    /// Schedules steps that sample `probe`, wait until a later attempt
    /// returns a different value, then resolve the chain with the changed
    /// value. Any `PartialEq` inequality counts as a change.
    ///
    /// # Errors
    ///
    /// Fails when no chain is live or when called outside the test body.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// cx.wait_until_change(move |_| counter.load(Ordering::SeqCst))?;
    /// cx.and_then(|changed| {
    ///     assert_eq!(changed.downcast::<u32>(), Some(8));
    /// })?;
    /// ```
    pub fn wait_until_change<F, T>(&self, probe: F) -> Result<()>
    where
        F: FnMut(&StepValue) -> T + Send + 'static,
        T: PartialEq + Any + Send,
    {
        let message = format!(
            "stepchain#wait_until_change() timed out since the return value of the following probe never changed: {}",
            type_name::<F>()
        );
        self.wait_until_change_with(message, probe)
    }

    /// Like [`wait_until_change`](Self::wait_until_change), with an
    /// explicit diagnostic for the waiting step.
    ///
    /// # Errors
    ///
    /// Fails when no chain is live or when called outside the test body.
    pub fn wait_until_change_with<M, F, T>(&self, message: M, probe: F) -> Result<()>
    where
        M: Into<Message>,
        F: FnMut(&StepValue) -> T + Send + 'static,
        T: PartialEq + Any + Send,
    {
        let probe = Arc::new(Mutex::new(probe));
        let initial: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let changed: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

        // Sample once when this step's turn comes, passing the chained
        // value through untouched.
        {
            let probe = Arc::clone(&probe);
            let initial = Arc::clone(&initial);
            self.and_then(move |value| {
                let sampled = (*probe.lock())(&value);
                *initial.lock() = Some(sampled);
                value
            })?;
        }

        {
            let probe = Arc::clone(&probe);
            let initial = Arc::clone(&initial);
            let changed = Arc::clone(&changed);
            self.wait_until_with(message, move |value| {
                let current = (*probe.lock())(value);
                let is_changed = initial
                    .lock()
                    .as_ref()
                    .map_or(true, |sampled| current != *sampled);
                if is_changed {
                    *changed.lock() = Some(current);
                }
                is_changed
            })?;
        }

        self.and_then(move |_value| {
            changed.lock().take().map_or_else(StepValue::none, StepValue::of)
        })
    }
}

//! Error definitions
//!
//! This module provides the error types for stepchain: synchronous
//! scheduling errors, step chain failures, and watchdog timeouts.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Synchronous misuse of the scheduling API.
///
/// Returned directly from the scheduling primitives, before anything is
/// composed onto the chain. Liveness is checked before the in-body flag, so
/// a call with no live chain reports [`NoActiveChain`](Self::NoActiveChain)
/// even when it also happens outside a test body.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepError {
    /// No chain is live. Steps can only be scheduled while a
    /// harness-managed test execution is running.
    #[error("stepchain: no active step chain; run the test through a harness so setup can create one")]
    NoActiveChain,

    /// The call happened outside the synchronous extent of the test body.
    /// Steps cannot be scheduled from other tasks or from inside running
    /// steps.
    #[error("stepchain: steps can only be scheduled synchronously inside the test body; nested or asynchronous scheduling is not supported")]
    NotInStepContext,
}

/// Why a step chain settled with a failure.
#[derive(Error, Debug)]
pub enum StepFailure {
    /// A step reported a failure with a diagnostic.
    #[error("{0}")]
    Message(String),

    /// A step panicked while running.
    #[error("step panicked: {0}")]
    Panicked(String),

    /// A waiting step noticed its chain was no longer the live one and
    /// ended the stale tail. Never reported as a test failure.
    #[error("step chain superseded by a newer test execution")]
    Superseded,
}

impl StepFailure {
    /// Creates a failure carrying a diagnostic message.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }
}

/// The watchdog fired before the test's completion signal settled.
///
/// Delivered through [`FailureSink`](crate::watchdog::FailureSink), never
/// through the chain itself.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TimeoutError {
    message: String,
    deadline: Duration,
}

impl TimeoutError {
    pub(crate) fn new(message: String, deadline: Duration) -> Self {
        Self { message, deadline }
    }

    /// The resolved diagnostic for the step that was running when the
    /// deadline passed.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The deadline that was exceeded.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// A predicate attempt that panicked instead of producing a value.
///
/// Recovered inside the polling loop and treated as "no value yet"; the
/// panic text only becomes user-visible if the test later times out.
#[derive(Error, Debug, Clone)]
#[error("predicate panicked: {0}")]
pub struct EvalError(String);

impl EvalError {
    pub(crate) fn new(reason: String) -> Self {
        Self(reason)
    }

    /// The text of the caught panic.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Extracts the human-readable text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StepError>;

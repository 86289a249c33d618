//! Values passed between steps.
//!
//! Each step receives the value the previous step resolved with, as a
//! dynamically typed [`StepValue`]. [`StepOutput`] describes what a step
//! produced when it ran, and [`IntoStepResult`] lets step callbacks return
//! plain values instead of spelling out the full result type.

use std::any::Any;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

use crate::error::StepFailure;

/// The dynamically typed value handed from one step to the next.
///
/// An empty value models "the previous step resolved with nothing", which
/// is what [`wait_millis`](crate::context::StepContext::wait_millis) and
/// callbacks returning `()` produce.
///
/// # Example
///
/// ```rust
/// use stepchain::value::StepValue;
///
/// let value = StepValue::of(42_u32);
/// assert_eq!(value.downcast_ref::<u32>(), Some(&42));
/// assert_eq!(value.downcast::<u32>(), Some(42));
///
/// assert!(StepValue::none().is_none());
/// ```
#[derive(Default)]
pub struct StepValue(Option<Box<dyn Any + Send>>);

impl StepValue {
    /// The empty value.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// Wraps a concrete value.
    #[must_use]
    pub fn of<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    /// Returns `true` if this is the empty value.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Takes the value out as `T`, if it holds one of that type.
    #[must_use]
    pub fn downcast<T: Any>(self) -> Option<T> {
        self.0
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Borrows the value as `T`, if it holds one of that type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|held| held.downcast_ref::<T>())
    }
}

impl fmt::Debug for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_some() {
            f.write_str("StepValue(..)")
        } else {
            f.write_str("StepValue(none)")
        }
    }
}

/// The future type a deferring step suspends the chain on. Also the type of
/// the chain's composed tail.
pub type StepFuture = BoxFuture<'static, std::result::Result<StepValue, StepFailure>>;

/// What a step produced when it ran.
pub enum StepOutput {
    /// The step finished immediately with this value.
    Now(StepValue),
    /// The step suspends the chain until the future settles.
    Later(StepFuture),
}

impl StepOutput {
    /// A step that finished with no value.
    #[must_use]
    pub fn none() -> Self {
        Self::Now(StepValue::none())
    }

    /// A step that finished immediately with `value`.
    #[must_use]
    pub fn now<T: Any + Send>(value: T) -> Self {
        Self::Now(StepValue::of(value))
    }

    /// A step that suspends the chain until `future` settles.
    pub fn later<F>(future: F) -> Self
    where
        F: Future<Output = std::result::Result<StepValue, StepFailure>> + Send + 'static,
    {
        Self::Later(Box::pin(future))
    }
}

impl fmt::Debug for StepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now(value) => f.debug_tuple("Now").field(value).finish(),
            Self::Later(_) => f.write_str("Later(..)"),
        }
    }
}

/// The result of running one step.
pub type StepResult = std::result::Result<StepOutput, StepFailure>;

/// Conversion into [`StepResult`], so step callbacks can return plain
/// values:
///
/// - `()` finishes the step, resolving the chain with the empty value
/// - [`StepValue`] finishes the step with that value
/// - [`StepOutput`] finishes now or suspends the chain on a future
/// - [`StepFailure`] fails the step, skipping every later step
/// - [`StepResult`] gives full control
pub trait IntoStepResult {
    /// Converts this into the result of a completed step.
    fn into_step_result(self) -> StepResult;
}

impl IntoStepResult for () {
    fn into_step_result(self) -> StepResult {
        Ok(StepOutput::none())
    }
}

impl IntoStepResult for StepValue {
    fn into_step_result(self) -> StepResult {
        Ok(StepOutput::Now(self))
    }
}

impl IntoStepResult for StepOutput {
    fn into_step_result(self) -> StepResult {
        Ok(self)
    }
}

impl IntoStepResult for StepFailure {
    fn into_step_result(self) -> StepResult {
        Err(self)
    }
}

impl IntoStepResult for StepResult {
    fn into_step_result(self) -> StepResult {
        self
    }
}

//! # stepchain 🔗
//!
//! > Sequential async step scheduling for tests
//!
//! **stepchain** lets a test describe its asynchronous phases (wait for a
//! condition, wait for a change, then assert) as plain synchronous
//! statements. Each statement defers a step onto one ordered chain per
//! test; polled conditions re-check on a fixed interval, and a watchdog
//! fails the test with the stalled step's own diagnostic if the chain
//! never settles.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepchain::prelude::*;
//!
//! #[stepchain::test(paused = true)]
//! fn test_worker_comes_up(cx: &StepContext) -> stepchain::Result<()> {
//!     cx.wait_until(|_| registry.lookup("worker"))?;
//!     cx.and_then(|found| {
//!         assert!(found.downcast_ref::<Worker>().is_some());
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - 🔗 **Step Chain** - ordered deferred steps, values flow step to step
//! - ⏳ **Polling Waits** - re-evaluated predicates, panics mean "not yet"
//! - 🐕 **Watchdog** - deadline failure naming the step that stalled
//! - 🧹 **Supersession** - stale waits from finished tests end silently

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chain;
pub mod context;
pub mod error;
pub mod harness;
pub mod message;
pub mod poll;
pub mod timer;
pub mod value;
pub mod watchdog;

/// Prelude for convenient imports
///
/// ```rust
/// use stepchain::prelude::*;
/// ```
pub mod prelude {
    pub use crate::context::{ContextConfig, StepContext, DEFAULT_TIMEOUT};
    pub use crate::error::{Result, StepError, StepFailure, TimeoutError};
    pub use crate::harness::{Completion, StepHarness, TestBody, TestOutcome};
    pub use crate::message::Message;
    pub use crate::poll::{IntoPollResult, DEFAULT_POLL_INTERVAL};
    pub use crate::timer::{Timer, TokioTimer};
    pub use crate::value::{IntoStepResult, StepOutput, StepValue};
}

// Re-exports
pub use context::{ContextConfig, StepContext};
pub use error::{Result, StepError, StepFailure, TimeoutError};
pub use harness::{Completion, StepHarness, TestBody, TestOutcome};
pub use value::{StepOutput, StepValue};

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use stepchain_macros::test;

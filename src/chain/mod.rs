//! The per-test step chain.
//!
//! A chain is one test execution's ordered sequence of deferred steps,
//! composed into a single tail future. Identity-checked [`ChainBinding`]
//! handles let late writers (running steps, polling loops, the watchdog)
//! touch the live chain without keeping it alive and without confusing it
//! with the next test's chain.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::StepError;
use crate::message::Message;
use crate::value::{StepFuture, StepOutput, StepResult, StepValue};

/// Unique identifier for one test execution's chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChainId(u64);

impl ChainId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain({})", self.0)
    }
}

/// One live chain: the composed tail plus the diagnostic for the step
/// currently at the head of execution.
struct StepChain {
    id: ChainId,
    /// `None` once the harness has claimed the tail as its completion
    /// signal; a claimed chain no longer accepts steps.
    tail: Option<StepFuture>,
    pending: Option<Message>,
}

impl StepChain {
    fn new() -> Self {
        let settled: StepFuture = Box::pin(std::future::ready(Ok(StepValue::none())));
        Self {
            id: ChainId::next(),
            tail: Some(settled),
            pending: None,
        }
    }
}

/// Shared store holding the live chain, if any. Clones share the slot.
#[derive(Clone)]
pub(crate) struct ChainStore {
    slot: Arc<Mutex<Option<StepChain>>>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts a new chain with a settled, empty tail. A no-op returning the
    /// live chain's id if one is already live.
    pub fn begin(&self) -> ChainId {
        let mut slot = self.slot.lock();
        if let Some(chain) = slot.as_ref() {
            return chain.id;
        }
        let chain = StepChain::new();
        let id = chain.id;
        *slot = Some(chain);

        #[cfg(feature = "tracing")]
        tracing::debug!(chain = id.as_u64(), "chain.begin");

        id
    }

    /// Discards the live chain. Steps still in flight keep running but can
    /// no longer touch the store through their bindings.
    pub fn end(&self) {
        let ended = self.slot.lock().take();

        #[cfg(feature = "tracing")]
        if let Some(chain) = &ended {
            tracing::debug!(chain = chain.id.as_u64(), "chain.end");
        }

        // The tail may hold sizeable captures; destroy it outside the lock.
        drop(ended);
    }

    /// Returns `true` while a chain is live.
    pub fn is_live(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// An identity-checked handle to the live chain for late writers.
    pub fn binding(&self) -> Option<ChainBinding> {
        self.slot.lock().as_ref().map(|chain| ChainBinding {
            slot: Arc::downgrade(&self.slot),
            owner: chain.id,
        })
    }

    /// Composes `step` onto the live chain's tail.
    ///
    /// The step's message becomes the chain's pending diagnostic at the
    /// moment the step starts running, so a watchdog firing mid-step
    /// reports the step that was actually executing, not the most recently
    /// scheduled one.
    pub fn compose<F>(&self, message: Message, step: F) -> Result<(), StepError>
    where
        F: FnOnce(StepValue) -> StepResult + Send + 'static,
    {
        let mut slot = self.slot.lock();
        let chain = slot.as_mut().ok_or(StepError::NoActiveChain)?;
        let Some(previous) = chain.tail.take() else {
            return Err(StepError::NoActiveChain);
        };
        let binding = ChainBinding {
            slot: Arc::downgrade(&self.slot),
            owner: chain.id,
        };
        let next: StepFuture = Box::pin(async move {
            let value = previous.await?;
            binding.set_pending(message);

            #[cfg(feature = "tracing")]
            tracing::trace!(chain = binding.owner().as_u64(), "step.start");

            match step(value)? {
                StepOutput::Now(resolved) => Ok(resolved),
                StepOutput::Later(future) => future.await,
            }
        });
        chain.tail = Some(next);
        Ok(())
    }

    /// Claims the composed tail as the run's completion signal. The chain
    /// entry stays live so the watchdog can still resolve its pending
    /// diagnostic.
    pub fn take_tail(&self) -> Option<StepFuture> {
        self.slot.lock().as_mut().and_then(|chain| chain.tail.take())
    }
}

/// Identity-checked handle to a chain, held by late writers.
///
/// A binding never keeps the chain alive, and every access through it
/// verifies the live chain is still the one the binding was created for.
#[derive(Clone)]
pub(crate) struct ChainBinding {
    slot: Weak<Mutex<Option<StepChain>>>,
    owner: ChainId,
}

impl ChainBinding {
    /// The id of the chain this binding was created for.
    #[cfg(any(test, feature = "tracing"))]
    pub fn owner(&self) -> ChainId {
        self.owner
    }

    /// Returns `true` while the bound chain is still the live one.
    pub fn is_current(&self) -> bool {
        self.slot.upgrade().is_some_and(|slot| {
            slot.lock()
                .as_ref()
                .is_some_and(|chain| chain.id == self.owner)
        })
    }

    /// Replaces the bound chain's pending diagnostic. Silently does nothing
    /// once the bound chain is no longer the live one.
    pub fn set_pending(&self, message: Message) {
        if let Some(slot) = self.slot.upgrade() {
            let mut live = slot.lock();
            if let Some(chain) = live.as_mut() {
                if chain.id == self.owner {
                    chain.pending = Some(message);
                }
            }
        }
    }

    /// Takes the pending diagnostic if the bound chain is still live.
    ///
    /// `None` means the binding is stale; `Some(None)` means the chain is
    /// live but no step has installed a diagnostic yet.
    pub fn take_pending_if_current(&self) -> Option<Option<Message>> {
        let slot = self.slot.upgrade()?;
        let mut live = slot.lock();
        let chain = live.as_mut()?;
        if chain.id == self.owner {
            Some(chain.pending.take())
        } else {
            None
        }
    }
}

impl fmt::Debug for ChainBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainBinding")
            .field("owner", &self.owner)
            .field("current", &self.is_current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::error::StepFailure;

    #[test]
    fn test_chain_ids_are_unique() {
        assert_ne!(ChainId::next(), ChainId::next());
    }

    #[test]
    fn test_begin_is_idempotent_while_live() {
        let store = ChainStore::new();
        let first = store.begin();
        let second = store.begin();
        assert_eq!(first, second);
        assert!(store.is_live());
    }

    #[test]
    fn test_end_discards_the_chain() {
        let store = ChainStore::new();
        store.begin();
        store.end();
        assert!(!store.is_live());
        assert!(store.binding().is_none());
    }

    #[test]
    fn test_compose_without_a_chain_is_rejected() {
        let store = ChainStore::new();
        let result = store.compose(Message::from("m"), |_| Ok(StepOutput::none()));
        assert_eq!(result, Err(StepError::NoActiveChain));
    }

    #[test]
    fn test_compose_after_the_tail_is_claimed_is_rejected() {
        let store = ChainStore::new();
        store.begin();
        assert!(store.take_tail().is_some());
        let result = store.compose(Message::from("m"), |_| Ok(StepOutput::none()));
        assert_eq!(result, Err(StepError::NoActiveChain));
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_values_flow() {
        let store = ChainStore::new();
        store.begin();

        store
            .compose(Message::from("first"), |value| {
                assert!(value.is_none());
                Ok(StepOutput::now(10_u32))
            })
            .unwrap();
        store
            .compose(Message::from("second"), |value| {
                let previous = value.downcast::<u32>().unwrap();
                Ok(StepOutput::now(previous + 1))
            })
            .unwrap();

        let tail = store.take_tail().unwrap();
        let resolved = tail.await.unwrap();
        assert_eq!(resolved.downcast::<u32>(), Some(11));
    }

    #[tokio::test]
    async fn test_a_failed_step_skips_the_rest() {
        let store = ChainStore::new();
        store.begin();

        static RAN: AtomicBool = AtomicBool::new(false);
        store
            .compose(Message::from("failing"), |_| {
                Err(StepFailure::message("step went wrong"))
            })
            .unwrap();
        store
            .compose(Message::from("skipped"), |_| {
                RAN.store(true, Ordering::SeqCst);
                Ok(StepOutput::none())
            })
            .unwrap();

        let outcome = store.take_tail().unwrap().await;
        assert!(matches!(outcome, Err(StepFailure::Message(text)) if text == "step went wrong"));
        assert!(!RAN.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_messages_install_when_their_step_starts() {
        let store = ChainStore::new();
        store.begin();
        let binding = store.binding().unwrap();

        store
            .compose(Message::from("only step"), |_| Ok(StepOutput::none()))
            .unwrap();
        // Nothing has run yet, so no diagnostic is pending.
        assert!(matches!(binding.take_pending_if_current(), Some(None)));

        store.take_tail().unwrap().await.unwrap();
        let pending = binding.take_pending_if_current().unwrap();
        assert_eq!(
            pending.map(|message| message.resolve()),
            Some("only step".to_owned())
        );
    }

    #[test]
    fn test_bindings_go_stale_when_the_chain_ends() {
        let store = ChainStore::new();
        store.begin();
        let binding = store.binding().unwrap();
        assert!(binding.is_current());

        store.end();
        assert!(!binding.is_current());
        assert!(binding.take_pending_if_current().is_none());
        // Writing through a stale binding is a silent no-op.
        binding.set_pending(Message::from("late"));
    }

    #[test]
    fn test_a_stale_binding_cannot_touch_the_next_chain() {
        let store = ChainStore::new();
        store.begin();
        let old = store.binding().unwrap();
        store.end();

        store.begin();
        let fresh = store.binding().unwrap();
        assert_ne!(old.owner(), fresh.owner());
        assert!(!old.is_current());

        old.set_pending(Message::from("from the previous test"));
        assert!(matches!(fresh.take_pending_if_current(), Some(None)));
    }
}

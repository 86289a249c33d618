//! Explicit completion for callback-style tests.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// The verdict sent through a completion handle.
pub(crate) type Verdict = std::result::Result<(), String>;

/// First-call-wins completion handle for callback-style tests.
///
/// Handed to bodies built with
/// [`TestBody::with_completion`](crate::harness::TestBody::with_completion).
/// Invoking it settles the test regardless of what the chain is doing;
/// dropping every clone without invoking it leaves the test pending until
/// the watchdog fires.
#[derive(Clone)]
pub struct Completion {
    sender: Arc<Mutex<Option<oneshot::Sender<Verdict>>>>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Verdict>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    /// Settles the test successfully. Calls after the first invocation of
    /// either method are ignored.
    pub fn complete(&self) {
        self.send(Ok(()));
    }

    /// Fails the test with `message`. Calls after the first invocation of
    /// either method are ignored.
    pub fn fail(&self, message: impl Into<String>) {
        self.send(Err(message.into()));
    }

    fn send(&self, verdict: Verdict) {
        if let Some(sender) = self.sender.lock().take() {
            // The receiver disappears once the test run is torn down;
            // verdicts arriving after that are dropped.
            let _ = sender.send(verdict);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let invoked = self.sender.lock().is_none();
        f.debug_struct("Completion").field("invoked", &invoked).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_sends_a_passing_verdict() {
        let (completion, mut receiver) = Completion::channel();
        completion.complete();
        assert_eq!(receiver.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_fail_sends_the_message() {
        let (completion, mut receiver) = Completion::channel();
        completion.fail("never heard back");
        assert_eq!(receiver.try_recv().unwrap(), Err("never heard back".to_owned()));
    }

    #[test]
    fn test_the_first_invocation_wins() {
        let (completion, mut receiver) = Completion::channel();
        completion.fail("lost the race");
        completion.complete();
        assert_eq!(receiver.try_recv().unwrap(), Err("lost the race".to_owned()));
    }

    #[test]
    fn test_clones_share_the_verdict_slot() {
        let (completion, mut receiver) = Completion::channel();
        let other = completion.clone();
        other.complete();
        completion.fail("too late");
        assert_eq!(receiver.try_recv().unwrap(), Ok(()));
    }
}

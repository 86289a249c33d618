//! Timer abstraction over the host runtime's clock and task queue.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;

/// A source of delayed wakeups.
///
/// The default implementation defers to the tokio time driver, so tests
/// running with a paused clock (`start_paused = true`) see every wait
/// complete instantly and deterministically.
pub trait Timer: Send + Sync {
    /// Completes after `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Timer backed by the tokio time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl TokioTimer {
    /// Creates a new tokio-backed timer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// A spawned task that stops mattering before it finishes.
///
/// Cancelling a finished task is a no-op, and dropping the handle cancels
/// the task.
pub struct ScheduledTask {
    handle: tokio::task::JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawns `future` onto the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Cancels the task if it has not already finished.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Returns `true` once the task has finished or been cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_sleeps_for_the_requested_duration() {
        let timer = TokioTimer::new();
        let start = tokio::time::Instant::now();
        timer.sleep(Duration::from_secs(5)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_a_pending_task() {
        let ran = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&ran);
        let task = ScheduledTask::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            observed.store(true, Ordering::SeqCst);
        });

        task.cancel();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(task.is_finished());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_handle_cancels_the_task() {
        let ran = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&ran);
        drop(ScheduledTask::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            observed.store(true, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelling_a_finished_task_is_a_no_op() {
        let task = ScheduledTask::spawn(async {});
        tokio::task::yield_now().await;
        task.cancel();
        task.cancel();
        assert!(task.is_finished());
    }
}

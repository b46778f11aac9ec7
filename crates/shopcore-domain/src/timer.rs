//! Cancellable one-shot timers.
//!
//! Every re-armable deadline in the workspace (TTL eviction, batch debounce,
//! partition windows) is a spawned tokio task wrapped in a [`TimerHandle`].
//! Cancelling aborts the task. Aborting is not synchronous with respect to a
//! task that has already woken, so callbacks must also check a generation
//! number against the state they are about to mutate.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle to a scheduled callback.
///
/// Dropping the handle does **not** cancel the timer; call [`cancel`].
///
/// [`cancel`]: TimerHandle::cancel
#[derive(Debug)]
pub struct TimerHandle {
    handle: AbortHandle,
}

impl TimerHandle {
    /// Runs `callback` after `delay` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn schedule<F, Fut>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
        });
        Self {
            handle: task.abort_handle(),
        }
    }

    /// Cancels the timer. No-op if it already fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Returns true once the timer has fired or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

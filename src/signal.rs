//! Wake a waiting lookup coordinator whenever any in-flight query finishes.
//!
//! [`CompletionSignal`] is a resettable binary flag. Workers call
//! [`signal`](CompletionSignal::signal) concurrently; a single coordinator
//! calls [`reset`](CompletionSignal::reset) and then
//! [`wait`](CompletionSignal::wait). A signal raised at any point after the
//! reset is observed by the next wait: wakeups may be coalesced but are never
//! lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;

#[derive(Debug, Default)]
pub struct CompletionSignal {
    signaled: AtomicBool,
    notify: Notify,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return to the "not signaled" state.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::SeqCst);
    }

    /// Mark the signal raised and wake the waiter, if any.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Wait until the signal is raised or `timeout` elapses.
    ///
    /// Returns immediately if the signal was raised since the last reset. The
    /// caller is not told which of the two happened.
    pub async fn wait(&self, timeout: Duration) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent signal cannot slip between.
        notified.as_mut().enable();
        if self.is_signaled() {
            return;
        }
        let _ = time::timeout(timeout, notified).await;
    }
}

/// Raises a [`CompletionSignal`] when dropped.
///
/// Moved into every worker task so the coordinator wakes on every exit path:
/// normal return, early return, panic, or the task being aborted.
#[derive(Debug)]
pub struct SignalGuard {
    signal: Arc<CompletionSignal>,
}

impl SignalGuard {
    pub fn new(signal: Arc<CompletionSignal>) -> Self {
        Self { signal }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.signal.signal();
    }
}

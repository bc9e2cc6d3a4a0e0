//! Run cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Stops a run between attempts.
///
/// Cancelling also wakes a pause in progress (pacing, backoff, cooldown or a
/// quota wait). A send already on the wire is never interrupted. Clones share
/// the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    shared: Arc<Shared>,
}

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Returns true once [`CancelFlag::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Completes when the flag is set.
    pub async fn cancelled(&self) {
        // Registered before the check so a concurrent cancel is not missed.
        let notified = self.shared.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

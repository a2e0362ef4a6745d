//! Cooperative cancellation: a set-once flag per job, observed by workers
//! between task executions. Never preemptive; an in-flight handler invocation
//! runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable handle to a job's cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Idempotent; returns true only for the first call.
    pub fn cancel(&self) -> bool {
        let newly_set = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if newly_set {
            self.inner.notify.notify_waiters();
        }
        newly_set
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set. Returns immediately if already set.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

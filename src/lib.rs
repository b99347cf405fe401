// src/lib.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;

/// Cooperative cancellation signal shared across one run.
///
/// The scheduler checks the flag before starting new work; in-flight process
/// wrappers await [`CancellationToken::cancelled`] to interrupt running
/// children. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

#[derive(Debug, Default)]
struct CancellationInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled. Returns immediately if the
    /// token was already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        // Re-check after registering to avoid a lost wakeup.
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

//! Cooperative shutdown token.
//!
//! A cloneable token checked at every suspension point of the engine loop
//! and the realtime channel loops. Triggering is idempotent and wakes all
//! parked waiters, so shutdown is testable without process-wide signal
//! delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call more than once.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Resolve when shutdown is requested. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        loop {
            if self.is_triggered() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

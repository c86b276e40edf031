//! Cancellation tokens (spec §6 "Cancellation token" collaborator contract,
//! §9 "Cancellation tokens").
//!
//! Modeled on the teacher's `CancellationToken`/`TaskHandle` split in
//! `async_runtime/cancellation.rs` (an atomic cancelled flag plus a
//! `Mutex<Option<String>>` reason), but the teacher's awaitable edge is a
//! background thread polling every 10ms (`CancellationSystem::
//! start_background_cleaner`) — a workaround for a hand-rolled executor with
//! no native wakeup primitive. This crate is tokio-native throughout, so the
//! awaitable edge is a `tokio::sync::Notify` instead: cheaper, and it wakes
//! waiters the instant `cancel()` is called rather than up to 10ms late.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Read side of a cancellation signal, shared with user task handlers.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    reason: std::sync::Mutex<Option<String>>,
    notify: Notify,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: std::sync::Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// True once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The reason passed to `cancel`, if any.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Request cancellation. Idempotent: only the first call's reason is
    /// retained, and only the first call wakes waiters.
    pub fn cancel(&self, reason: Option<String>) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.inner.reason.lock().unwrap_or_else(|e| e.into_inner()) = reason;
        self.inner.notify.notify_waiters();
    }

    /// Resolves once `cancel` has been (or already was) called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // `enable()` registers this waiter before we re-check the flag, so a
        // `cancel()` landing between the check and the `.await` below still
        // wakes us (Notify::notify_waiters only wakes waiters already
        // registered at the time it's called).
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Returns `Err(AbortError)` if cancelled, `Ok(())` otherwise — the
    /// cooperative check handlers are expected to perform at yield points
    /// (spec §5).
    pub fn throw_if_cancelled(&self) -> Result<(), crate::error::AbortError> {
        if self.is_cancelled() {
            Err(crate::error::AbortError::new(self.reason()))
        } else {
            Ok(())
        }
    }
}

/// A child token that can be driven by an external caller-supplied token:
/// cancelling either side cancels both observers of this token.
pub fn link(a: &CancellationToken, b: &CancellationToken) {
    let a = a.clone();
    let b2 = b.clone();
    tokio::spawn(async move {
        b2.cancelled().await;
        a.cancel(b2.reason());
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_idempotent_and_observable() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel(Some("first".into()));
        token.cancel(Some("second".into()));

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("first".into()));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::task::yield_now().await;
        token.cancel(None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel(Some("pre-cancelled".into()));
        token.cancelled().await;
        assert_eq!(token.reason(), Some("pre-cancelled".into()));
    }

    #[tokio::test]
    async fn linked_token_propagates_cancellation() {
        let internal = CancellationToken::new();
        let external = CancellationToken::new();
        link(&internal, &external);

        external.cancel(Some("external abort".into()));
        internal.cancelled().await;
        assert!(internal.is_cancelled());
    }
}

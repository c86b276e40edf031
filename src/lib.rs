//! `taskloom-core`: a bounded-concurrency task queue and a concurrent
//! multi-lease resource pool, built on a small shared async substrate
//! (settable futures, timeouts with late-resolution cleanup, bounded
//! retry, cancellation tokens).
//!
//! See [`queue`] for `TaskQueue`, [`pool`] for `ConcurrentResourcePool` and
//! `SingleLeasePool`, and [`future_ext`] for the combinators both are built
//! from.

pub mod cancel;
pub mod clock;
pub mod error;
pub mod events;
pub mod future_ext;
pub mod ids;
pub mod pool;
pub mod queue;

/// Re-exports of the surface most callers need: the two top-level types,
/// their config/diagnostics structs, and the error/id/clock types that show
/// up in their signatures.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::clock::{Clock, FakeClock, SharedClock, SystemClock};
    pub use crate::error::{AbortError, PoolError, QueueError, TaskFailureError, TimeoutError};
    pub use crate::events::{HandlerId, ProgressUpdate};
    pub use crate::future_ext::{TimeoutOptions, TimeoutOutcome, with_retry, with_timeout};
    pub use crate::ids::{LeaseId, ResourceId, TaskId};
    pub use crate::pool::{AllocationMethod, ConcurrentResourcePool, ExternalLease, PoolConfig, PoolDiagnostics, SingleLeasePool};
    pub use crate::queue::{QueueDiagnostics, QueueState, TaskQueue, TaskQueueConfig, TaskRef, TaskState};
}

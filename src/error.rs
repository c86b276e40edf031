//! Error taxonomy for the async substrate, task queue, and resource pool.
//!
//! Every error kind in this module is a programmer-facing, descriptive
//! value: the substrate never swallows an error, it either surfaces it or
//! routes it to an explicit cleanup hook (spec §7).

use std::fmt;
use std::sync::Arc;

use crate::ids::TaskId;

/// A deadline elapsed before the source future settled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} (timeout_ms={timeout_ms})")]
pub struct TimeoutError {
    pub timeout_ms: u64,
    pub message: String,
}

impl TimeoutError {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            message: format!("operation timed out after {timeout_ms}ms"),
        }
    }

    pub fn with_message(timeout_ms: u64, message: impl Into<String>) -> Self {
        Self { timeout_ms, message: message.into() }
    }
}

/// An external cancellation token fired before a deadline or completion.
#[derive(Debug, Clone, thiserror::Error)]
#[error("aborted{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
pub struct AbortError {
    pub reason: Option<String>,
}

impl AbortError {
    pub fn new(reason: Option<String>) -> Self {
        Self { reason }
    }
}

/// A source that lost the `withTimeout` race later rejected with a
/// non-[`FailureReason::Error`] value; it is wrapped here rather than
/// silently discarded so cleanup hooks can still observe what happened.
#[derive(Debug, Clone, thiserror::Error)]
#[error("source settled after losing its timeout/cancel race")]
pub struct TimeoutSourceLateRejection<E> {
    pub original: E,
}

/// The underlying cause carried by a [`TaskFailureError`]. Never another
/// `TaskFailureError` — by construction, the failure path only builds one
/// from a reason that isn't already one (spec §7: "never re-wraps").
#[derive(Debug, Clone)]
pub enum FailureReason {
    Timeout(TimeoutError),
    Abort(AbortError),
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(e) => write!(f, "{e}"),
            Self::Abort(e) => write!(f, "{e}"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl From<TimeoutError> for FailureReason {
    fn from(e: TimeoutError) -> Self {
        Self::Timeout(e)
    }
}

impl From<AbortError> for FailureReason {
    fn from(e: AbortError) -> Self {
        Self::Abort(e)
    }
}

/// The uniform wrapper for any non-success terminal outcome of a task.
#[derive(Debug, Clone, thiserror::Error)]
#[error("task {task_id} failed: {reason}")]
pub struct TaskFailureError {
    pub task_id: TaskId,
    pub reason: FailureReason,
}

impl TaskFailureError {
    pub fn new(task_id: TaskId, reason: impl Into<FailureReason>) -> Self {
        Self { task_id, reason: reason.into() }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self.reason, FailureReason::Abort(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.reason, FailureReason::Timeout(_))
    }
}

/// Misuse / capacity errors raised by [`crate::queue::TaskQueue`]. These are
/// programmer errors, not recoverable conditions (spec §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue is draining or drained")]
    Draining,
    #[error("queue is drained")]
    Drained,
    #[error("queue cannot be started while draining or drained")]
    IllegalStartTransition,
    #[error("queue cannot be paused while draining or drained")]
    IllegalPauseTransition,
    #[error("max queued tasks ({max}) exceeded")]
    QueueFull { max: usize },
}

/// Misuse / capacity errors raised by [`crate::pool::ConcurrentResourcePool`].
///
/// `Clone` so a single outcome can settle a [`crate::pool::record::Settleable`]
/// and still be handed to every waiter that reads it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("pool is drained")]
    Drained,
    #[error("max acquire queue size ({max}) exceeded")]
    AcquireQueueFull { max: usize },
    #[error("create() failed: {0}")]
    Create(String),
    #[error("destroy() failed: {0}")]
    Destroy(String),
    #[error("onAcquire hook failed: {0}")]
    OnAcquire(String),
    #[error("onRelease hook failed: {0}")]
    OnRelease(String),
    #[error("lease {0} is not known to this pool")]
    UnknownLease(u64),
    #[error("a lease for this resource is already outstanding")]
    AlreadyLeased,
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Abort(#[from] AbortError),
}

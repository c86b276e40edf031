//! `TaskQueueConfig` (spec §4.2).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::clock::{self, SharedClock};

use super::task::TaskRef;

/// Default per-task deadline, named the way the teacher names its tunables
/// (`ConnectionPoolConfig::default()`'s `300`/`10`/`30` second constants).
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 60_000;

pub type TaskHandlerResult<Out> = Result<Out, Box<dyn std::error::Error + Send + Sync>>;
pub type TaskHandlerFuture<Out> = Pin<Box<dyn Future<Output = TaskHandlerResult<Out>> + Send>>;

/// `onTask`: invoked once per task transition to ACTIVE. Receives the same
/// `Arc<TaskRef>` handed back to the caller, so it can emit progress and
/// observe its own cancellation signal.
pub type TaskHandler<In, Out> = Arc<dyn Fn(Arc<TaskRef<In, Out>>) -> TaskHandlerFuture<Out> + Send + Sync>;

/// Constructor configuration (spec §4.2: `{maxConcurrentTasks=1,
/// maxQueuedTasks=∞, maxCompletedTaskMemory=100, onTask, now=wall-clock,
/// perTaskTimeoutMs=60_000}`).
#[derive(Clone)]
pub struct TaskQueueConfig {
    pub max_concurrent_tasks: usize,
    pub max_queued_tasks: Option<usize>,
    pub max_completed_task_memory: usize,
    pub per_task_timeout_ms: Option<u64>,
    pub clock: SharedClock,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 1,
            max_queued_tasks: None,
            max_completed_task_memory: 100,
            per_task_timeout_ms: Some(DEFAULT_TASK_TIMEOUT_MS),
            clock: clock::system_clock(),
        }
    }
}

impl TaskQueueConfig {
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    pub fn with_max_queued_tasks(mut self, n: usize) -> Self {
        self.max_queued_tasks = Some(n);
        self
    }

    pub fn with_max_completed_task_memory(mut self, n: usize) -> Self {
        self.max_completed_task_memory = n;
        self
    }

    pub fn with_per_task_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.per_task_timeout_ms = ms;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

//! Bounded-concurrency FIFO task queue (spec §4.2): `TaskQueue<In, Out>`.

mod config;
mod queue;
mod task;

pub use config::{DEFAULT_TASK_TIMEOUT_MS, TaskHandler, TaskHandlerFuture, TaskHandlerResult, TaskQueueConfig};
pub use queue::{QueueDiagnostics, QueueState, TaskQueue};
pub use task::{TaskRef, TaskState};

//! `TaskRef` and `TaskState` (spec §3).
//!
//! `TaskRef` generalizes the teacher's monomorphic `Task`/`TaskMetrics`
//! pair (`async_runtime/lib.rs`, `async_runtime/executor.rs`) into a type
//! generic over the caller's input/output, carrying its own cancellation
//! token, progress emitter, and terminal-settle notification instead of
//! leaning on the teacher's global `wakers`/`completed_tasks` maps.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use crate::cancel::CancellationToken;
use crate::error::TaskFailureError;
use crate::events::{Emitter, HandlerId, ProgressUpdate};
use crate::ids::TaskId;

use super::queue::Shared;

/// Where a task sits in the lifecycle graph `QUEUED -> ACTIVE ->
/// {SUCCEEDED | FAILED | CANCELLED}` (plus `QUEUED -> CANCELLED` directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Active,
    Cancelled,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(super) struct MutableState<Out> {
    pub state: TaskState,
    pub output: Option<Out>,
    pub error: Option<TaskFailureError>,
    pub completed_at: Option<u64>,
}

/// A queue entry shared by reference with both the queue's internal
/// bookkeeping and the caller who enqueued it. Caller code must not mutate
/// it directly; every mutation goes through the queue (spec §5 "Shared
/// resources").
pub struct TaskRef<In, Out> {
    id: TaskId,
    request: In,
    queued_at: u64,
    signal: CancellationToken,
    progress: Emitter<ProgressUpdate>,
    terminal_notify: Notify,
    inner: Mutex<MutableState<Out>>,
    pub(super) queue: Weak<Shared<In, Out>>,
}

impl<In, Out> TaskRef<In, Out> {
    pub(super) fn new(id: TaskId, request: In, queued_at: u64, signal: CancellationToken, queue: Weak<Shared<In, Out>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            request,
            queued_at,
            signal,
            progress: Emitter::new(),
            terminal_notify: Notify::new(),
            inner: Mutex::new(MutableState { state: TaskState::Queued, output: None, error: None, completed_at: None }),
            queue,
        })
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn request(&self) -> &In {
        &self.request
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn queued_at(&self) -> u64 {
        self.queued_at
    }

    pub fn completed_at(&self) -> Option<u64> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).completed_at
    }

    pub fn error(&self) -> Option<TaskFailureError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).error.clone()
    }

    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// Request cancellation. A no-op past the first call, matching
    /// `CancellationToken::cancel`'s idempotence.
    pub fn abort(&self, reason: Option<String>) {
        self.signal.cancel(reason.clone());
        if let Some(queue) = self.queue.upgrade() {
            queue.cancel_queued_task(&self.id, reason);
        }
    }

    /// Resolves exactly once, when this task reaches a terminal state.
    /// Never rejects (spec §3: "`completed` — a future that settles
    /// (resolves, never rejects) exactly once on terminal transition").
    pub async fn completed(&self) {
        let notified = self.terminal_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.state().is_terminal() {
            return;
        }
        notified.await;
    }

    pub fn on_progress(&self, listener: impl Fn(&ProgressUpdate) + Send + Sync + 'static) -> HandlerId {
        self.progress.on(listener)
    }

    pub fn off_progress(&self, id: HandlerId) -> bool {
        self.progress.off(id)
    }

    /// Publish a progress update. Intended to be called by the task's own
    /// `onTask` handler, which holds this same `Arc<TaskRef>`.
    pub fn emit_progress(&self, update: ProgressUpdate) {
        self.progress.emit(&update);
    }

    pub(super) fn mark_active(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state = TaskState::Active;
    }

    fn finish(&self, state: TaskState, output: Option<Out>, error: Option<TaskFailureError>, now: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = state;
        inner.output = output;
        inner.error = error;
        inner.completed_at = Some(now);
        drop(inner);
        self.terminal_notify.notify_waiters();
        true
    }

    /// Detach every progress listener. Called by the queue's diagnostic GC
    /// when this task is evicted from the terminal bucket (spec §9 "Memory
    /// control"), not at the terminal transition itself — a caller may
    /// still want to read final progress immediately after completion.
    pub(super) fn detach_progress_listeners(&self) {
        self.progress.clear();
    }

    pub(super) fn finish_succeeded(&self, output: Out, now: u64) -> bool {
        self.finish(TaskState::Succeeded, Some(output), None, now)
    }

    pub(super) fn finish_failed(&self, error: TaskFailureError, now: u64) -> bool {
        self.finish(TaskState::Failed, None, Some(error), now)
    }

    pub(super) fn finish_cancelled(&self, error: TaskFailureError, now: u64) -> bool {
        self.finish(TaskState::Cancelled, None, Some(error), now)
    }
}

impl<In, Out> TaskRef<In, Out>
where
    Out: Clone,
{
    pub fn output(&self) -> Option<Out> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).output.clone()
    }
}

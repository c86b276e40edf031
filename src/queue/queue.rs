//! `TaskQueue`: the bounded-concurrency FIFO scheduler (spec §4.2).
//!
//! Grounded on the teacher's `FutureExecutor`/`AsyncTaskScheduler` pair
//! (`async_runtime/executor.rs`, `async_runtime/scheduler.rs`): a ready
//! queue, a running set bounded by a concurrency limit, and a single
//! re-entrant "try to start more work" step invoked after every mutation.
//! The teacher drives that step with a hand-rolled poll loop; here each
//! admitted task's `onTask` future is instead driven to completion on its
//! own `tokio::spawn`, with `try_start_next` doing only the synchronous
//! bookkeeping (pop from `queued`, insert into `active`) before handing the
//! future to the runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{AbortError, FailureReason, QueueError, TaskFailureError};
use crate::events::Emitter;
use crate::future_ext::{TimeoutOptions, TimeoutOutcome, with_timeout};
use crate::ids::TaskId;

use super::config::{TaskHandler, TaskQueueConfig};
use super::task::{TaskRef, TaskState};

/// Lifecycle of the queue itself (spec §3: `PAUSED -> RUNNING ->
/// {DRAINING -> DRAINED}`, with `PAUSED <-> RUNNING`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Paused,
    Running,
    Draining,
    Drained,
}

/// A point-in-time snapshot returned by [`TaskQueue::get_diagnostics`].
pub struct QueueDiagnostics<In, Out> {
    pub state: QueueState,
    pub queued: Vec<Arc<TaskRef<In, Out>>>,
    pub active: Vec<Arc<TaskRef<In, Out>>>,
    pub cancelled: Vec<Arc<TaskRef<In, Out>>>,
    pub succeeded: Vec<Arc<TaskRef<In, Out>>>,
    pub failed: Vec<Arc<TaskRef<In, Out>>>,
}

pub(super) struct QueueInner<In, Out> {
    state: QueueState,
    queued: VecDeque<Arc<TaskRef<In, Out>>>,
    active: HashMap<TaskId, Arc<TaskRef<In, Out>>>,
    terminal: VecDeque<Arc<TaskRef<In, Out>>>,
}

pub(super) struct Shared<In, Out> {
    config: TaskQueueConfig,
    handler: TaskHandler<In, Out>,
    inner: Mutex<QueueInner<In, Out>>,
    error_emitter: Emitter<TaskFailureError>,
    idle_notify: Notify,
}

/// FIFO admission queue bounded by `maxConcurrentTasks` workers, with
/// cooperative cancellation, per-task timeouts, and bounded diagnostic
/// retention (spec §4.2).
pub struct TaskQueue<In, Out> {
    shared: Arc<Shared<In, Out>>,
}

impl<In, Out> Clone for TaskQueue<In, Out> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

fn push_terminal<In, Out>(terminal: &mut VecDeque<Arc<TaskRef<In, Out>>>, task: Arc<TaskRef<In, Out>>, max: usize) {
    terminal.push_back(task);
    // Insertion order already tracks completedAt order (we stamp it at the
    // moment of pushing), so a plain FIFO eviction implements "retain the
    // most recent `max`, ties by insertion order" (spec §4.2 "Diagnostic
    // GC") without re-sorting on every push.
    while terminal.len() > max {
        if let Some(evicted) = terminal.pop_front() {
            evicted.detach_progress_listeners();
            debug!(task_id = %evicted.id(), "evicted terminal task from diagnostic history");
        }
    }
}

impl<In, Out> TaskQueue<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn new(config: TaskQueueConfig, handler: TaskHandler<In, Out>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                inner: Mutex::new(QueueInner {
                    state: QueueState::Paused,
                    queued: VecDeque::new(),
                    active: HashMap::new(),
                    terminal: VecDeque::new(),
                }),
                error_emitter: Emitter::new(),
                idle_notify: Notify::new(),
            }),
        }
    }

    /// Admits a task. Stamps `queuedAt`, wires the task's internal
    /// cancellation token to the caller-supplied `signal` (if any), and
    /// invokes the scheduler — if the queue is RUNNING with a spare worker
    /// slot, the task is ACTIVE before this call returns.
    pub fn enqueue(&self, input: In, signal: Option<crate::cancel::CancellationToken>) -> Result<Arc<TaskRef<In, Out>>, QueueError> {
        let now = self.shared.config.clock.now_ms();
        let mut guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.state {
            QueueState::Draining | QueueState::Drained => return Err(QueueError::Draining),
            QueueState::Paused | QueueState::Running => {}
        }
        if let Some(max) = self.shared.config.max_queued_tasks {
            if guard.queued.len() + guard.active.len() >= max {
                return Err(QueueError::QueueFull { max });
            }
        }
        let internal_signal = crate::cancel::CancellationToken::new();
        if let Some(external) = &signal {
            crate::cancel::link(&internal_signal, external);
        }
        let task = TaskRef::new(TaskId::new(), input, now, internal_signal, Arc::downgrade(&self.shared));
        info!(task_id = %task.id(), "task admitted");
        guard.queued.push_back(task.clone());
        drop(guard);
        self.shared.clone().try_start_next();
        Ok(task)
    }

    pub fn start(&self) -> Result<(), QueueError> {
        {
            let mut guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            match guard.state {
                QueueState::Draining | QueueState::Drained => return Err(QueueError::IllegalStartTransition),
                QueueState::Running => return Ok(()),
                QueueState::Paused => guard.state = QueueState::Running,
            }
        }
        info!("queue started");
        self.shared.clone().try_start_next();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), QueueError> {
        let mut guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.state {
            QueueState::Draining | QueueState::Drained => return Err(QueueError::IllegalPauseTransition),
            QueueState::Paused => return Ok(()),
            QueueState::Running => guard.state = QueueState::Paused,
        }
        info!("queue paused");
        Ok(())
    }

    /// Resolves when both the QUEUED and ACTIVE buckets are empty,
    /// re-checking after each wakeup so tasks enqueued mid-wait are
    /// accounted for (spec §4.2).
    pub async fn wait_for_completion(&self) {
        loop {
            let notified = self.shared.idle_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let empty = {
                let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
                guard.queued.is_empty() && guard.active.is_empty()
            };
            if empty {
                return;
            }
            notified.await;
        }
    }

    /// Marks DRAINING, aborts every known QUEUED/ACTIVE task with a "queue
    /// drained" reason, awaits terminal settlement of all of them, then
    /// marks DRAINED. Idempotent: a second concurrent call just awaits the
    /// same completion.
    pub async fn drain(&self) {
        {
            let mut guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            match guard.state {
                QueueState::Drained => return,
                QueueState::Draining => {}
                QueueState::Paused | QueueState::Running => {
                    guard.state = QueueState::Draining;
                    info!("queue draining");
                }
            }
        }
        let to_abort: Vec<_> = {
            let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.queued.iter().cloned().chain(guard.active.values().cloned()).collect()
        };
        for task in to_abort {
            task.abort(Some("queue drained".to_string()));
        }
        self.wait_for_completion().await;
        let mut guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.state = QueueState::Drained;
        info!("queue drained");
    }

    pub fn state(&self) -> QueueState {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn get_diagnostics(&self) -> QueueDiagnostics<In, Out>
    where
        Out: Clone,
    {
        let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut cancelled = Vec::new();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for task in &guard.terminal {
            match task.state() {
                TaskState::Cancelled => cancelled.push(task.clone()),
                TaskState::Succeeded => succeeded.push(task.clone()),
                TaskState::Failed => failed.push(task.clone()),
                TaskState::Queued | TaskState::Active => {}
            }
        }
        QueueDiagnostics {
            state: guard.state,
            queued: guard.queued.iter().cloned().collect(),
            active: guard.active.values().cloned().collect(),
            cancelled,
            succeeded,
            failed,
        }
    }

    pub fn on_error(&self, listener: impl Fn(&TaskFailureError) + Send + Sync + 'static) -> crate::events::HandlerId {
        self.shared.error_emitter.on(listener)
    }

    pub fn off_error(&self, id: crate::events::HandlerId) -> bool {
        self.shared.error_emitter.off(id)
    }
}

impl<In, Out> Shared<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Directly cancels a still-QUEUED task: removed from `queued`, pushed
    /// straight to CANCELLED without ever becoming ACTIVE. A no-op if the
    /// task already left the QUEUED bucket (it's either ACTIVE, in which
    /// case cancellation races through `signal` and `with_timeout`
    /// instead, or already terminal).
    pub(super) fn cancel_queued_task(self: &Arc<Self>, task_id: &TaskId, reason: Option<String>) {
        let now = self.config.clock.now_ms();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pos) = guard.queued.iter().position(|t| t.id() == task_id) else {
            return;
        };
        let task = guard.queued.remove(pos).unwrap();
        let settled = task.finish_cancelled(TaskFailureError::new(task_id.clone(), AbortError::new(reason)), now);
        if settled {
            push_terminal(&mut guard.terminal, task, self.config.max_completed_task_memory);
        }
        drop(guard);
        info!(%task_id, "queued task cancelled before start");
        self.idle_notify.notify_waiters();
        self.clone().try_start_next();
    }

    /// Pops as many QUEUED tasks as current capacity allows and spawns
    /// their handler invocations. Synchronous: no `.await` inside the lock
    /// (spec §5 "guard with mutex held across each non-awaiting step").
    pub(super) fn try_start_next(self: Arc<Self>) {
        let mut started = Vec::new();
        {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            while guard.state == QueueState::Running && guard.active.len() < self.config.max_concurrent_tasks {
                let Some(task) = guard.queued.pop_front() else { break };
                task.mark_active();
                guard.active.insert(task.id().clone(), task.clone());
                started.push(task);
            }
        }
        for task in started {
            info!(task_id = %task.id(), "task started");
            self.clone().spawn_task_execution(task);
        }
    }

    fn spawn_task_execution(self: Arc<Self>, task: Arc<TaskRef<In, Out>>) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let signal = task.signal().clone();
            let opts: TimeoutOptions<Out, Box<dyn std::error::Error + Send + Sync>> = match self.config.per_task_timeout_ms {
                Some(ms) => TimeoutOptions::new(std::time::Duration::from_millis(ms)).with_external_cancel(signal),
                None => TimeoutOptions::default(),
            };
            let outcome = with_timeout(handler(task.clone()), opts).await;
            self.complete_task(task, outcome);
        });
    }

    fn complete_task(self: Arc<Self>, task: Arc<TaskRef<In, Out>>, outcome: Result<Out, TimeoutOutcome<Box<dyn std::error::Error + Send + Sync>>>) {
        let now = self.config.clock.now_ms();
        let task_id = task.id().clone();
        // A completion that races a cancellation that already fired always
        // loses to CANCELLED, even if `tokio::select!` happened to pick the
        // source branch (spec §4.2: "If the handler completes successfully
        // after its signal has already been aborted, the result is
        // discarded... state stays CANCELLED").
        let already_cancelled = task.signal().is_cancelled();

        let (settled, emit_error) = match outcome {
            Ok(_value) if already_cancelled => {
                let reason = task.signal().reason();
                (task.finish_cancelled(TaskFailureError::new(task_id.clone(), AbortError::new(reason)), now), None)
            }
            Ok(value) => (task.finish_succeeded(value, now), None),
            Err(TimeoutOutcome::Abort(e)) => (task.finish_cancelled(TaskFailureError::new(task_id.clone(), e), now), None),
            Err(TimeoutOutcome::Timeout(e)) => {
                let failure = TaskFailureError::new(task_id.clone(), e);
                let settled = task.finish_failed(failure.clone(), now);
                (settled, settled.then_some(failure))
            }
            Err(TimeoutOutcome::Source(_e)) if already_cancelled => {
                let reason = task.signal().reason();
                (task.finish_cancelled(TaskFailureError::new(task_id.clone(), AbortError::new(reason)), now), None)
            }
            Err(TimeoutOutcome::Source(e)) => {
                // A rejection already carrying a `TaskFailureError` is
                // forwarded as-is rather than re-wrapped (spec §4.2: "A
                // rejection whose reason is itself a TaskFailureError is
                // ignored").
                let failure = match e.downcast::<TaskFailureError>() {
                    Ok(existing) => *existing,
                    Err(e) => TaskFailureError::new(task_id.clone(), FailureReason::Other(Arc::<dyn std::error::Error + Send + Sync>::from(e))),
                };
                let settled = task.finish_failed(failure.clone(), now);
                (settled, settled.then_some(failure))
            }
        };

        if settled {
            if let Some(error) = &emit_error {
                warn!(%task_id, %error, "task failed");
                self.error_emitter.emit(error);
            } else {
                debug!(%task_id, state = %task.state(), "task reached terminal state");
            }
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.active.remove(&task_id);
            push_terminal(&mut guard.terminal, task, self.config.max_completed_task_memory);
            drop(guard);
            self.idle_notify.notify_waiters();
        }
        self.try_start_next();
    }
}

//! End-to-end scenarios for `TaskQueue` (spec §8).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use taskloom_core::prelude::*;
use taskloom_core::queue::{TaskHandler, TaskHandlerFuture};

fn counting_ok_handler(calls: Arc<AtomicUsize>) -> TaskHandler<i32, String> {
    Arc::new(move |_task| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok("ok".to_string()) }) as TaskHandlerFuture<String>
    })
}

fn error_counter(queue: &TaskQueue<i32, String>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    queue.on_error(move |_e| {
        inner.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test]
async fn sequential_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let queue = TaskQueue::new(TaskQueueConfig::default().with_max_concurrent_tasks(1), counting_ok_handler(calls.clone()));
    let errors = error_counter(&queue);

    let refs: Vec<_> = [1, 2, 3].into_iter().map(|i| queue.enqueue(i, None).unwrap()).collect();
    queue.start().unwrap();
    queue.wait_for_completion().await;

    for task in &refs {
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.output(), Some("ok".to_string()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_per_task() {
    let handler: TaskHandler<(), ()> = Arc::new(|_task| Box::pin(std::future::pending::<Result<(), Box<dyn std::error::Error + Send + Sync>>>()));
    let queue = TaskQueue::new(TaskQueueConfig::default(), handler);

    let task = queue.enqueue((), None).unwrap();
    queue.start().unwrap();

    tokio::time::advance(Duration::from_millis(60_001)).await;
    task.completed().await;

    assert_eq!(task.state(), TaskState::Failed);
    let err = task.error().expect("a failed task carries an error");
    assert!(err.is_timeout());
}

#[tokio::test]
async fn pre_start_cancellation() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let invoked2 = invoked.clone();
    let handler: TaskHandler<(), String> = Arc::new(move |_task| {
        invoked2.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok("ok".to_string()) })
    });
    let queue = TaskQueue::new(TaskQueueConfig::default(), handler);
    let errors = Arc::new(AtomicUsize::new(0));
    let errors2 = errors.clone();
    queue.on_error(move |_e| {
        errors2.fetch_add(1, Ordering::SeqCst);
    });

    let task = queue.enqueue((), None).unwrap();
    task.abort(None);
    queue.start().unwrap();
    task.completed().await;

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelling_active_task_discards_late_success() {
    let handler: TaskHandler<(), String> = Arc::new(|task| {
        Box::pin(async move {
            task.signal().cancelled().await;
            Ok("too late".to_string())
        })
    });
    let queue = TaskQueue::new(TaskQueueConfig::default().with_max_concurrent_tasks(1), handler);

    let task = queue.enqueue((), None).unwrap();
    queue.start().unwrap();
    tokio::task::yield_now().await;
    task.abort(Some("caller gave up".to_string()));
    task.completed().await;

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(task.output(), None);
    assert_eq!(task.error().unwrap().reason.to_string(), "aborted: caller gave up");
}

#[tokio::test]
async fn active_concurrency_never_exceeds_limit() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let in_flight2 = in_flight.clone();
    let peak2 = peak.clone();
    let handler: TaskHandler<i32, ()> = Arc::new(move |_task| {
        let in_flight = in_flight2.clone();
        let peak = peak2.clone();
        Box::pin(async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    });
    let queue = TaskQueue::new(TaskQueueConfig::default().with_max_concurrent_tasks(2), handler);

    for i in 0..20 {
        queue.enqueue(i, None).unwrap();
    }
    queue.start().unwrap();
    queue.wait_for_completion().await;

    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn diagnostic_history_is_bounded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let queue = TaskQueue::new(
        TaskQueueConfig::default().with_max_concurrent_tasks(4).with_max_completed_task_memory(5),
        counting_ok_handler(calls),
    );
    for i in 0..50 {
        queue.enqueue(i, None).unwrap();
    }
    queue.start().unwrap();
    queue.wait_for_completion().await;

    let diagnostics = queue.get_diagnostics();
    assert_eq!(diagnostics.succeeded.len(), 5);
}

#[tokio::test]
async fn drain_cancels_in_flight_and_queued_tasks_and_is_idempotent() {
    let handler: TaskHandler<i32, String> = Arc::new(|task| {
        Box::pin(async move {
            task.signal().cancelled().await;
            Ok("too late".to_string())
        })
    });
    let queue = TaskQueue::new(TaskQueueConfig::default().with_max_concurrent_tasks(1), handler);

    let refs: Vec<_> = [1, 2, 3].into_iter().map(|i| queue.enqueue(i, None).unwrap()).collect();
    queue.start().unwrap();
    tokio::task::yield_now().await;

    assert_eq!(refs[0].state(), TaskState::Active);
    assert_eq!(refs[1].state(), TaskState::Queued);
    assert_eq!(refs[2].state(), TaskState::Queued);

    queue.drain().await;

    for task in &refs {
        assert_eq!(task.state(), TaskState::Cancelled);
    }
    assert_eq!(queue.state(), QueueState::Drained);

    // A second drain on an already-drained queue is a no-op, not a hang.
    queue.drain().await;
    assert_eq!(queue.state(), QueueState::Drained);
}

#[tokio::test]
async fn queue_full_is_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));
    let queue = TaskQueue::new(
        TaskQueueConfig::default().with_max_concurrent_tasks(1).with_max_queued_tasks(1),
        counting_ok_handler(calls),
    );
    queue.enqueue(1, None).unwrap();
    let err = queue.enqueue(2, None).unwrap_err();
    assert!(matches!(err, QueueError::QueueFull { max: 1 }));
}

//! End-to-end scenarios for `ConcurrentResourcePool` (spec §8).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use taskloom_core::prelude::*;
use taskloom_core::pool::{CreateFn, DestroyFn, PoolFuture};

fn incrementing_create(counter: Arc<AtomicU64>) -> CreateFn<u64> {
    Arc::new(move || {
        let counter = counter.clone();
        Box::pin(async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }) as PoolFuture<u64>
    })
}

fn no_op_destroy() -> DestroyFn<u64> {
    Arc::new(|_resource| Box::pin(async { Ok(()) }) as PoolFuture<()>)
}

#[tokio::test]
async fn lazy_reuse_creates_once() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let config = PoolConfig::new(incrementing_create(create_calls.clone()), no_op_destroy()).with_max_concurrent_leases_per_resource(1);
    let pool = ConcurrentResourcePool::new(config);

    let lease1 = pool.acquire().await.unwrap();
    assert_eq!(*lease1.resource, 1);
    pool.release(lease1).await.unwrap();

    let lease2 = pool.acquire().await.unwrap();
    assert_eq!(*lease2.resource, 1);
    pool.release(lease2).await.unwrap();

    assert_eq!(create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn eager_distribution_spreads_across_resources() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let config = PoolConfig::new(incrementing_create(create_calls.clone()), no_op_destroy())
        .with_allocation_method(AllocationMethod::Eager)
        .with_max_resources(3);
    let pool = ConcurrentResourcePool::new(config);

    let lease1 = pool.acquire().await.unwrap();
    let first_resource = *lease1.resource;
    pool.release(lease1).await.unwrap();

    let lease2 = pool.acquire().await.unwrap();
    let second_resource = *lease2.resource;

    assert_eq!(create_calls.load(Ordering::SeqCst), 2);
    assert_ne!(first_resource, second_resource);
}

#[tokio::test]
async fn back_pressure_parks_and_rejects_then_wakes_on_release() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let config = PoolConfig::new(incrementing_create(create_calls.clone()), no_op_destroy())
        .with_max_resources(2)
        .with_max_queued_acquire_requests(2);
    let pool = ConcurrentResourcePool::new(config);

    let lease_a = pool.acquire().await.unwrap();
    let lease_b = pool.acquire().await.unwrap();

    let pool1 = pool.clone();
    let pool2 = pool.clone();
    let waiter1 = tokio::spawn(async move { pool1.acquire().await });
    let waiter2 = tokio::spawn(async move { pool2.acquire().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = pool.acquire().await.err().expect("fifth concurrent acquire should be rejected synchronously");
    assert!(err.to_string().contains("queue size"));
    match err {
        PoolError::AcquireQueueFull { max } => assert_eq!(max, 2),
        other => panic!("expected AcquireQueueFull, got {other}"),
    }

    pool.release(lease_a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let one_finished = waiter1.is_finished();
    let other_finished = waiter2.is_finished();
    assert!(one_finished ^ other_finished, "exactly one parked waiter should resolve after a single release");

    let (granted, still_pending) = if one_finished { (waiter1.await.unwrap().unwrap(), waiter2) } else { (waiter2.await.unwrap().unwrap(), waiter1) };
    still_pending.abort();

    pool.release(granted).await.unwrap();
    pool.release(lease_b).await.unwrap();
}

#[tokio::test]
async fn retire_after_uses_triggers_one_create_per_n_leases() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let config = PoolConfig::new(incrementing_create(create_calls.clone()), no_op_destroy()).with_retire_resource_after_uses(2);
    let pool = ConcurrentResourcePool::new(config);

    for _ in 0..4 {
        let lease = pool.acquire().await.unwrap();
        pool.release(lease).await.unwrap();
    }

    assert_eq!(create_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn single_lease_pool_rejects_a_second_concurrent_lease() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let config = PoolConfig::new(incrementing_create(create_calls), no_op_destroy())
        .with_allocation_method(AllocationMethod::Eager)
        .with_max_resources(1)
        .with_max_concurrent_leases_per_resource(2);
    let inner = ConcurrentResourcePool::new(config);
    let pool = SingleLeasePool::new(inner);

    let lease = pool.acquire().await.unwrap();
    let second = pool.acquire().await;
    assert!(matches!(second, Err(PoolError::AlreadyLeased)));

    pool.release(lease.resource_id).await.unwrap();
    let reacquired = pool.acquire().await.unwrap();
    assert_eq!(reacquired.resource_id, lease.resource_id);
}

#[tokio::test]
async fn forced_destroy_purges_phantom_leases_and_surfaces_unknown_lease() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let clock = FakeClock::new(0);
    let config = PoolConfig::new(incrementing_create(create_calls.clone()), no_op_destroy())
        .with_retire_resource_after_seconds(1)
        .with_destroy_retired_resource_forcibly_after_seconds(1)
        .with_clock(Arc::new(clock.clone()));
    let pool = ConcurrentResourcePool::new(config);

    let lease = pool.acquire().await.unwrap();

    // The record ages past `retireResourceAfterSeconds` and gets marked
    // retired, even though its one lease is still outstanding.
    clock.advance(1_001);
    pool.tick();
    assert_eq!(pool.get_diagnostics().leases.len(), 1, "the active lease should still be visible before forced destroy");

    // Now it ages past `destroyRetiredResourceForciblyAfterSeconds` too, so
    // revalidate begins destroying it despite the active lease.
    clock.advance(1_001);
    pool.tick();
    tokio::task::yield_now().await;

    let diagnostics = pool.get_diagnostics();
    assert!(diagnostics.leases.is_empty(), "a forcibly destroyed record's leases must not linger as phantoms");
    assert!(diagnostics.resources.is_empty(), "the destroyed record itself should no longer be tracked");

    let err = pool.release(lease).await.unwrap_err();
    assert!(matches!(err, PoolError::UnknownLease(_)), "a lease purged by a forced destroy is no longer known to the pool");
}

#[tokio::test]
async fn retired_resource_still_counts_against_max_resources_until_destroyed() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let config = PoolConfig::new(incrementing_create(create_calls.clone()), no_op_destroy())
        .with_max_resources(1)
        .with_retire_resource_after_uses(1)
        .with_max_queued_acquire_requests(0);
    let pool = ConcurrentResourcePool::new(config);

    let lease = pool.acquire().await.unwrap();
    pool.tick(); // retires the record: it has already been leased once, but the lease is still active

    let err = pool.acquire().await.err().expect("a retired-but-undestroyed record still counts against maxResources");
    assert!(matches!(err, PoolError::AcquireQueueFull { max: 0 }));

    pool.release(lease).await.unwrap();
    tokio::task::yield_now().await;

    let lease2 = pool.acquire().await.unwrap();
    assert_eq!(create_calls.load(Ordering::SeqCst), 2, "a fresh resource is created once the retired one finishes destroying");
    pool.release(lease2).await.unwrap();
}

#[tokio::test]
async fn acquire_rejects_once_drained() {
    let create_calls = Arc::new(AtomicU64::new(0));
    let config = PoolConfig::new(incrementing_create(create_calls), no_op_destroy());
    let pool = ConcurrentResourcePool::new(config);

    let lease = pool.acquire().await.unwrap();
    pool.release(lease).await.unwrap();
    pool.drain().await;

    let result = pool.acquire().await;
    assert!(matches!(result, Err(PoolError::Drained)));
}

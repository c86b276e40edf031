//! `ResourceRecord`, `InternalLease`, `ExternalLease` (spec §3).
//!
//! Grounded on `middleware/connection_pool.rs`'s `PooledConnection`
//! (`created_at`/`last_used`/`use_count`/`is_healthy` fields around a single
//! `tonic::transport::Channel`), generalized to an arbitrary resource type
//! `R` with a lease counter instead of a single-owner flag, since this pool
//! allows `maxConcurrentLeasesPerResource` concurrent leases per record.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::ids::{LeaseId, ResourceId};

/// A value settled at most once and awaitable by any number of callers —
/// the shared-read analogue of [`crate::future_ext::SettableFuture`], which
/// can only be consumed once. Backs both `resourceRef` (settles with the
/// created resource) and `destroyRef` (settles when teardown completes).
pub(crate) struct Settleable<T> {
    state: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> Settleable<T> {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(None), notify: Notify::new() }
    }

    pub(crate) fn settle(&self, value: T) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }
        *guard = Some(value);
        drop(guard);
        self.notify.notify_waiters();
    }

    pub(crate) fn peek(&self) -> Option<T> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) async fn get(&self) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(v) = self.peek() {
                return v;
            }
            notified.await;
        }
    }
}

/// One granted use of a record, counted against
/// `maxConcurrentLeasesPerResource`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseEntry {
    pub id: LeaseId,
    pub leased_at: u64,
}

/// Pool-owned bookkeeping for one resource. `resource` may still be
/// pending — a lease can be granted against a record before its `create()`
/// call has settled (spec §3: "resourceRef — ... may still be pending").
pub(crate) struct ResourceRecord<R, E> {
    pub id: ResourceId,
    pub created_at: u64,
    pub retired_at: Mutex<Option<u64>>,
    pub resource: Arc<Settleable<Result<Arc<R>, E>>>,
    pub destroying: Mutex<bool>,
    pub destroy_ref: Arc<Settleable<Result<(), E>>>,
    pub active_leases: Mutex<Vec<LeaseEntry>>,
    pub past_lease_count: Mutex<u64>,
}

impl<R, E: Clone> ResourceRecord<R, E> {
    pub fn new(id: ResourceId, created_at: u64) -> Self {
        Self {
            id,
            created_at,
            retired_at: Mutex::new(None),
            resource: Arc::new(Settleable::new()),
            destroying: Mutex::new(false),
            destroy_ref: Arc::new(Settleable::new()),
            active_leases: Mutex::new(Vec::new()),
            past_lease_count: Mutex::new(0),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired_at.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Sets `retiredAt` if unset. Returns `true` if this call performed the
    /// transition (retiredAt is monotonic — set at most once, spec §3).
    pub fn retire(&self, now: u64) -> bool {
        let mut guard = self.retired_at.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return false;
        }
        *guard = Some(now);
        true
    }

    pub fn retired_at(&self) -> Option<u64> {
        *self.retired_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn total_leases(&self) -> u64 {
        let active = self.active_leases.lock().unwrap_or_else(|e| e.into_inner()).len() as u64;
        let past = *self.past_lease_count.lock().unwrap_or_else(|e| e.into_inner());
        active + past
    }

    pub fn active_lease_count(&self) -> usize {
        self.active_leases.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// The public view of a granted lease, handed back by `acquire` and passed
/// by value to `onAcquire`/`onRelease` hooks.
#[derive(Clone)]
pub struct ExternalLease<R> {
    pub id: LeaseId,
    pub resource_id: ResourceId,
    pub resource: Arc<R>,
}

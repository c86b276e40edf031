//! `ConcurrentResourcePool`: the multi-lease resource pool engine (spec
//! §4.3).
//!
//! Grounded on the teacher's `ConnectionPoolManager`
//! (`middleware/connection_pool.rs`): a bounded set of records guarded by a
//! single lock, a waiter queue for callers that arrive when the set is
//! full, and one "reconcile everything" step run after every mutation. The
//! teacher also runs that step on a `tokio::spawn`ed interval
//! (`cleanup_task`); this pool instead runs it synchronously inline with
//! every `acquire`/`release`/`retire`/`drain` call plus an explicit
//! `tick()` escape hatch for wall-clock-only retirement (spec §4.3, §9
//! "Single revalidate step" — a background sweep would double-fire
//! alongside the mutation-triggered pass).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::future_ext::{TimeoutOptions, TimeoutOutcome, with_timeout};
use crate::ids::{LeaseId, ResourceId};

use super::config::PoolConfig;
use super::record::{ExternalLease, ResourceRecord, Settleable};

fn flatten_outcome(outcome: TimeoutOutcome<PoolError>) -> PoolError {
    match outcome {
        TimeoutOutcome::Timeout(e) => e.into(),
        TimeoutOutcome::Abort(e) => e.into(),
        TimeoutOutcome::Source(e) => e,
    }
}

/// The result of reserving a lease slot: the record it was granted
/// against, the lease id, and whether that record is brand new and still
/// needs its `create()` call spawned.
struct Allocation<R> {
    record: Arc<ResourceRecord<R, PoolError>>,
    lease_id: LeaseId,
}

impl<R> Clone for Allocation<R> {
    fn clone(&self) -> Self {
        Self { record: self.record.clone(), lease_id: self.lease_id }
    }
}

/// An acquire call parked because no resource had spare capacity and the
/// pool was already at `maxResources`. `revalidate` settles `settle`
/// directly with an already-granted [`Allocation`] once capacity frees up —
/// rather than just waking the caller to retry — since a generic wake
/// would let several woken waiters race each other for the same slot.
struct Waiter<R> {
    settle: Arc<Settleable<Result<Allocation<R>, PoolError>>>,
}

struct PoolInner<R> {
    records: Vec<Arc<ResourceRecord<R, PoolError>>>,
    leases: std::collections::HashMap<LeaseId, ResourceId>,
    waiters: VecDeque<Waiter<R>>,
    drained: bool,
}

struct Shared<R> {
    config: PoolConfig<R>,
    inner: Mutex<PoolInner<R>>,
}

fn push_new_record<R>(inner: &mut PoolInner<R>, now: u64) -> Arc<ResourceRecord<R, PoolError>> {
    let record = Arc::new(ResourceRecord::new(ResourceId::new(), now));
    inner.records.push(record.clone());
    record
}

fn grant_lease<R>(inner: &mut PoolInner<R>, record: &Arc<ResourceRecord<R, PoolError>>, now: u64) -> LeaseId {
    let id = LeaseId::new();
    record.active_leases.lock().unwrap_or_else(|e| e.into_inner()).push(super::record::LeaseEntry { id, leased_at: now });
    inner.leases.insert(id, record.id);
    id
}

fn under_max<R>(inner: &PoolInner<R>, config: &PoolConfig<R>) -> bool {
    config.max_resources.map_or(true, |max| inner.records.len() < max)
}

fn find_reusable<'a, R>(inner: &'a PoolInner<R>, config: &PoolConfig<R>) -> Option<&'a Arc<ResourceRecord<R, PoolError>>> {
    inner.records.iter().find(|r| !r.is_retired() && r.active_lease_count() < config.max_concurrent_leases_per_resource)
}

/// Reserves a lease slot without awaiting anything: LAZY prefers an
/// existing record with room, EAGER prefers creating a new one up to
/// `maxResources` (spec §4.3's allocation-method table). Returns whether
/// the record is brand new alongside the allocation, since a fresh record
/// still needs its `create()` spawned by the caller.
fn allocate_sync<R>(inner: &mut PoolInner<R>, config: &PoolConfig<R>, now: u64) -> Option<(Allocation<R>, bool)> {
    use super::config::AllocationMethod;
    match config.allocation_method {
        AllocationMethod::Lazy => {
            if let Some(record) = find_reusable(inner, config) {
                let record = record.clone();
                let lease_id = grant_lease(inner, &record, now);
                return Some((Allocation { record, lease_id }, false));
            }
            if under_max(inner, config) {
                let record = push_new_record(inner, now);
                let lease_id = grant_lease(inner, &record, now);
                return Some((Allocation { record, lease_id }, true));
            }
            None
        }
        AllocationMethod::Eager => {
            if under_max(inner, config) {
                let record = push_new_record(inner, now);
                let lease_id = grant_lease(inner, &record, now);
                return Some((Allocation { record, lease_id }, true));
            }
            if let Some(record) = find_reusable(inner, config) {
                let record = record.clone();
                let lease_id = grant_lease(inner, &record, now);
                return Some((Allocation { record, lease_id }, false));
            }
            None
        }
    }
}

/// Free capacity, in lease slots, across every non-retired record plus
/// however many fresh records `maxResources` still permits.
fn compute_capacity<R>(inner: &PoolInner<R>, config: &PoolConfig<R>) -> usize {
    let per_resource: usize = inner
        .records
        .iter()
        .filter(|r| !r.is_retired())
        .map(|r| config.max_concurrent_leases_per_resource.saturating_sub(r.active_lease_count()))
        .sum();
    let headroom = match config.max_resources {
        Some(max) => max.saturating_sub(inner.records.len()).saturating_mul(config.max_concurrent_leases_per_resource),
        None => usize::MAX - per_resource,
    };
    per_resource.saturating_add(headroom)
}

impl<R> Shared<R>
where
    R: Send + Sync + 'static,
{
    /// The single reconciliation step (spec §4.3): auto-retire, begin
    /// destruction of retired records with nothing left leasing them,
    /// top the floor back up to `minResources`, then allocate-and-settle
    /// as many parked waiters as freed capacity allows.
    fn revalidate(self: &Arc<Self>) {
        let now = self.config.clock.now_ms();
        let mut to_destroy = Vec::new();
        let mut to_create = Vec::new();
        let mut to_wake: Vec<(Waiter<R>, Allocation<R>)> = Vec::new();

        {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if guard.drained {
                return;
            }

            for record in guard.records.iter() {
                if record.is_retired() {
                    continue;
                }
                let expired_by_uses = self.config.retire_resource_after_uses.is_some_and(|n| record.total_leases() >= n);
                let expired_by_age = self
                    .config
                    .retire_resource_after_seconds
                    .is_some_and(|s| now.saturating_sub(record.created_at) >= s.saturating_mul(1000));
                if (expired_by_uses || expired_by_age) && record.retire(now) {
                    debug!(resource_id = %record.id, "resource auto-retired");
                }
            }

            for record in guard.records.iter() {
                if !record.is_retired() {
                    continue;
                }
                let mut destroying = record.destroying.lock().unwrap_or_else(|e| e.into_inner());
                if *destroying {
                    continue;
                }
                let no_active_leases = record.active_lease_count() == 0;
                let forced = self
                    .config
                    .destroy_retired_resource_forcibly_after_seconds
                    .is_some_and(|s| record.retired_at().is_some_and(|r| now.saturating_sub(r) >= s.saturating_mul(1000)));
                if no_active_leases || forced {
                    *destroying = true;
                    to_destroy.push(record.clone());
                }
            }
            if !to_destroy.is_empty() {
                // A forced destroy can fire with active leases still
                // outstanding; those leases' entries are purged here so they
                // don't linger in `getDiagnostics` forever. A later
                // release/retire against one of them comes back
                // `UnknownLease` rather than silently skipping the destroy
                // wait.
                let destroyed_ids: Vec<ResourceId> = to_destroy.iter().map(|r| r.id).collect();
                guard.leases.retain(|_, resource_id| !destroyed_ids.contains(resource_id));
                guard.records.retain(|r| !to_destroy.iter().any(|d| Arc::ptr_eq(d, r)));
            }

            while guard.records.len() < self.config.min_resources {
                let record = push_new_record(&mut guard, now);
                to_create.push(record);
            }

            let mut remaining = compute_capacity(&guard, &self.config);
            while remaining > 0 {
                let Some(waiter) = guard.waiters.pop_front() else { break };
                match allocate_sync(&mut guard, &self.config, now) {
                    Some((alloc, needs_create)) => {
                        if needs_create {
                            to_create.push(alloc.record.clone());
                        }
                        to_wake.push((waiter, alloc));
                        remaining -= 1;
                    }
                    None => {
                        guard.waiters.push_front(waiter);
                        break;
                    }
                }
            }
        }

        for record in to_destroy {
            warn!(resource_id = %record.id, "destroying retired resource");
            self.clone().spawn_destroy(record);
        }
        for record in to_create {
            self.clone().spawn_create(record);
        }
        for (waiter, alloc) in to_wake {
            waiter.settle.settle(Ok(alloc));
        }
    }

    /// Rolls back a reserved-but-never-handed-out lease (spec §4.3 step 6:
    /// "on any failure within this procedure, release the lease if one was
    /// reserved, then rethrow"). Internal bookkeeping only — `onRelease`
    /// never runs for a lease the caller never actually received.
    fn rollback_lease(self: &Arc<Self>, record: &Arc<ResourceRecord<R, PoolError>>, lease_id: LeaseId) {
        {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.leases.remove(&lease_id);
            let mut active = record.active_leases.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(pos) = active.iter().position(|l| l.id == lease_id) {
                active.remove(pos);
            }
        }
        self.revalidate();
    }

    /// Removes a still-parked waiter from the queue, for a caller whose
    /// own acquire was abandoned (its future dropped by a racing
    /// `withTimeout`) before `revalidate` ever reached it. A no-op if the
    /// waiter was already popped.
    fn forget_waiter(self: &Arc<Self>, settle: &Arc<Settleable<Result<Allocation<R>, PoolError>>>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.waiters.retain(|w| !Arc::ptr_eq(&w.settle, settle));
    }

    /// Runs `create()` off the lock, settling `record.resource` with
    /// whatever it produces. A create rejection retires the record
    /// immediately so revalidate's destroy step reclaims it instead of
    /// leaving a permanently-broken slot counted against capacity (spec
    /// §4.3: "A `create` rejection triggers immediate destruction-
    /// bookkeeping for the record, so waiters aren't starved").
    fn spawn_create(self: Arc<Self>, record: Arc<ResourceRecord<R, PoolError>>) {
        let config = self.config.clone();
        tokio::spawn(async move {
            let destroy_fn = config.destroy.clone();
            let opts = match config.create_timeout_ms {
                Some(ms) => TimeoutOptions::new(Duration::from_millis(ms)).with_late_resolve_cleanup(move |resource: R| {
                    tokio::spawn((destroy_fn)(Arc::new(resource)));
                }),
                None => TimeoutOptions::default(),
            };
            match with_timeout((config.create)(), opts).await {
                Ok(resource) => {
                    info!(resource_id = %record.id, "resource created");
                    record.resource.settle(Ok(Arc::new(resource)));
                }
                Err(outcome) => {
                    let err = flatten_outcome(outcome);
                    warn!(resource_id = %record.id, %err, "resource creation failed");
                    record.resource.settle(Err(err));
                    record.retire(config.clock.now_ms());
                    self.revalidate();
                }
            }
        });
    }

    /// Runs `destroy()` on an already-retired, already-removed-from-`records`
    /// record, settling `destroyRef`. A record whose `create()` never
    /// succeeded has nothing to tear down; its stored creation error is
    /// forwarded as the destroy outcome instead.
    fn spawn_destroy(self: Arc<Self>, record: Arc<ResourceRecord<R, PoolError>>) {
        let config = self.config.clone();
        tokio::spawn(async move {
            match record.resource.get().await {
                Ok(resource) => {
                    let opts = match config.destroy_timeout_ms {
                        Some(ms) => TimeoutOptions::new(Duration::from_millis(ms)),
                        None => TimeoutOptions::default(),
                    };
                    let result = with_timeout((config.destroy)(resource), opts).await.map_err(flatten_outcome);
                    if let Err(err) = &result {
                        warn!(resource_id = %record.id, %err, "destroy() failed");
                    } else {
                        info!(resource_id = %record.id, "resource destroyed");
                    }
                    record.destroy_ref.settle(result);
                }
                Err(create_err) => {
                    record.destroy_ref.settle(Err(create_err));
                }
            }
        });
    }
}

/// RAII companion to a parked waiter: if the future awaiting `settle` is
/// dropped (the caller's own `acquire` timeout lost the race against
/// `revalidate`, or the outer `withTimeout` simply abandoned it) before it
/// ever read the result, this rolls back whatever `revalidate` already
/// granted rather than leaking a lease nobody will ever release.
struct WaiterGuard<R: Send + Sync + 'static> {
    shared: Arc<Shared<R>>,
    settle: Arc<Settleable<Result<Allocation<R>, PoolError>>>,
    armed: bool,
}

impl<R: Send + Sync + 'static> Drop for WaiterGuard<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.settle.peek() {
            Some(Ok(alloc)) => self.shared.rollback_lease(&alloc.record, alloc.lease_id),
            Some(Err(_)) => {}
            None => self.shared.forget_waiter(&self.settle),
        }
    }
}

/// RAII companion to an already-granted [`Allocation`], covering the gap
/// between reservation (either the `Ready` or the woken-`Parked` half of
/// `acquire_body`) and the lease actually being handed back to the caller.
/// If the surrounding `withTimeout` race drops this future while it's
/// suspended awaiting `resourceRef` or `onAcquire`, this rolls the
/// reservation back the same way [`WaiterGuard`] does for a still-parked
/// waiter (spec §4.3 step 6).
struct AllocationGuard<R: Send + Sync + 'static> {
    shared: Arc<Shared<R>>,
    alloc: Allocation<R>,
    armed: bool,
}

impl<R: Send + Sync + 'static> Drop for AllocationGuard<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.shared.rollback_lease(&self.alloc.record, self.alloc.lease_id);
    }
}

async fn acquire_body<R>(shared: Arc<Shared<R>>) -> Result<ExternalLease<R>, PoolError>
where
    R: Send + Sync + 'static,
{
    shared.revalidate();
    let now = shared.config.clock.now_ms();

    enum Outcome<R> {
        Ready(Allocation<R>, bool),
        Parked(Arc<Settleable<Result<Allocation<R>, PoolError>>>),
    }

    let outcome = {
        let mut guard = shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.drained {
            return Err(PoolError::Drained);
        }
        match allocate_sync(&mut guard, &shared.config, now) {
            Some((alloc, needs_create)) => Outcome::Ready(alloc, needs_create),
            None => {
                if let Some(max) = shared.config.max_queued_acquire_requests {
                    if guard.waiters.len() >= max {
                        return Err(PoolError::AcquireQueueFull { max });
                    }
                }
                let settle = Arc::new(Settleable::new());
                guard.waiters.push_back(Waiter { settle: settle.clone() });
                Outcome::Parked(settle)
            }
        }
    };

    let alloc = match outcome {
        Outcome::Ready(alloc, needs_create) => {
            if needs_create {
                shared.clone().spawn_create(alloc.record.clone());
            }
            alloc
        }
        Outcome::Parked(settle) => {
            let mut guard = WaiterGuard { shared: shared.clone(), settle: settle.clone(), armed: true };
            let result = settle.get().await;
            guard.armed = false;
            result?
        }
    };

    let mut alloc_guard = AllocationGuard { shared: shared.clone(), alloc: alloc.clone(), armed: true };

    let resource = alloc.record.resource.get().await?;
    let lease = ExternalLease { id: alloc.lease_id, resource_id: alloc.record.id, resource };
    (shared.config.on_acquire)(lease.clone()).await?;

    alloc_guard.armed = false;
    Ok(lease)
}

/// The bookkeeping-plus-hooks half of `release`, raced against the
/// caller's release timeout. The lease's removal from `activeLeases`
/// happens synchronously in [`ConcurrentResourcePool::release_with_timeout`]
/// before this is even spawned, so "timeouts still release the lease"
/// (spec §4.3) holds regardless of how this future settles.
async fn release_hooks_body<R>(shared: Arc<Shared<R>>, lease: ExternalLease<R>, record: Option<Arc<ResourceRecord<R, PoolError>>>) -> Result<(), PoolError>
where
    R: Send + Sync + 'static,
{
    let hook_result = (shared.config.on_release)(lease).await;
    let mut first_error = match hook_result {
        Err(e) if !shared.config.silence_release_errors => Some(e),
        _ => None,
    };

    if let Some(record) = record {
        if *record.destroying.lock().unwrap_or_else(|e| e.into_inner()) {
            if let Err(e) = record.destroy_ref.get().await {
                if first_error.is_none() && !shared.config.silence_release_errors {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Diagnostic snapshot of a single resource record (spec §4.3
/// `getDiagnostics`).
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub created_at: u64,
    pub retired_at: Option<u64>,
}

/// Diagnostic snapshot of a single outstanding lease.
#[derive(Debug, Clone, Copy)]
pub struct LeaseSnapshot {
    pub id: LeaseId,
    pub resource_id: ResourceId,
}

/// Point-in-time snapshot returned by [`ConcurrentResourcePool::get_diagnostics`].
#[derive(Debug, Clone)]
pub struct PoolDiagnostics {
    pub resources: Vec<ResourceSnapshot>,
    pub leases: Vec<LeaseSnapshot>,
}

/// Concurrent resource pool with multi-lease-per-resource semantics,
/// LAZY/EAGER allocation, lifecycle retirement, and back-pressured
/// acquisition (spec §4.3).
pub struct ConcurrentResourcePool<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for ConcurrentResourcePool<R> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<R> ConcurrentResourcePool<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(config: PoolConfig<R>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(PoolInner {
                    records: Vec::new(),
                    leases: std::collections::HashMap::new(),
                    waiters: VecDeque::new(),
                    drained: false,
                }),
            }),
        }
    }

    /// Tops the pool up to `minResources` and awaits every pending
    /// `create()` call, so a successful return means the floor is fully
    /// populated and usable.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        {
            let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            if guard.drained {
                return Err(PoolError::Drained);
            }
        }
        self.shared.revalidate();
        let records = {
            let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.records.clone()
        };
        for record in records {
            record.resource.get().await?;
        }
        Ok(())
    }

    pub async fn acquire(&self) -> Result<ExternalLease<R>, PoolError> {
        self.acquire_with_timeout(self.shared.config.default_acquire_timeout_ms).await
    }

    pub async fn acquire_with_timeout(&self, timeout_ms: Option<u64>) -> Result<ExternalLease<R>, PoolError> {
        let opts = match timeout_ms {
            Some(ms) => TimeoutOptions::new(Duration::from_millis(ms)),
            None => TimeoutOptions::default(),
        };
        with_timeout(acquire_body(self.shared.clone()), opts).await.map_err(flatten_outcome)
    }

    pub async fn release(&self, lease: ExternalLease<R>) -> Result<(), PoolError> {
        self.release_with_timeout(lease, self.shared.config.default_release_timeout_ms).await
    }

    /// Drops `lease` from its record's `activeLeases` synchronously, then
    /// races the `onRelease` hook (and, if the record is destroying, the
    /// destroy outcome) against `timeoutMs`.
    pub async fn release_with_timeout(&self, lease: ExternalLease<R>, timeout_ms: Option<u64>) -> Result<(), PoolError> {
        let record = {
            let mut guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(resource_id) = guard.leases.remove(&lease.id) else {
                return Err(PoolError::UnknownLease(lease.id.0));
            };
            guard.records.iter().find(|r| r.id == resource_id).cloned()
        };
        if let Some(record) = &record {
            let mut active = record.active_leases.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(pos) = active.iter().position(|l| l.id == lease.id) {
                active.remove(pos);
                *record.past_lease_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
            }
        }
        self.shared.revalidate();

        let opts = match timeout_ms {
            Some(ms) => TimeoutOptions::new(Duration::from_millis(ms)),
            None => TimeoutOptions::default(),
        };
        with_timeout(release_hooks_body(self.shared.clone(), lease, record), opts).await.map_err(flatten_outcome)
    }

    /// Marks `lease`'s record retired, revalidates (which may begin
    /// destroying it immediately if this was its last active lease), then
    /// releases the lease as normal.
    pub async fn retire(&self, lease: ExternalLease<R>) -> Result<(), PoolError> {
        let record = {
            let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.records.iter().find(|r| r.id == lease.resource_id).cloned()
        };
        if let Some(record) = record {
            record.retire(self.shared.config.clock.now_ms());
        }
        self.shared.revalidate();
        self.release(lease).await
    }

    /// Marks the pool drained, rejects every parked waiter, destroys every
    /// remaining record regardless of its active-lease count, and awaits
    /// every `destroyRef`.
    pub async fn drain(&self) {
        let (records, waiters) = {
            let mut guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            if guard.drained {
                return;
            }
            guard.drained = true;
            info!("pool draining");
            (guard.records.drain(..).collect::<Vec<_>>(), guard.waiters.drain(..).collect::<Vec<_>>())
        };
        for waiter in waiters {
            waiter.settle.settle(Err(PoolError::Drained));
        }
        let now = self.shared.config.clock.now_ms();
        for record in &records {
            record.retire(now);
            *record.destroying.lock().unwrap_or_else(|e| e.into_inner()) = true;
            self.shared.clone().spawn_destroy(record.clone());
        }
        for record in records {
            let _ = record.destroy_ref.get().await;
        }
        info!("pool drained");
    }

    /// Caller-driven wall-clock reconciliation, exposed for hosts that
    /// want age/forcible-destroy based retirement to progress even while
    /// the pool otherwise sits idle between `acquire`/`release` calls
    /// (spec §4.3, §9: deliberately not a self-spawned background sweep).
    pub fn tick(&self) {
        self.shared.revalidate();
    }

    pub fn get_diagnostics(&self) -> PoolDiagnostics {
        let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        let resources = guard.records.iter().map(|r| ResourceSnapshot { id: r.id, created_at: r.created_at, retired_at: r.retired_at() }).collect();
        let leases = guard.leases.iter().map(|(&id, &resource_id)| LeaseSnapshot { id, resource_id }).collect();
        PoolDiagnostics { resources, leases }
    }

    /// Reconstructs an [`ExternalLease`] from just its id, for
    /// [`super::single_lease::SingleLeasePool`] — which keys its own map by
    /// resource identity rather than holding the full lease value (spec
    /// §4.4).
    pub(crate) fn lookup_lease(&self, lease_id: LeaseId) -> Option<ExternalLease<R>> {
        let guard = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        let resource_id = *guard.leases.get(&lease_id)?;
        let record = guard.records.iter().find(|r| r.id == resource_id)?;
        let resource = record.resource.peek()?.ok()?;
        Some(ExternalLease { id: lease_id, resource_id, resource })
    }
}

//! `wrapToSingleLease` (spec §4.4): a thin adapter over
//! [`ConcurrentResourcePool`] that rejects a second concurrent lease
//! against the same resource.
//!
//! Grounded on the same `middleware/connection_pool.rs` shape as the pool
//! itself, narrowed to a single map instead of the full record set: the
//! teacher's `pools: DashMap<String, ...>` keys sub-pools by name, where
//! here one resource identity can have at most one outstanding lease, so a
//! plain `Mutex`-guarded `HashMap` (matching `TaskQueue`'s own bookkeeping
//! style) is the right amount of concurrency machinery.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::PoolError;
use crate::ids::ResourceId;

use super::pool::{ConcurrentResourcePool, PoolDiagnostics};
use super::record::ExternalLease;

/// Wraps a [`ConcurrentResourcePool`] so callers address leases by
/// resource identity rather than lease identity, and a resource already
/// on lease cannot be acquired again concurrently.
pub struct SingleLeasePool<R> {
    pool: ConcurrentResourcePool<R>,
    outstanding: Mutex<HashMap<ResourceId, u64>>,
}

impl<R> SingleLeasePool<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(pool: ConcurrentResourcePool<R>) -> Self {
        Self { pool, outstanding: Mutex::new(HashMap::new()) }
    }

    pub async fn initialize(&self) -> Result<(), PoolError> {
        self.pool.initialize().await
    }

    /// Acquires a lease from the underlying pool; if it happens to resolve
    /// to a resource this wrapper already considers on-lease, the
    /// underlying lease is handed straight back and the call fails with
    /// [`PoolError::AlreadyLeased`].
    pub async fn acquire(&self) -> Result<ExternalLease<R>, PoolError> {
        let lease = self.pool.acquire().await?;
        let mut guard = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        if guard.contains_key(&lease.resource_id) {
            drop(guard);
            let _ = self.pool.release(lease).await;
            return Err(PoolError::AlreadyLeased);
        }
        guard.insert(lease.resource_id, lease.id.0);
        Ok(lease)
    }

    pub async fn release(&self, resource_id: ResourceId) -> Result<(), PoolError> {
        let lease_id = self.take_lease_id(resource_id)?;
        let lease = self.pool.lookup_lease(lease_id).ok_or(PoolError::UnknownLease(lease_id.0))?;
        self.pool.release(lease).await
    }

    pub async fn retire(&self, resource_id: ResourceId) -> Result<(), PoolError> {
        let lease_id = self.take_lease_id(resource_id)?;
        let lease = self.pool.lookup_lease(lease_id).ok_or(PoolError::UnknownLease(lease_id.0))?;
        self.pool.retire(lease).await
    }

    pub async fn drain(&self) {
        self.outstanding.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.pool.drain().await
    }

    pub fn get_diagnostics(&self) -> PoolDiagnostics {
        self.pool.get_diagnostics()
    }

    fn take_lease_id(&self, resource_id: ResourceId) -> Result<crate::ids::LeaseId, PoolError> {
        let raw = self
            .outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resource_id)
            .ok_or(PoolError::UnknownLease(resource_id.0))?;
        Ok(crate::ids::LeaseId(raw))
    }
}

//! Concurrent multi-lease resource pool (spec §4.3): `ConcurrentResourcePool<R>`,
//! plus the `wrapToSingleLease` adapter (spec §4.4).

mod config;
mod pool;
mod record;
mod single_lease;

pub use config::{AllocationMethod, CreateFn, DestroyFn, LeaseHookFn, PoolConfig, PoolFuture};
pub use pool::{ConcurrentResourcePool, LeaseSnapshot, PoolDiagnostics, ResourceSnapshot};
pub use record::ExternalLease;
pub use single_lease::SingleLeasePool;

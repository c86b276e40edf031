//! `PoolConfig` (spec §4.3): typed effects plus the tunables governing
//! allocation, retirement, and back-pressure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::clock::{self, SharedClock};
use crate::error::PoolError;

use super::record::ExternalLease;

pub type PoolFuture<T> = Pin<Box<dyn Future<Output = Result<T, PoolError>> + Send>>;
pub type CreateFn<R> = Arc<dyn Fn() -> PoolFuture<R> + Send + Sync>;
pub type DestroyFn<R> = Arc<dyn Fn(Arc<R>) -> PoolFuture<()> + Send + Sync>;
pub type LeaseHookFn<R> = Arc<dyn Fn(ExternalLease<R>) -> PoolFuture<()> + Send + Sync>;

/// `LAZY` reuses before creating; `EAGER` creates (up to `maxResources`)
/// before reusing. Tie-break within a strategy is insertion order (spec
/// §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMethod {
    #[default]
    Lazy,
    Eager,
}

/// Constructor configuration (spec §4.3's option table).
#[derive(Clone)]
pub struct PoolConfig<R> {
    pub create: CreateFn<R>,
    pub destroy: DestroyFn<R>,
    pub on_acquire: LeaseHookFn<R>,
    pub on_release: LeaseHookFn<R>,
    pub allocation_method: AllocationMethod,
    pub max_concurrent_leases_per_resource: usize,
    pub min_resources: usize,
    pub max_resources: Option<usize>,
    pub max_queued_acquire_requests: Option<usize>,
    pub retire_resource_after_uses: Option<u64>,
    pub retire_resource_after_seconds: Option<u64>,
    pub destroy_retired_resource_forcibly_after_seconds: Option<u64>,
    pub create_timeout_ms: Option<u64>,
    pub destroy_timeout_ms: Option<u64>,
    pub default_acquire_timeout_ms: Option<u64>,
    pub default_release_timeout_ms: Option<u64>,
    pub silence_release_errors: bool,
    pub clock: SharedClock,
}

fn no_op_hook<R>() -> LeaseHookFn<R> {
    Arc::new(|_lease| Box::pin(async { Ok(()) }))
}

impl<R> PoolConfig<R>
where
    R: Send + Sync + 'static,
{
    /// `create`/`destroy` have no sensible default (spec: "—"), so they're
    /// required here; every other field takes the spec's documented
    /// default.
    pub fn new(create: CreateFn<R>, destroy: DestroyFn<R>) -> Self {
        Self {
            create,
            destroy,
            on_acquire: no_op_hook(),
            on_release: no_op_hook(),
            allocation_method: AllocationMethod::Lazy,
            max_concurrent_leases_per_resource: 1,
            min_resources: 0,
            max_resources: None,
            max_queued_acquire_requests: None,
            retire_resource_after_uses: None,
            retire_resource_after_seconds: None,
            destroy_retired_resource_forcibly_after_seconds: None,
            create_timeout_ms: None,
            destroy_timeout_ms: None,
            default_acquire_timeout_ms: None,
            default_release_timeout_ms: None,
            silence_release_errors: false,
            clock: clock::system_clock(),
        }
    }

    pub fn with_on_acquire(mut self, hook: LeaseHookFn<R>) -> Self {
        self.on_acquire = hook;
        self
    }

    pub fn with_on_release(mut self, hook: LeaseHookFn<R>) -> Self {
        self.on_release = hook;
        self
    }

    pub fn with_allocation_method(mut self, method: AllocationMethod) -> Self {
        self.allocation_method = method;
        self
    }

    pub fn with_max_concurrent_leases_per_resource(mut self, n: usize) -> Self {
        self.max_concurrent_leases_per_resource = n;
        self
    }

    pub fn with_min_resources(mut self, n: usize) -> Self {
        self.min_resources = n;
        self
    }

    pub fn with_max_resources(mut self, n: usize) -> Self {
        self.max_resources = Some(n);
        self
    }

    pub fn with_max_queued_acquire_requests(mut self, n: usize) -> Self {
        self.max_queued_acquire_requests = Some(n);
        self
    }

    pub fn with_retire_resource_after_uses(mut self, n: u64) -> Self {
        self.retire_resource_after_uses = Some(n);
        self
    }

    pub fn with_retire_resource_after_seconds(mut self, n: u64) -> Self {
        self.retire_resource_after_seconds = Some(n);
        self
    }

    pub fn with_destroy_retired_resource_forcibly_after_seconds(mut self, n: u64) -> Self {
        self.destroy_retired_resource_forcibly_after_seconds = Some(n);
        self
    }

    pub fn with_create_timeout_ms(mut self, ms: u64) -> Self {
        self.create_timeout_ms = Some(ms);
        self
    }

    pub fn with_destroy_timeout_ms(mut self, ms: u64) -> Self {
        self.destroy_timeout_ms = Some(ms);
        self
    }

    pub fn with_default_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.default_acquire_timeout_ms = Some(ms);
        self
    }

    pub fn with_default_release_timeout_ms(mut self, ms: u64) -> Self {
        self.default_release_timeout_ms = Some(ms);
        self
    }

    pub fn with_silence_release_errors(mut self, silence: bool) -> Self {
        self.silence_release_errors = silence;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

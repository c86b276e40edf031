//! Injectable wall-clock collaborator (spec §6: "Clock: now() → ms").
//!
//! The teacher stamps everything with `std::time::Instant` directly
//! (`TaskMetrics::created_at`, `PooledConnection::created_at`); this crate
//! needs the clock to be swappable for deterministic tests (§8's
//! `retireResourceAfterSeconds` / per-task timeout scenarios), so it is
//! pulled out behind a trait the way the rest of the config surface is
//! injected (`TaskQueueConfig`, `PoolConfig`).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of monotonically-nondecreasing-in-practice millisecond
/// timestamps, used to stamp `queuedAt`/`completedAt`/`createdAt`/
/// `retiredAt`.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Default wall-clock implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Test double: a clock whose value only changes when `advance` is called.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    millis: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self { millis: Arc::new(AtomicU64::new(start_ms)) }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Shared handle to a clock, the form config structs hold it in.
pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_only_when_told() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(0);
        assert_eq!(clock.now_ms(), 0);
    }
}

//! A minimal observer primitive backing the queue's `"error"` event and
//! each task's `"progress"` channel (spec §4.2, §6, §9 "Event emitters").
//!
//! Grounded on `events/dispatcher.rs`'s `subscribe`/`unsubscribe`/`dispatch`
//! shape, simplified: the dispatcher there routes by `TypeId` because one
//! dispatcher serves many event types; here each `Emitter<T>` instance
//! already carries exactly one payload type, so the `TypeId`-keyed outer
//! map collapses to a plain `HandlerId`-keyed inner map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Identifies a registered listener so it can later be removed with `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

fn next_handler_id() -> HandlerId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A single-event-type publish/subscribe channel. `T` is cloned into each
/// listener, matching the "every listener sees every event" pub/sub
/// contract spec §6 describes for `on/off/emit`.
pub struct Emitter<T> {
    listeners: RwLock<HashMap<HandlerId, Arc<dyn Fn(&T) + Send + Sync>>>,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self { listeners: RwLock::new(HashMap::new()) }
    }
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning an id usable with [`Emitter::off`].
    pub fn on(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        let id = next_handler_id();
        self.listeners.write().unwrap_or_else(|e| e.into_inner()).insert(id, Arc::new(listener));
        id
    }

    /// Remove a previously registered listener. Returns `true` if it was
    /// present.
    pub fn off(&self, id: HandlerId) -> bool {
        self.listeners.write().unwrap_or_else(|e| e.into_inner()).remove(&id).is_some()
    }

    /// Synchronously invoke every registered listener with `value`.
    pub fn emit(&self, value: &T) {
        let listeners: Vec<_> = self.listeners.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect();
        for listener in listeners {
            listener(value);
        }
    }

    /// Detach every listener — used on diagnostic GC eviction so evicted
    /// `TaskRef`s don't keep their progress listeners alive (spec §9
    /// "Memory control").
    pub fn clear(&self) {
        self.listeners.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// The recommended default progress payload shape (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProgressUpdate {
    pub completed_items: u64,
    pub total_items: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emit_reaches_every_listener() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        emitter.on(move |v| s1.lock().unwrap().push(*v));
        let s2 = seen.clone();
        emitter.on(move |v| s2.lock().unwrap().push(*v * 10));

        emitter.emit(&5);
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![5, 50]);
    }

    #[test]
    fn off_stops_delivery() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s1 = seen.clone();
        let id = emitter.on(move |v| s1.lock().unwrap().push(*v));

        assert!(emitter.off(id));
        emitter.emit(&1);
        assert!(seen.lock().unwrap().is_empty());
        assert!(!emitter.off(id));
    }

    #[test]
    fn clear_detaches_all_listeners() {
        let emitter: Emitter<u32> = Emitter::new();
        emitter.on(|_| {});
        emitter.on(|_| {});
        assert_eq!(emitter.listener_count(), 2);
        emitter.clear();
        assert_eq!(emitter.listener_count(), 0);
    }
}

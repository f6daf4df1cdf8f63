//! C3 — write gate: a process-wide registry of exclusive per-`(thing, shadow)`
//! locks. Design Note 9 calls this "a map of per-key mutexes; a simple
//! striped-lock implementation is acceptable" — raw locks avoid the
//! self-referential-struct problem a `MutexGuard` would otherwise create here.

use std::collections::HashMap;
use std::sync::Arc;

use lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};

use crate::ids::ShadowKey;

/// Exclusive lock registry over shadow keys. Locks are created lazily and
/// retained for the process lifetime — cheap, since a device manages a
/// bounded number of shadows.
#[derive(Default)]
pub struct WriteGate {
    locks: Mutex<HashMap<ShadowKey, Arc<RawMutex>>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, thing: &str, shadow: &str) -> Arc<RawMutex> {
        let key = crate::ids::key(thing, shadow);
        self.locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(RawMutex::INIT))
            .clone()
    }

    /// Acquire the exclusive lock for `(thing, shadow)`, blocking the caller.
    /// Released automatically when the returned guard drops. §5 forbids
    /// holding this across any suspension point (I/O, network, queue waits).
    pub fn acquire(&self, thing: &str, shadow: &str) -> ShadowLock {
        let raw = self.lock_for(thing, shadow);
        raw.lock();
        ShadowLock { raw }
    }
}

/// RAII guard releasing the shadow's write-gate lock on drop.
pub struct ShadowLock {
    raw: Arc<RawMutex>,
}

impl Drop for ShadowLock {
    fn drop(&mut self) {
        // Safe: `raw` was locked by `WriteGate::acquire` immediately before
        // this guard was constructed, and only this guard unlocks it.
        unsafe { self.raw.unlock() };
    }
}

//! C5 — the request queue: a bounded, blocking, merge-deduplicating queue of
//! sync requests keyed by `(thing, shadow)` (§4.5). Design Note 9: "a single
//! mutex + two condition variables (not-full, not-empty) guarding an
//! insertion-ordered map; the keyed merge is atomic with the enqueue."

pub mod merge;
pub mod request;

pub use request::SyncRequest;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::Direction;
use crate::ids::ShadowKey;

/// Default queue capacity (§4.5).
pub const DEFAULT_CAPACITY: usize = 1024;

struct Inner {
    order: VecDeque<ShadowKey>,
    entries: HashMap<ShadowKey, SyncRequest>,
    capacity: usize,
}

impl Inner {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The bounded blocking merge-deduplicating queue.
pub struct RequestQueue {
    state: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(Inner {
                order: VecDeque::new(),
                entries: HashMap::new(),
                capacity,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Insert or merge `req`, blocking while at capacity and the key is new.
    pub fn put(&self, req: SyncRequest, direction: Direction) {
        let mut guard = self.state.lock();
        loop {
            if guard.entries.contains_key(req.key()) || guard.len() < guard.capacity {
                self.insert_locked(&mut guard, req, direction);
                self.not_empty.notify_one();
                return;
            }
            self.not_full.wait(&mut guard);
        }
    }

    /// Non-blocking `put`; returns `false` if at capacity and the key is new.
    pub fn offer(&self, req: SyncRequest, direction: Direction) -> bool {
        let mut guard = self.state.lock();
        if !guard.entries.contains_key(req.key()) && guard.len() >= guard.capacity {
            return false;
        }
        self.insert_locked(&mut guard, req, direction);
        self.not_empty.notify_one();
        true
    }

    /// Bounded-wait `put`.
    pub fn offer_timeout(&self, req: SyncRequest, direction: Direction, timeout: Duration) -> bool {
        let mut guard = self.state.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if guard.entries.contains_key(req.key()) || guard.len() < guard.capacity {
                self.insert_locked(&mut guard, req, direction);
                self.not_empty.notify_one();
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.not_full.wait_for(&mut guard, deadline - now);
        }
    }

    fn insert_locked(&self, guard: &mut Inner, req: SyncRequest, direction: Direction) {
        let key = req.key().clone();
        match guard.entries.remove(&key) {
            Some(existing) => {
                debug!(thing = %key.0, shadow = %key.1, old = existing.kind(), new = req.kind(), "merging queued sync request");
                let merged = merge::merge(existing, req, direction);
                guard.entries.insert(key, merged);
            }
            None => {
                debug!(thing = %key.0, shadow = %key.1, kind = req.kind(), "enqueuing sync request");
                guard.order.push_back(key.clone());
                guard.entries.insert(key, req);
            }
        }
    }

    /// Blocking FIFO removal by insertion order of keys.
    pub fn take(&self) -> SyncRequest {
        let mut guard = self.state.lock();
        loop {
            if let Some(req) = self.pop_locked(&mut guard) {
                self.not_full.notify_one();
                return req;
            }
            self.not_empty.wait(&mut guard);
        }
    }

    /// Non-blocking FIFO removal.
    pub fn poll(&self) -> Option<SyncRequest> {
        let mut guard = self.state.lock();
        let req = self.pop_locked(&mut guard);
        if req.is_some() {
            self.not_full.notify_one();
        }
        req
    }

    /// Bounded-wait FIFO removal.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<SyncRequest> {
        let mut guard = self.state.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(req) = self.pop_locked(&mut guard) {
                self.not_full.notify_one();
                return Some(req);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.not_empty.wait_for(&mut guard, deadline - now);
        }
    }

    fn pop_locked(&self, guard: &mut Inner) -> Option<SyncRequest> {
        let key = guard.order.pop_front()?;
        guard.entries.remove(&key)
    }

    /// Atomically take the current head (if any) and offer `req` back in.
    /// Used by the executor to return a failed request for retry without a
    /// window where the key is briefly absent. `is_new` controls merge
    /// ordering when `req`'s key collides with the new head: `true` treats
    /// `req` as the newer arrival, `false` as the older one.
    pub fn offer_and_take(&self, req: SyncRequest, is_new: bool, direction: Direction) -> SyncRequest {
        let mut guard = self.state.lock();
        let head = self.pop_locked(&mut guard);

        match head {
            None => {
                // Nothing queued: hand `req` straight back without re-entering the queue.
                req
            }
            Some(head_req) => {
                if head_req.key() == req.key() {
                    let merged = if is_new {
                        merge::merge(head_req, req, direction)
                    } else {
                        merge::merge(req, head_req, direction)
                    };
                    let key = merged.key().clone();
                    guard.order.push_front(key.clone());
                    guard.entries.insert(key, merged.clone());
                    self.not_empty.notify_one();
                    merged
                } else {
                    // Re-insert the req we displaced, return the original head.
                    self.insert_locked(&mut guard, req, direction);
                    guard.order.push_front(head_req.key().clone());
                    guard.entries.insert(head_req.key().clone(), head_req.clone());
                    self.not_empty.notify_one();
                    head_req
                }
            }
        }
    }

    pub fn remove(&self, key: &ShadowKey) -> Option<SyncRequest> {
        let mut guard = self.state.lock();
        let req = guard.entries.remove(key);
        if req.is_some() {
            guard.order.retain(|k| k != key);
            self.not_full.notify_one();
        }
        req
    }

    pub fn clear(&self) {
        let mut guard = self.state.lock();
        guard.order.clear();
        guard.entries.clear();
        self.not_full.notify_all();
    }

    /// Resize capacity; only succeeds if `n >= current size` (§4.5).
    pub fn update_capacity(&self, n: usize) -> bool {
        let mut guard = self.state.lock();
        if n < guard.len() {
            return false;
        }
        guard.capacity = n;
        self.not_full.notify_all();
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn key(t: &str) -> ShadowKey {
        (t.to_string(), "".to_string())
    }

    fn local_update(t: &str, patch: serde_json::Value) -> SyncRequest {
        SyncRequest::LocalUpdate { key: key(t), patch }
    }

    #[test]
    fn put_then_take_round_trips() {
        let q = RequestQueue::default();
        q.put(local_update("t1", json!({"a": 1})), Direction::Between);
        assert_eq!(q.len(), 1);
        let taken = q.take();
        assert_eq!(taken.key(), &key("t1"));
        assert!(q.is_empty());
    }

    #[test]
    fn colliding_keys_merge_instead_of_growing_the_queue() {
        let q = RequestQueue::default();
        q.put(local_update("t1", json!({"a": 1})), Direction::Between);
        q.put(local_update("t1", json!({"a": 2, "b": 3})), Direction::Between);
        assert_eq!(q.len(), 1);

        let taken = q.take();
        match taken {
            SyncRequest::LocalUpdate { patch, .. } => assert_eq!(patch, json!({"a": 2, "b": 3})),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn update_then_delete_collapses_to_delete_only() {
        let q = RequestQueue::default();
        q.put(local_update("t1", json!({"a": 1})), Direction::Between);
        q.put(SyncRequest::LocalDelete { key: key("t1"), version: 9 }, Direction::Between);
        assert_eq!(q.len(), 1);
        assert_eq!(q.take(), SyncRequest::LocalDelete { key: key("t1"), version: 9 });
    }

    #[test]
    fn fifo_order_is_preserved_by_first_insertion() {
        let q = RequestQueue::default();
        q.put(local_update("a", json!({})), Direction::Between);
        q.put(local_update("b", json!({})), Direction::Between);
        q.put(local_update("a", json!({"x": 1})), Direction::Between); // merges into a's slot, position unchanged

        assert_eq!(q.take().key(), &key("a"));
        assert_eq!(q.take().key(), &key("b"));
    }

    #[test]
    fn capacity_is_respected_for_distinct_keys() {
        let q = RequestQueue::new(1);
        assert!(q.offer(local_update("a", json!({})), Direction::Between));
        assert!(!q.offer(local_update("b", json!({})), Direction::Between));
        // a colliding key still merges even at capacity
        assert!(q.offer(local_update("a", json!({"x": 1})), Direction::Between));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn update_capacity_refuses_to_shrink_below_current_size() {
        let q = RequestQueue::new(4);
        q.put(local_update("a", json!({})), Direction::Between);
        q.put(local_update("b", json!({})), Direction::Between);
        assert!(!q.update_capacity(1));
        assert!(q.update_capacity(2));
    }

    #[test]
    fn offer_and_take_returns_the_passed_request_when_empty() {
        let q = RequestQueue::default();
        let req = local_update("a", json!({"a": 1}));
        let returned = q.offer_and_take(req.clone(), false, Direction::Between);
        assert_eq!(returned, req);
        assert!(q.is_empty());
    }

    #[test]
    fn offer_and_take_merges_on_matching_key() {
        let q = RequestQueue::default();
        q.put(local_update("a", json!({"a": 1})), Direction::Between);
        let retried = local_update("a", json!({"b": 2}));
        // is_new=false: retried is the older request being put back ahead of a newer arrival
        let head = q.offer_and_take(retried, false, Direction::Between);
        match head {
            SyncRequest::LocalUpdate { patch, .. } => assert_eq!(patch, json!({"a": 1, "b": 2})),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn blocking_take_wakes_on_put() {
        let q = Arc::new(RequestQueue::default());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.take());
        thread::sleep(Duration::from_millis(20));
        q.put(local_update("a", json!({})), Direction::Between);
        let req = handle.join().unwrap();
        assert_eq!(req.key(), &key("a"));
    }
}

//! Unordered collections of parked operations.
//!
//! [`WaiterSet`] backs both the reader and writer pools. It supports O(1)
//! push, O(1) pop-last, and O(1) removal by identity by swapping the removed
//! element with the last one in the backing vector — the same trick an
//! arena-of-slots keyed by a small integer handle uses, except here the
//! "arena" is just a `Vec` and the handle is a [`WaiterId`].
//!
//! Iteration order is never guaranteed; it is only used to drain every
//! waiter on close, where order doesn't matter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a waiter independently of its current position in the backing
/// vector. Two waiters are the same only if their ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl WaiterId {
    pub fn new() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WaiterId {
    fn default() -> Self {
        Self::new()
    }
}

/// A value that can sit in a [`WaiterSet`] and be identified by a [`WaiterId`].
pub trait Identified {
    fn waiter_id(&self) -> WaiterId;
}

/// O(1) push / pop-last / remove-by-identity / pick-random collection.
pub struct WaiterSet<W> {
    items: Vec<W>,
    index: HashMap<WaiterId, usize>,
}

impl<W> Default for WaiterSet<W> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<W: Identified> WaiterSet<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, w: W) {
        let id = w.waiter_id();
        let i = self.items.len();
        self.items.push(w);
        self.index.insert(id, i);
    }

    pub fn pop_last(&mut self) -> Option<W> {
        let w = self.items.pop()?;
        self.index.remove(&w.waiter_id());
        Some(w)
    }

    /// Removes and returns the element at `i`, swapping it with the last
    /// element and updating that element's index entry.
    pub fn remove_by_index(&mut self, i: usize) -> Option<W> {
        if i >= self.items.len() {
            return None;
        }
        let removed = self.items.swap_remove(i);
        self.index.remove(&removed.waiter_id());
        if let Some(moved) = self.items.get(i) {
            self.index.insert(moved.waiter_id(), i);
        }
        Some(removed)
    }

    /// Removes the waiter with the given id, if present. No-op otherwise.
    pub fn remove(&mut self, id: WaiterId) -> Option<W> {
        let i = *self.index.get(&id)?;
        self.remove_by_index(i)
    }

    /// Removes and returns a uniformly-chosen waiter. The caller must have
    /// already checked that the set is non-empty.
    pub fn pick_random(&mut self) -> W {
        debug_assert!(!self.items.is_empty(), "pick_random on an empty WaiterSet");
        let i = rand::Rng::gen_range(&mut rand::thread_rng(), 0..self.items.len());
        self.remove_by_index(i).expect("index in bounds")
    }

    /// Drains every waiter, in unspecified order.
    pub fn drain_all(&mut self) -> Vec<W> {
        self.index.clear();
        std::mem::take(&mut self.items)
    }
}

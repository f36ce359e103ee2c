//! Bounded, recency-ordered order cache.
//!
//! Entries live in a slot vector threaded by a doubly linked recency list;
//! a hash index maps order ids to slots. Both structures sit behind a single
//! `RwLock` and always describe the same set of orders. Hit and miss
//! counters are plain atomics outside the lock.

use serde::Serialize;
use shared::Order;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

pub const DEFAULT_CAPACITY: usize = 10;

/// Which operations move an entry to the most-recently-used position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecencyPolicy {
    /// Only `set` promotes; reads leave the order untouched.
    #[default]
    WriteOnly,
    /// Conventional LRU: a hit promotes as well.
    ReadAndWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct OrderCache {
    entries: RwLock<Entries>,
    capacity: usize,
    policy: RecencyPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl OrderCache {
    /// A non-positive `capacity` falls back to [`DEFAULT_CAPACITY`].
    pub fn new(capacity: i64, policy: RecencyPolicy) -> Self {
        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|&c| c > 0)
            .unwrap_or(DEFAULT_CAPACITY);

        Self {
            entries: RwLock::new(Entries::with_capacity(capacity)),
            capacity,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, id: &str) -> Option<Order> {
        let found = match self.policy {
            RecencyPolicy::WriteOnly => {
                let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
                entries.index.get(id).map(|&slot| entries.slots[slot].order.clone())
            }
            RecencyPolicy::ReadAndWrite => {
                let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
                match entries.index.get(id).copied() {
                    Some(slot) => {
                        entries.promote(slot);
                        Some(entries.slots[slot].order.clone())
                    }
                    None => None,
                }
            }
        };

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Inserts or replaces `order` as the most recently used entry, evicting
    /// the least recently used one when the cache is full.
    pub fn set(&self, order: Order) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entries = &mut *guard;

        if let Some(slot) = entries.index.get(&order.order_uid).copied() {
            entries.slots[slot].order = order;
            entries.promote(slot);
            return;
        }

        entries.insert(order);
        if entries.index.len() > self.capacity {
            entries.evict_tail();
        }
    }

    /// Loads orders given newest first so the newest ends up most recent.
    pub fn warm(&self, newest_first: Vec<Order>) {
        for order in newest_first.into_iter().rev() {
            self.set(order);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).index.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> RecencyPolicy {
        self.policy
    }

    /// `(hits, misses)` since construction.
    pub fn counters(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> CacheStats {
        let (hits, misses) = self.counters();
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits,
            misses,
        }
    }
}

struct Slot {
    order: Order,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slots linked from `head` (most recent) to `tail` (least recent).
/// Freed slots are recycled through `free`.
struct Entries {
    index: HashMap<String, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Entries {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity + 1),
            slots: Vec::with_capacity(capacity + 1),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn insert(&mut self, order: Order) {
        let id = order.order_uid.clone();
        let slot = Slot { order, prev: None, next: None };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };

        self.index.insert(id, index);
        self.push_front(index);
    }

    fn promote(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn evict_tail(&mut self) {
        let Some(tail) = self.tail else { return };
        self.unlink(tail);
        self.index.remove(&self.slots[tail].order.order_uid);
        self.free.push(tail);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);

        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }

        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].next = self.head;
        self.slots[slot].prev = None;
        if let Some(old_head) = self.head {
            self.slots[old_head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Ids from most to least recently used.
    #[cfg(test)]
    fn recency_order(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            ids.push(self.slots[slot].order.order_uid.clone());
            cursor = self.slots[slot].next;
        }
        ids
    }
}

#[cfg(test)]
impl OrderCache {
    fn recency_order(&self) -> Vec<String> {
        self.entries.read().unwrap().recency_order()
    }

    /// Index and recency list describe the same ids, and both fit.
    fn assert_consistent(&self) {
        let entries = self.entries.read().unwrap();
        let listed = entries.recency_order();

        assert!(listed.len() <= self.capacity);
        assert_eq!(listed.len(), entries.index.len());
        for id in &listed {
            let slot = entries.index[id];
            assert_eq!(&entries.slots[slot].order.order_uid, id);
        }

        let mut backwards = Vec::new();
        let mut cursor = entries.tail;
        while let Some(slot) = cursor {
            backwards.push(entries.slots[slot].order.order_uid.clone());
            cursor = entries.slots[slot].prev;
        }
        backwards.reverse();
        assert_eq!(backwards, listed);
    }
}

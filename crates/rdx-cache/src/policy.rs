//! Eviction policies and their shared operation set.
//!
//! A policy is a tagged variant rather than a trait object: the set of
//! strategies is closed, every segment owns exactly one instance, and static
//! dispatch keeps the hot paths free of virtual calls. All policy state is
//! mutated only under the segment lock; the lock-free half of the protocol
//! (recording hits) lives in [`crate::buffer`].
//!
//! A policy never touches the segment's table directly. Operations that would
//! evict return the victim entries, and the segment, which already holds the
//! lock, performs the structural removals. Removal feeds back into the policy
//! through `on_entry_remove`, so bookkeeping and unlinking still interleave,
//! but the bucket chains have a single owner.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::lirs::LirsPolicy;

/// Hard cap on the number of hits replayed per drain.
pub(crate) const MAX_BATCH_SIZE: usize = 64;

/// Selects the eviction algorithm for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionStrategy {
    /// Never evict; the table grows by rehashing instead.
    #[default]
    None,
    /// Least-recently-used with batched recency updates.
    Lru,
    /// Low inter-reference recency set (LIRS) with a bounded resident HIR set.
    Lirs,
}

/// Per-segment eviction policy instance.
pub(crate) enum Policy<K, V> {
    None,
    Lru(LruPolicy<K, V>),
    Lirs(LirsPolicy<K, V>),
}

impl<K: Eq, V> Policy<K, V> {
    /// Build the policy for a segment of the given (power of two) capacity.
    pub(crate) fn make(
        strategy: EvictionStrategy,
        capacity: usize,
        load_factor: f64,
    ) -> Policy<K, V> {
        match strategy {
            EvictionStrategy::None => Policy::None,
            EvictionStrategy::Lru => Policy::Lru(LruPolicy::new(
                capacity,
                load_factor,
                capacity * 10,
                load_factor,
            )),
            EvictionStrategy::Lirs => Policy::Lirs(LirsPolicy::new(
                capacity,
                capacity * 10,
                load_factor,
            )),
        }
    }

    pub(crate) fn strategy(&self) -> EvictionStrategy {
        match self {
            Policy::None => EvictionStrategy::None,
            Policy::Lru(_) => EvictionStrategy::Lru,
            Policy::Lirs(_) => EvictionStrategy::Lirs,
        }
    }

    /// Number of buffered hits at which a drain should be attempted
    /// opportunistically (try-lock only).
    pub(crate) fn batch_reached_threshold(&self) -> usize {
        match self {
            Policy::None => usize::MAX,
            Policy::Lru(p) => p.batch_reached,
            Policy::Lirs(p) => p.batch_reached,
        }
    }

    /// Number of buffered hits at which a drain must happen even if that means
    /// blocking on the segment lock.
    pub(crate) fn batch_expired_threshold(&self) -> usize {
        match self {
            Policy::None => usize::MAX,
            Policy::Lru(p) => p.batch_expired,
            Policy::Lirs(p) => p.batch_expired,
        }
    }

    /// A new entry entered the segment. May return victims to evict.
    pub(crate) fn on_entry_miss(&mut self, entry: &Arc<Entry<K, V>>) -> Vec<Arc<Entry<K, V>>> {
        match self {
            Policy::None => Vec::new(),
            Policy::Lru(p) => {
                p.on_entry_miss(entry);
                Vec::new()
            }
            Policy::Lirs(p) => p.on_entry_miss(entry),
        }
    }

    /// An entry was removed from the segment; forget it.
    pub(crate) fn on_entry_remove(&mut self, entry: &Entry<K, V>) {
        match self {
            Policy::None => {}
            Policy::Lru(p) => p.on_entry_remove(entry),
            Policy::Lirs(p) => p.on_entry_remove(entry),
        }
    }

    /// Replay a drained batch of hits and return the victims to evict.
    pub(crate) fn execute(&mut self, drained: Vec<Arc<Entry<K, V>>>) -> Vec<Arc<Entry<K, V>>> {
        match self {
            Policy::None => Vec::new(),
            Policy::Lru(p) => p.execute(drained),
            Policy::Lirs(p) => p.execute(drained),
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Policy::None => {}
            Policy::Lru(p) => p.clear(),
            Policy::Lirs(p) => p.clear(),
        }
    }
}

/// LRU bookkeeping: a recency list trimmed down to `capacity * load_factor`.
///
/// Hits are not applied to the list as they happen; they sit in the access
/// buffer until a drain replays them in arrival order, so after a drain the
/// relative recency of the hit set reflects the buffered order.
pub(crate) struct LruPolicy<K, V> {
    /// Front is most recently used; victims pop off the back.
    list: VecDeque<Arc<Entry<K, V>>>,
    trim_down: usize,
    pub(crate) batch_reached: usize,
    pub(crate) batch_expired: usize,
}

impl<K: Eq, V> LruPolicy<K, V> {
    pub(crate) fn new(
        capacity: usize,
        load_factor: f64,
        max_batch: usize,
        batch_threshold_factor: f64,
    ) -> LruPolicy<K, V> {
        let batch = max_batch.min(MAX_BATCH_SIZE);
        LruPolicy {
            list: VecDeque::new(),
            trim_down: (capacity as f64 * load_factor) as usize,
            batch_reached: (batch as f64 * batch_threshold_factor).ceil() as usize,
            batch_expired: batch,
        }
    }

    fn position(&self, entry: &Entry<K, V>) -> Option<usize> {
        self.list.iter().position(|e| e.same_key(entry))
    }

    pub(crate) fn on_entry_miss(&mut self, entry: &Arc<Entry<K, V>>) {
        self.list.push_front(Arc::clone(entry));
    }

    pub(crate) fn on_entry_remove(&mut self, entry: &Entry<K, V>) {
        if let Some(idx) = self.position(entry) {
            self.list.remove(idx);
        }
    }

    pub(crate) fn execute(&mut self, drained: Vec<Arc<Entry<K, V>>>) -> Vec<Arc<Entry<K, V>>> {
        // Replay buffered hits in arrival order: each moves to the front, so
        // the most recently buffered hit ends up most recent overall.
        for entry in drained {
            if let Some(idx) = self.position(&entry) {
                self.list.remove(idx);
                self.list.push_front(entry);
            }
        }
        let mut victims = Vec::new();
        while self.list.len() > self.trim_down {
            // The back of the list is the least recently used entry.
            if let Some(victim) = self.list.pop_back() {
                victims.push(victim);
            }
        }
        victims
    }

    pub(crate) fn clear(&mut self) {
        self.list.clear();
    }

    #[cfg(test)]
    pub(crate) fn recency_keys(&self) -> Vec<u32>
    where
        K: Copy + Into<u32>,
    {
        self.list.iter().map(|e| e.key.into()).collect()
    }
}

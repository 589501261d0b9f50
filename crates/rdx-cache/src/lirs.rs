//! LIRS eviction (Low Inter-reference Recency Set, Jiang & Zhang).
//!
//! LIRS partitions resident entries into a hot LIR set, sized to roughly 90%
//! of the segment capacity, and a cold HIR set holding the remainder (at least
//! [`MIN_HIR_SIZE`]). Two structures carry the bookkeeping:
//!
//! - **Stack S**: an insertion-ordered map keyed by entry hash identity. The
//!   most recently referenced entry sits on top (the insertion end); pruning
//!   removes non-LIR entries from the bottom until a LIR entry is exposed, so
//!   the bottom of S is always LIR.
//! - **Queue Q**: the resident HIR entries in access order. When Q is full its
//!   head is the eviction victim.
//!
//! Keying S by hash identity rather than node identity is deliberate: a
//! re-inserted key produces a fresh entry with the same identity, which is how
//! a recent re-reference of a cold key is recognized and rewarded with direct
//! promotion to LIR.
//!
//! One subtlety is intentional: when a drained hit finds a resident HIR entry
//! that is absent from S, the entry is removed from Q and then re-appended,
//! moving it to Q's tail. The entry stays cold but becomes the last HIR
//! eviction candidate, and the `q_reappends_hir_hit_outside_stack` test pins
//! that ordering.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::entry::{Entry, Recency};
use crate::policy::MAX_BATCH_SIZE;

/// Lower bound on the resident HIR set, so tiny segments still get a cold set.
pub(crate) const MIN_HIR_SIZE: usize = 2;

/// LIRS bookkeeping for one segment.
pub(crate) struct LirsPolicy<K, V> {
    /// Stack S. Index 0 is the bottom; the insertion end is the top.
    stack: IndexMap<u64, Arc<Entry<K, V>>>,
    /// Queue Q of resident HIR entries. Front is the eviction victim.
    queue: VecDeque<Arc<Entry<K, V>>>,
    lir_limit: usize,
    hir_limit: usize,
    lir_count: usize,
    pub(crate) batch_reached: usize,
    pub(crate) batch_expired: usize,
}

impl<K: Eq, V> LirsPolicy<K, V> {
    pub(crate) fn new(
        capacity: usize,
        max_batch: usize,
        batch_threshold_factor: f64,
    ) -> LirsPolicy<K, V> {
        let lir = (capacity as f64 * 0.9) as usize;
        let hir = capacity - lir;
        let (lir_limit, hir_limit) = if hir < MIN_HIR_SIZE {
            (capacity.saturating_sub(MIN_HIR_SIZE), MIN_HIR_SIZE)
        } else {
            (lir, hir)
        };
        let batch = max_batch.min(MAX_BATCH_SIZE);
        LirsPolicy {
            stack: IndexMap::new(),
            queue: VecDeque::new(),
            lir_limit,
            hir_limit,
            lir_count: 0,
            batch_reached: (batch as f64 * batch_threshold_factor).ceil() as usize,
            batch_expired: batch,
        }
    }

    /// Replay a drained batch of hits. Victims accumulate from stack pruning.
    pub(crate) fn execute(&mut self, drained: Vec<Arc<Entry<K, V>>>) -> Vec<Arc<Entry<K, V>>> {
        let mut victims = Vec::new();
        for entry in drained {
            if !self.tracks(&entry) {
                // Buffered before the entry was removed; stale, skip.
                continue;
            }
            match entry.recency() {
                Recency::LirResident => self.handle_lir_hit(entry, &mut victims),
                Recency::HirResident => self.handle_hir_hit(entry, &mut victims),
                Recency::HirNonResident => {}
            }
        }
        victims
    }

    /// Hit on a hot entry: move to the top of S, then prune the bottom so it
    /// still ends at a LIR entry. Pruned residents become victims.
    fn handle_lir_hit(&mut self, entry: Arc<Entry<K, V>>, victims: &mut Vec<Arc<Entry<K, V>>>) {
        let ident = entry.ident();
        self.stack.shift_remove(&ident);
        self.stack.insert(ident, entry);
        self.prune_stack_bottom(victims);
    }

    /// Hit on a cold resident entry.
    fn handle_hir_hit(&mut self, entry: Arc<Entry<K, V>>, victims: &mut Vec<Arc<Entry<K, V>>>) {
        let ident = entry.ident();
        let in_stack = self.stack.shift_remove(&ident).is_some();
        self.stack.insert(ident, Arc::clone(&entry));
        if in_stack {
            // Recently referenced twice: promote to LIR and demote the
            // bottommost LIR entry to keep the LIR population constant.
            self.remove_from_queue(&entry);
            entry.transition_hir_resident_to_lir_resident();
            self.demote_bottom_lir(victims);
        } else {
            // Still a one-off reference; stays cold but moves to Q's tail.
            self.remove_from_queue(&entry);
            self.queue.push_back(entry);
        }
    }

    /// A new entry entered the segment.
    pub(crate) fn on_entry_miss(&mut self, entry: &Arc<Entry<K, V>>) -> Vec<Arc<Entry<K, V>>> {
        let mut victims = Vec::new();
        if self.lir_count + 1 < self.lir_limit {
            // Warm-up: the LIR set is filled straight from misses.
            self.lir_count += 1;
            entry.transition_hir_resident_to_lir_resident();
            self.stack.insert(entry.ident(), Arc::clone(entry));
        } else if self.queue.len() < self.hir_limit {
            self.queue.push_back(Arc::clone(entry));
        } else {
            let ident = entry.ident();
            let was_in_stack = self.stack.contains_key(&ident);
            // Q is full: its head leaves the resident set entirely.
            let first = self.queue.pop_front().expect("HIR queue cannot be empty here");
            first.transition_hir_resident_to_hir_non_resident();
            self.stack.insert(ident, Arc::clone(entry));
            if was_in_stack {
                // The key was referenced recently enough to still be in S:
                // reward the re-reference with immediate LIR status.
                entry.transition_hir_resident_to_lir_resident();
                self.demote_bottom_lir(&mut victims);
            } else {
                self.queue.push_back(Arc::clone(entry));
            }
            victims.push(first);
        }
        victims
    }

    /// An entry left the segment; drop it from both structures.
    pub(crate) fn on_entry_remove(&mut self, entry: &Entry<K, V>) {
        if let Some(removed) = self.stack.shift_remove(&entry.ident()) {
            if removed.recency() == Recency::LirResident {
                self.lir_count -= 1;
            }
        }
        self.remove_from_queue(entry);
    }

    pub(crate) fn clear(&mut self) {
        self.stack.clear();
        self.queue.clear();
        self.lir_count = 0;
    }

    /// The bottommost LIR entry becomes HIR resident and joins Q's tail, then
    /// the stack bottom is pruned up to the next LIR entry.
    fn demote_bottom_lir(&mut self, victims: &mut Vec<Arc<Entry<K, V>>>) {
        let mut demoted = false;
        while let Some((_, bottom)) = self.stack.get_index(0) {
            let bottom = Arc::clone(bottom);
            if bottom.recency() == Recency::LirResident {
                if demoted {
                    break;
                }
                demoted = true;
                self.stack.shift_remove_index(0);
                bottom.transition_lir_resident_to_hir_resident();
                self.queue.push_back(bottom);
            } else {
                self.stack.shift_remove_index(0);
                if bottom.recency() == Recency::HirResident {
                    victims.push(bottom);
                }
            }
        }
    }

    /// Prune non-LIR entries off the bottom of S, stopping at the first LIR.
    fn prune_stack_bottom(&mut self, victims: &mut Vec<Arc<Entry<K, V>>>) {
        while let Some((_, bottom)) = self.stack.get_index(0) {
            let bottom = Arc::clone(bottom);
            if bottom.recency() == Recency::LirResident {
                break;
            }
            self.stack.shift_remove_index(0);
            if bottom.recency() == Recency::HirResident {
                victims.push(bottom);
            }
        }
    }

    fn tracks(&self, entry: &Entry<K, V>) -> bool {
        self.stack.contains_key(&entry.ident())
            || self.queue.iter().any(|e| e.same_key(entry))
    }

    fn remove_from_queue(&mut self, entry: &Entry<K, V>) {
        if let Some(idx) = self.queue.iter().position(|e| e.same_key(entry)) {
            self.queue.remove(idx);
        }
    }

    #[cfg(test)]
    pub(crate) fn lir_count(&self) -> usize {
        self.lir_count
    }

    #[cfg(test)]
    pub(crate) fn queue_keys(&self) -> Vec<u32>
    where
        K: Copy + Into<u32>,
    {
        self.queue.iter().map(|e| e.key.into()).collect()
    }
}

//! An independently locked partition of the cache's key space.
//!
//! Each segment owns a power-of-two bucket table, an access buffer, and an
//! eviction policy instance. The table is published through an `ArcSwap` and
//! bucket chains are immutable once linked, so retrievals never block: they
//! acquire-load the element count, walk the chain, and at most fall back to a
//! locked re-read of a value slot. All structural mutation happens under the
//! segment's mutex, and every such mutation ends with a release-store to the
//! count so the chain it produced is visible to subsequent readers.
//!
//! Eviction interleaves with mutation in a fixed shape: the policy is consulted
//! under the lock, victim entries are unlinked under the lock, and the evicted
//! `(key, value)` pairs are reported to the listener only after the lock has
//! been released, on the thread that triggered the drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::buffer::AccessBuffer;
use crate::entry::Entry;
use crate::map::{EvictionListener, MAXIMUM_CAPACITY};
use crate::policy::{EvictionStrategy, Policy, MAX_BATCH_SIZE};

/// A segment's bucket table. The bucket count is always a power of two.
pub(crate) struct Table<K, V> {
    buckets: Box<[ArcSwapOption<Entry<K, V>>]>,
}

impl<K, V> Table<K, V> {
    pub(crate) fn new(capacity: usize) -> Table<K, V> {
        debug_assert!(capacity.is_power_of_two());
        let buckets: Vec<ArcSwapOption<Entry<K, V>>> =
            (0..capacity).map(|_| ArcSwapOption::empty()).collect();
        Table {
            buckets: buckets.into_boxed_slice(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn bucket(&self, hash: u32) -> &ArcSwapOption<Entry<K, V>> {
        &self.buckets[(hash as usize) & (self.buckets.len() - 1)]
    }

    pub(crate) fn buckets(&self) -> &[ArcSwapOption<Entry<K, V>>] {
        &self.buckets
    }
}

pub(crate) struct Segment<K, V> {
    /// Element count. Doubles as the release/acquire fence for readers.
    count: AtomicUsize,
    /// Bumped on every structural change; cross-segment aggregates snapshot it.
    mod_count: AtomicUsize,
    /// Rehash trigger; only consulted when the policy is `None`.
    threshold: AtomicUsize,
    load_factor: f64,
    table: ArcSwap<Table<K, V>>,
    policy: Mutex<Policy<K, V>>,
    buffer: AccessBuffer<K, V>,
    batch_reached: usize,
    batch_expired: usize,
    strategy: EvictionStrategy,
    listener: Arc<dyn EvictionListener<K, V>>,
}

impl<K, V> Segment<K, V>
where
    K: Eq + Clone,
{
    /// `capacity` sizes the eviction policy; `table_capacity` sizes the
    /// initial bucket table. The two coincide at normal construction, but a
    /// snapshot restore starts from one-bucket tables while the policies keep
    /// their configured capacity, and a `None`-policy table regrows through
    /// the ordinary rehash path as entries return.
    pub(crate) fn new(
        capacity: usize,
        table_capacity: usize,
        load_factor: f64,
        strategy: EvictionStrategy,
        listener: Arc<dyn EvictionListener<K, V>>,
    ) -> Segment<K, V> {
        let policy = Policy::make(strategy, capacity, load_factor);
        let strategy = policy.strategy();
        let batch_reached = policy.batch_reached_threshold();
        let batch_expired = policy.batch_expired_threshold();
        Segment {
            count: AtomicUsize::new(0),
            mod_count: AtomicUsize::new(0),
            threshold: AtomicUsize::new((table_capacity as f64 * load_factor) as usize),
            load_factor,
            table: ArcSwap::from_pointee(Table::new(table_capacity)),
            policy: Mutex::new(policy),
            buffer: AccessBuffer::new(MAX_BATCH_SIZE),
            batch_reached,
            batch_expired,
            strategy,
            listener,
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn mod_count(&self) -> usize {
        self.mod_count.load(Ordering::Acquire)
    }

    /// Snapshot of the current table for weakly consistent iteration.
    pub(crate) fn table_snapshot(&self) -> Arc<Table<K, V>> {
        self.table.load_full()
    }

    /// Take the segment lock. Used by cross-segment aggregates and snapshots,
    /// which lock every segment in index order.
    pub(crate) fn lock_policy(&self) -> MutexGuard<'_, Policy<K, V>> {
        self.policy.lock()
    }

    pub(crate) fn get(&self, key: &K, hash: u32) -> Option<Arc<V>> {
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }
        let table = self.table.load();
        let mut node = table.bucket(hash).load_full();
        while let Some(e) = node {
            if e.hash == hash && e.key == *key {
                let value = match e.value.load_full() {
                    Some(v) => Some(v),
                    // An unsynchronized read raced entry initialization;
                    // re-read under the lock.
                    None => self.read_value_under_lock(&e),
                };
                let value = value?;
                if self.strategy != EvictionStrategy::None {
                    self.buffer.record(Arc::clone(&e));
                    if self.buffer.len() >= self.batch_reached {
                        let evicted = self.attempt_eviction();
                        self.notify(evicted);
                    }
                }
                return Some(value);
            }
            node = e.next.clone();
        }
        None
    }

    pub(crate) fn contains_key(&self, key: &K, hash: u32) -> bool {
        if self.count.load(Ordering::Acquire) == 0 {
            return false;
        }
        let table = self.table.load();
        let mut node = table.bucket(hash).load_full();
        while let Some(e) = node {
            if e.hash == hash && e.key == *key {
                return true;
            }
            node = e.next.clone();
        }
        false
    }

    pub(crate) fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        if self.count.load(Ordering::Acquire) == 0 {
            return false;
        }
        let table = self.table.load();
        for bucket in table.buckets() {
            let mut node = bucket.load_full();
            while let Some(e) = node {
                let v = match e.value.load_full() {
                    Some(v) => Some(v),
                    None => self.read_value_under_lock(&e),
                };
                if let Some(v) = v {
                    if *v == *value {
                        return true;
                    }
                }
                node = e.next.clone();
            }
        }
        false
    }

    /// Like [`Segment::contains_value`], for callers that already hold this
    /// segment's lock. No writer can be mid-publication under the lock, so an
    /// unset value slot means absent rather than racing; re-reading under the
    /// lock here would self-deadlock.
    pub(crate) fn contains_value_locked(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let table = self.table.load();
        for bucket in table.buckets() {
            let mut node = bucket.load_full();
            while let Some(e) = node {
                if let Some(v) = e.value.load_full() {
                    if *v == *value {
                        return true;
                    }
                }
                node = e.next.clone();
            }
        }
        false
    }

    pub(crate) fn put(
        &self,
        key: K,
        key_hash: u64,
        hash: u32,
        value: Arc<V>,
        only_if_absent: bool,
    ) -> Option<Arc<V>> {
        let mut evicted = Vec::new();
        let old = {
            let mut policy = self.policy.lock();
            let c = self.count.load(Ordering::Relaxed) + 1;
            if self.strategy == EvictionStrategy::None
                && c > self.threshold.load(Ordering::Relaxed)
            {
                self.rehash();
            }
            let table = self.table.load();
            let bucket = table.bucket(hash);
            let mut node = bucket.load_full();
            let mut found = None;
            while let Some(e) = node {
                if e.hash == hash && e.key == key {
                    found = Some(e);
                    break;
                }
                node = e.next.clone();
            }
            if let Some(e) = found {
                if only_if_absent {
                    e.value.load_full()
                } else {
                    let old = e.value.swap(Some(value));
                    if self.strategy != EvictionStrategy::None {
                        self.buffer.record(e);
                    }
                    old
                }
            } else {
                self.mod_count.fetch_add(1, Ordering::Relaxed);
                self.count.store(c, Ordering::Release);
                if self.strategy != EvictionStrategy::None {
                    if c > table.capacity() {
                        // Over capacity: drain buffered hits and trim before
                        // linking the new entry.
                        let drained = self.buffer.drain();
                        let victims = policy.execute(drained);
                        evicted.extend(self.process_victims(&mut policy, victims));
                    }
                    let first = bucket.load_full();
                    let entry = Arc::new(Entry::new(key, key_hash, hash, first, Some(value)));
                    bucket.store(Some(Arc::clone(&entry)));
                    let victims = policy.on_entry_miss(&entry);
                    evicted.extend(self.process_victims(&mut policy, victims));
                } else {
                    let first = bucket.load_full();
                    bucket.store(Some(Arc::new(Entry::new(key, key_hash, hash, first, Some(value)))));
                }
                None
            }
        };
        self.notify(evicted);
        old
    }

    /// Replace the value of an existing entry whose current value satisfies
    /// `matches`. Returns the previous value on success.
    pub(crate) fn replace(
        &self,
        key: &K,
        hash: u32,
        matches: impl Fn(&Arc<V>) -> bool,
        new_value: Arc<V>,
    ) -> Option<Arc<V>> {
        let (old, evicted) = {
            let mut policy = self.policy.lock();
            let table = self.table.load();
            let mut node = table.bucket(hash).load_full();
            let mut found = None;
            while let Some(e) = node {
                if e.hash == hash && e.key == *key {
                    found = Some(e);
                    break;
                }
                node = e.next.clone();
            }
            match found {
                Some(e) if e.value.load_full().is_some_and(|v| matches(&v)) => {
                    let old = e.value.swap(Some(new_value));
                    let mut evicted = Vec::new();
                    if self.strategy != EvictionStrategy::None {
                        self.buffer.record(e);
                        if self.buffer.len() >= self.batch_reached {
                            evicted = self.drain_locked(&mut policy);
                        }
                    }
                    (old, evicted)
                }
                _ => (None, Vec::new()),
            }
        };
        self.notify(evicted);
        old
    }

    /// Remove the entry for `key` if its value satisfies `matches`.
    pub(crate) fn remove(
        &self,
        key: &K,
        hash: u32,
        matches: impl Fn(&Arc<V>) -> bool,
    ) -> Option<Arc<V>> {
        let (old, evicted) = {
            let mut policy = self.policy.lock();
            let (old, victims) = self.remove_locked(&mut policy, key, hash, &matches);
            let evicted = self.process_victims(&mut policy, victims);
            (old, evicted)
        };
        self.notify(evicted);
        old
    }

    pub(crate) fn clear(&self) {
        if self.count.load(Ordering::Acquire) == 0 {
            return;
        }
        let mut policy = self.policy.lock();
        let capacity = self.table.load().capacity();
        self.table.store(Arc::new(Table::new(capacity)));
        policy.clear();
        self.buffer.clear();
        self.mod_count.fetch_add(1, Ordering::Relaxed);
        self.count.store(0, Ordering::Release);
    }

    /// Unlink the entry for `key` under the already-held lock. The removed
    /// node's successors are reused; every preceding node is cloned so readers
    /// still traversing the old chain see a consistent, terminated list. Each
    /// clone re-enters the policy as a miss, which for LIRS can itself produce
    /// victims; those are returned for the caller to process.
    fn remove_locked(
        &self,
        policy: &mut Policy<K, V>,
        key: &K,
        hash: u32,
        matches: &dyn Fn(&Arc<V>) -> bool,
    ) -> (Option<Arc<V>>, Vec<Arc<Entry<K, V>>>) {
        let table = self.table.load();
        let bucket = table.bucket(hash);
        let first = bucket.load_full();
        let mut node = first.clone();
        let mut target = None;
        while let Some(e) = node {
            if e.hash == hash && e.key == *key {
                target = Some(e);
                break;
            }
            node = e.next.clone();
        }
        let Some(target) = target else {
            return (None, Vec::new());
        };
        let old = match target.value.load_full() {
            Some(v) if matches(&v) => v,
            _ => return (None, Vec::new()),
        };
        let c = self.count.load(Ordering::Relaxed) - 1;
        self.mod_count.fetch_add(1, Ordering::Relaxed);
        policy.on_entry_remove(&target);
        let mut victims = Vec::new();
        let mut new_first = target.next.clone();
        let mut node = first;
        while let Some(e) = node {
            if Arc::ptr_eq(&e, &target) {
                break;
            }
            policy.on_entry_remove(&e);
            let clone = Arc::new(Entry::new(
                e.key.clone(),
                e.key_hash,
                e.hash,
                new_first,
                e.value.load_full(),
            ));
            victims.extend(policy.on_entry_miss(&clone));
            new_first = Some(clone);
            node = e.next.clone();
        }
        bucket.store(new_first);
        self.count.store(c, Ordering::Release);
        (Some(old), victims)
    }

    /// Evict every victim from the table, following any cascade the removals
    /// themselves produce, and collect the `(key, value)` pairs to report.
    fn process_victims(
        &self,
        policy: &mut Policy<K, V>,
        mut victims: Vec<Arc<Entry<K, V>>>,
    ) -> Vec<(K, Arc<V>)> {
        let mut evicted = Vec::new();
        while let Some(victim) = victims.pop() {
            if let Some(value) = victim.value.load_full() {
                evicted.push((victim.key.clone(), value));
            }
            let (_, more) = self.remove_locked(policy, &victim.key, victim.hash, &|_| true);
            victims.extend(more);
        }
        evicted
    }

    /// Drain the access buffer opportunistically: try the lock, and block on it
    /// only once the batch has fully expired. Returns the evicted pairs; the
    /// caller reports them after this function has released the lock.
    fn attempt_eviction(&self) -> Vec<(K, Arc<V>)> {
        let mut policy = match self.policy.try_lock() {
            Some(guard) => guard,
            None => {
                if self.buffer.len() >= self.batch_expired {
                    self.policy.lock()
                } else {
                    // Another thread is already draining; this batch can wait.
                    return Vec::new();
                }
            }
        };
        self.drain_locked(&mut policy)
    }

    fn drain_locked(&self, policy: &mut Policy<K, V>) -> Vec<(K, Arc<V>)> {
        let drained = self.buffer.drain();
        if drained.is_empty() {
            return Vec::new();
        }
        let victims = policy.execute(drained);
        if !victims.is_empty() {
            debug!("evicting {} entries after access buffer drain", victims.len());
        }
        self.process_victims(policy, victims)
    }

    /// Re-read a value slot under the segment lock. Only reachable through the
    /// unlikely reordering in which a reader observed an entry before its
    /// value store.
    fn read_value_under_lock(&self, entry: &Entry<K, V>) -> Option<Arc<V>> {
        let _policy = self.policy.lock();
        entry.value.load_full()
    }

    /// Double the table. Only called when the policy is `None`; bucket chains
    /// are redistributed, reusing the trailing run of nodes that land in the
    /// same new slot and cloning the rest.
    fn rehash(&self) {
        let old_table = self.table.load_full();
        let old_capacity = old_table.capacity();
        if old_capacity >= MAXIMUM_CAPACITY {
            return;
        }
        let new_table = Table::new(old_capacity << 1);
        self.threshold.store(
            (new_table.capacity() as f64 * self.load_factor) as usize,
            Ordering::Relaxed,
        );
        let mask = new_table.capacity() - 1;
        for bucket in old_table.buckets() {
            let Some(e) = bucket.load_full() else {
                continue;
            };
            let idx = (e.hash as usize) & mask;
            if e.next.is_none() {
                new_table.buckets()[idx].store(Some(e));
                continue;
            }
            // Find the trailing run mapping to a single new slot; those nodes
            // keep their links and move as one.
            let mut last_run = Arc::clone(&e);
            let mut last_idx = idx;
            let mut node = e.next.clone();
            while let Some(n) = node {
                let k = (n.hash as usize) & mask;
                if k != last_idx {
                    last_idx = k;
                    last_run = Arc::clone(&n);
                }
                node = n.next.clone();
            }
            new_table.buckets()[last_idx].store(Some(Arc::clone(&last_run)));
            // Everything before the run is re-created; next links are immutable.
            let mut node = Some(e);
            while let Some(n) = node {
                if Arc::ptr_eq(&n, &last_run) {
                    break;
                }
                let k = (n.hash as usize) & mask;
                let head = new_table.buckets()[k].load_full();
                new_table.buckets()[k].store(Some(Arc::new(Entry::new(
                    n.key.clone(),
                    n.key_hash,
                    n.hash,
                    head,
                    n.value.load_full(),
                ))));
                node = n.next.clone();
            }
        }
        self.table.store(Arc::new(new_table));
    }

    fn notify(&self, evicted: Vec<(K, Arc<V>)>) {
        for (key, value) in evicted {
            // A panicking listener must not poison the cache.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.listener.evicted(&key, &value);
            }));
            if outcome.is_err() {
                warn!("eviction listener panicked; continuing");
            }
        }
    }
}

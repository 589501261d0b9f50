//! The public concurrent map type.
//!
//! `BufferedConcurrentMap` subdivides its key space among independently locked
//! segments. The upper bits of a spread hash select the segment and the lower
//! bits the bucket within it, so a well-behaved workload spreads contention
//! across `concurrency_level` mutexes while retrievals bypass them entirely.
//!
//! Capacity is enforced per segment by the configured eviction strategy. With
//! [`EvictionStrategy::None`] the map behaves like a plain concurrent hash map
//! and grows by rehashing; with LRU or LIRS each segment holds its capacity and
//! reports evicted pairs to the [`EvictionListener`].
//!
//! Values are stored behind `Arc` so retrievals can hand out references without
//! copying or holding any lock while the caller inspects them.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::iter::{Iter, Keys, Values};
use crate::policy::EvictionStrategy;
use crate::segment::Segment;

/// Capacity used when not otherwise specified.
pub const DEFAULT_INITIAL_CAPACITY: usize = 16;
/// Load factor used when not otherwise specified.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.75;
/// Concurrency level used when not otherwise specified.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 16;
/// Hard cap on the per-segment table size, so bucket indices stay in range.
pub const MAXIMUM_CAPACITY: usize = 1 << 30;
/// Hard cap on the number of segments.
pub const MAX_SEGMENTS: usize = 1 << 16;
/// Unsynchronized attempts in [`BufferedConcurrentMap::len`] and
/// [`BufferedConcurrentMap::contains_value`] before falling back to locking
/// every segment.
pub(crate) const RETRIES_BEFORE_LOCK: usize = 2;

/// Callback invoked with each evicted `(key, value)` pair.
///
/// Invocations happen on the thread whose operation triggered the eviction,
/// strictly after that segment's lock has been released. A panicking listener
/// is contained and logged; it cannot corrupt the map.
pub trait EvictionListener<K, V>: Send + Sync {
    fn evicted(&self, key: &K, value: &V);
}

/// Listener that ignores evictions.
pub struct NullEvictionListener;

impl<K, V> EvictionListener<K, V> for NullEvictionListener {
    fn evicted(&self, _key: &K, _value: &V) {}
}

/// Construction parameters for [`BufferedConcurrentMap`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total expected capacity, divided among the segments.
    pub initial_capacity: usize,
    /// Per-bucket fill threshold. Also sizes the LRU trim-down target and the
    /// batching thresholds of the eviction policies.
    pub load_factor: f64,
    /// Expected number of concurrently updating threads; rounded up to a power
    /// of two to become the segment count.
    pub concurrency_level: usize,
    /// Eviction algorithm applied independently by every segment.
    pub eviction: EvictionStrategy,
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            eviction: EvictionStrategy::None,
        }
    }
}

/// A hash map supporting full concurrency of retrievals and adjustable
/// expected concurrency for updates, with optional bounded capacity.
pub struct BufferedConcurrentMap<K, V, S = RandomState> {
    segments: Box<[Segment<K, V>]>,
    /// Right shift applied to the spread hash to pick a segment.
    segment_shift: u32,
    segment_mask: usize,
    hash_builder: S,
    pub(crate) config: CacheConfig,
}

/// Spread bits of a key hash so both the segment index (upper bits) and the
/// bucket index (lower bits) see the full entropy. Single-word variant of the
/// Wang/Jenkins mix.
fn spread(h: u64) -> u32 {
    let mut h = (h ^ (h >> 32)) as u32;
    h = h.wrapping_add((h << 15) ^ 0xffff_cd7d);
    h ^= h >> 10;
    h = h.wrapping_add(h << 3);
    h ^= h >> 6;
    h = h.wrapping_add((h << 2).wrapping_add(h << 14));
    h ^ (h >> 16)
}

impl<K, V> BufferedConcurrentMap<K, V>
where
    K: Hash + Eq + Clone,
{
    /// An unbounded map with default capacity, load factor, and concurrency.
    pub fn new() -> BufferedConcurrentMap<K, V> {
        BufferedConcurrentMap::with_config(CacheConfig::default())
            .expect("default configuration is valid")
    }

    pub fn with_config(config: CacheConfig) -> Result<BufferedConcurrentMap<K, V>> {
        BufferedConcurrentMap::with_listener(config, Arc::new(NullEvictionListener))
    }

    pub fn with_listener(
        config: CacheConfig,
        listener: Arc<dyn EvictionListener<K, V>>,
    ) -> Result<BufferedConcurrentMap<K, V>> {
        BufferedConcurrentMap::with_hasher_and_listener(config, RandomState::new(), listener)
    }
}

impl<K, V> Default for BufferedConcurrentMap<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> BufferedConcurrentMap<K, V> {
        BufferedConcurrentMap::new()
    }
}

impl<K, V, S> BufferedConcurrentMap<K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    pub fn with_hasher_and_listener(
        config: CacheConfig,
        hash_builder: S,
        listener: Arc<dyn EvictionListener<K, V>>,
    ) -> Result<BufferedConcurrentMap<K, V, S>> {
        BufferedConcurrentMap::build(config, hash_builder, listener, false)
    }

    /// Construction path for snapshot restores: segment tables start at the
    /// minimum size and regrow (or chain) as entries are reinserted, while
    /// the eviction policies are sized from the configured capacity.
    pub(crate) fn with_minimal_tables(
        config: CacheConfig,
        hash_builder: S,
        listener: Arc<dyn EvictionListener<K, V>>,
    ) -> Result<BufferedConcurrentMap<K, V, S>> {
        BufferedConcurrentMap::build(config, hash_builder, listener, true)
    }

    fn build(
        config: CacheConfig,
        hash_builder: S,
        listener: Arc<dyn EvictionListener<K, V>>,
        minimal_tables: bool,
    ) -> Result<BufferedConcurrentMap<K, V, S>> {
        if !(config.load_factor > 0.0) || !config.load_factor.is_finite() {
            return Err(Error::InvalidArgument("load factor must be positive and finite"));
        }
        if config.concurrency_level == 0 {
            return Err(Error::InvalidArgument("concurrency level must be positive"));
        }
        let concurrency = config.concurrency_level.min(MAX_SEGMENTS);

        // Round the segment count up to a power of two; the shift then maps
        // the top of the 32-bit spread hash onto the segment index.
        let mut sshift = 0u32;
        let mut ssize = 1usize;
        while ssize < concurrency {
            sshift += 1;
            ssize <<= 1;
        }
        let segment_shift = 32 - sshift;
        let segment_mask = ssize - 1;

        let initial = config.initial_capacity.min(MAXIMUM_CAPACITY);
        let mut per_segment = initial / ssize;
        if per_segment * ssize < initial {
            per_segment += 1;
        }
        let mut capacity = 1usize;
        while capacity < per_segment {
            capacity <<= 1;
        }
        let table_capacity = if minimal_tables { 1 } else { capacity };

        let segments: Vec<Segment<K, V>> = (0..ssize)
            .map(|_| {
                Segment::new(
                    capacity,
                    table_capacity,
                    config.load_factor,
                    config.eviction,
                    Arc::clone(&listener),
                )
            })
            .collect();
        Ok(BufferedConcurrentMap {
            segments: segments.into_boxed_slice(),
            segment_shift,
            segment_mask,
            hash_builder,
            config,
        })
    }

    fn hash_key(&self, key: &K) -> (u64, u32) {
        let key_hash = self.hash_builder.hash_one(key);
        (key_hash, spread(key_hash))
    }

    fn segment_for(&self, hash: u32) -> &Segment<K, V> {
        &self.segments[(u64::from(hash) >> self.segment_shift) as usize & self.segment_mask]
    }

    pub(crate) fn segments(&self) -> &[Segment<K, V>] {
        &self.segments
    }

    /// The value mapped to `key`, if any. Does not block; a hit may be
    /// recorded in the segment's access buffer and may opportunistically
    /// trigger an eviction drain on this thread.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let (_, hash) = self.hash_key(key);
        self.segment_for(hash).get(key, hash)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let (_, hash) = self.hash_key(key);
        self.segment_for(hash).contains_key(key, hash)
    }

    /// Whether any key maps to `value`. Requires a full traversal; much slower
    /// than [`BufferedConcurrentMap::contains_key`].
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let mut mc = vec![0usize; self.segments.len()];
        for _ in 0..RETRIES_BEFORE_LOCK {
            let mut mcsum = 0usize;
            for (i, seg) in self.segments.iter().enumerate() {
                mc[i] = seg.mod_count();
                mcsum = mcsum.wrapping_add(mc[i]);
                if seg.contains_value(value) {
                    return true;
                }
            }
            // A clean sweep only counts if no segment changed underneath it.
            let mut clean = true;
            if mcsum != 0 {
                for (i, seg) in self.segments.iter().enumerate() {
                    if mc[i] != seg.mod_count() {
                        clean = false;
                        break;
                    }
                }
            }
            if clean {
                return false;
            }
        }
        let guards: Vec<_> = self.segments.iter().map(|s| s.lock_policy()).collect();
        let found = self.segments.iter().any(|s| s.contains_value_locked(value));
        drop(guards);
        found
    }

    /// Map `key` to `value`, returning the previous value if one existed.
    pub fn put(&self, key: K, value: V) -> Option<Arc<V>> {
        let (key_hash, hash) = self.hash_key(&key);
        self.segment_for(hash)
            .put(key, key_hash, hash, Arc::new(value), false)
    }

    /// Map `key` to `value` only if no mapping exists. Returns the current
    /// value when the mapping was already present.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
        let (key_hash, hash) = self.hash_key(&key);
        self.segment_for(hash)
            .put(key, key_hash, hash, Arc::new(value), true)
    }

    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    /// Replace the value for `key` only if a mapping exists.
    pub fn replace(&self, key: &K, value: V) -> Option<Arc<V>> {
        let (_, hash) = self.hash_key(key);
        self.segment_for(hash)
            .replace(key, hash, |_| true, Arc::new(value))
    }

    /// Replace the value for `key` only if it currently equals `expected`.
    pub fn replace_if_equal(&self, key: &K, expected: &V, value: V) -> bool
    where
        V: PartialEq,
    {
        let (_, hash) = self.hash_key(key);
        self.segment_for(hash)
            .replace(key, hash, |v| **v == *expected, Arc::new(value))
            .is_some()
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let (_, hash) = self.hash_key(key);
        self.segment_for(hash).remove(key, hash, |_| true)
    }

    /// Remove the mapping for `key` only if its value equals `expected`.
    pub fn remove_if_equal(&self, key: &K, expected: &V) -> bool
    where
        V: PartialEq,
    {
        let (_, hash) = self.hash_key(key);
        self.segment_for(hash)
            .remove(key, hash, |v| **v == *expected)
            .is_some()
    }

    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.clear();
        }
    }

    /// Number of mappings. Attempts an unsynchronized sum first, verified by
    /// modification-count snapshots; on persistent concurrent modification it
    /// locks every segment in index order (deadlock-free by total ordering).
    pub fn len(&self) -> usize {
        let mut mc = vec![0usize; self.segments.len()];
        for _ in 0..RETRIES_BEFORE_LOCK {
            let mut sum = 0usize;
            let mut mcsum = 0usize;
            for (i, seg) in self.segments.iter().enumerate() {
                sum += seg.count();
                mc[i] = seg.mod_count();
                mcsum = mcsum.wrapping_add(mc[i]);
            }
            let mut stable = true;
            if mcsum != 0 {
                for (i, seg) in self.segments.iter().enumerate() {
                    if mc[i] != seg.mod_count() {
                        stable = false;
                        break;
                    }
                }
            }
            if stable {
                return sum;
            }
        }
        let guards: Vec<_> = self.segments.iter().map(|s| s.lock_policy()).collect();
        let sum = self.segments.iter().map(|s| s.count()).sum();
        drop(guards);
        sum
    }

    /// Whether the map has no mappings. Tracks per-segment modification counts
    /// so that an insert in one segment paired with a removal in another is
    /// not misread as "empty throughout".
    pub fn is_empty(&self) -> bool {
        let mut mc = vec![0usize; self.segments.len()];
        let mut mcsum = 0usize;
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.count() != 0 {
                return false;
            }
            mc[i] = seg.mod_count();
            mcsum = mcsum.wrapping_add(mc[i]);
        }
        if mcsum != 0 {
            for (i, seg) in self.segments.iter().enumerate() {
                if seg.count() != 0 || mc[i] != seg.mod_count() {
                    return false;
                }
            }
        }
        true
    }

    /// Weakly consistent iteration over `(key, value)` pairs: never fails
    /// under concurrent mutation, reflects the state at some point at or since
    /// its creation, and is meant for use by a single thread.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter::new(self)
    }

    pub fn keys(&self) -> Keys<'_, K, V, S> {
        Keys::new(self)
    }

    pub fn values(&self) -> Values<'_, K, V, S> {
        Values::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_regularizes_low_entropy_hashes() {
        // Consecutive inputs must not map to consecutive segment indices.
        let spread: Vec<u32> = (0u64..8).map(super::spread).collect();
        let mut sorted = spread.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 8);
        assert_ne!(spread[1].wrapping_sub(spread[0]), spread[2].wrapping_sub(spread[1]));
    }

    #[test]
    fn rejects_invalid_configuration() {
        let bad_lf = CacheConfig {
            load_factor: 0.0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            BufferedConcurrentMap::<u32, u32>::with_config(bad_lf),
            Err(Error::InvalidArgument(_))
        ));
        let bad_conc = CacheConfig {
            concurrency_level: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            BufferedConcurrentMap::<u32, u32>::with_config(bad_conc),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn segment_count_rounds_up_to_power_of_two() {
        let map = BufferedConcurrentMap::<u32, u32>::with_config(CacheConfig {
            concurrency_level: 5,
            ..CacheConfig::default()
        })
        .unwrap();
        assert_eq!(map.segments().len(), 8);
        assert_eq!(map.segment_shift, 29);
    }

    #[test]
    fn concurrency_level_is_capped() {
        let map = BufferedConcurrentMap::<u32, u32>::with_config(CacheConfig {
            concurrency_level: MAX_SEGMENTS * 4,
            initial_capacity: 0,
            ..CacheConfig::default()
        })
        .unwrap();
        assert_eq!(map.segments().len(), MAX_SEGMENTS);
    }

    #[test]
    fn basic_operations() {
        let map = BufferedConcurrentMap::new();
        assert!(map.is_empty());
        assert_eq!(map.put("a", 1), None);
        assert_eq!(map.put("a", 2).as_deref(), Some(&1));
        assert_eq!(map.get(&"a").as_deref(), Some(&2));
        assert!(map.contains_key(&"a"));
        assert!(map.contains_value(&2));
        assert!(!map.contains_value(&1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(&"a").as_deref(), Some(&2));
        assert_eq!(map.get(&"a"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn put_if_absent_keeps_first_value() {
        let map = BufferedConcurrentMap::new();
        assert_eq!(map.put_if_absent("k", 1), None);
        assert_eq!(map.put_if_absent("k", 2).as_deref(), Some(&1));
        assert_eq!(map.get(&"k").as_deref(), Some(&1));
    }

    #[test]
    fn conditional_replace_and_remove() {
        let map = BufferedConcurrentMap::new();
        map.put("k", 1);
        assert!(!map.replace_if_equal(&"k", &9, 5));
        assert!(map.replace_if_equal(&"k", &1, 5));
        assert_eq!(map.get(&"k").as_deref(), Some(&5));
        assert_eq!(map.replace(&"missing", 7), None);
        assert!(!map.remove_if_equal(&"k", &1));
        assert!(map.remove_if_equal(&"k", &5));
        assert!(map.is_empty());
    }

    #[test]
    fn rehash_preserves_entries() {
        let map = BufferedConcurrentMap::with_config(CacheConfig {
            initial_capacity: 2,
            concurrency_level: 1,
            ..CacheConfig::default()
        })
        .unwrap();
        for k in 0..256u32 {
            map.put(k, k * 3);
        }
        assert_eq!(map.len(), 256);
        for k in 0..256u32 {
            assert_eq!(map.get(&k).as_deref(), Some(&(k * 3)));
        }
    }
}

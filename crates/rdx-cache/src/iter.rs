//! Weakly consistent iteration.
//!
//! Iterators walk segments from the highest index down, capturing each
//! segment's table once and traversing its immutable bucket chains. Because
//! chains never have their links mutated, an iterator can never observe a
//! half-linked node; concurrent removals at most leave it on a superseded
//! chain whose contents were valid when captured. Mutations made after the
//! table was captured may or may not be observed. Iterators are intended for
//! use by a single thread.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::entry::Entry;
use crate::map::BufferedConcurrentMap;
use crate::segment::Table;

/// Iterator over `(key, value)` pairs.
pub struct Iter<'a, K, V, S = RandomState> {
    map: &'a BufferedConcurrentMap<K, V, S>,
    /// Next segment to visit, counting down. Starts at the segment count.
    segment_idx: usize,
    table: Option<Arc<Table<K, V>>>,
    /// Buckets remaining in the captured table, counting down.
    bucket_idx: usize,
    current: Option<Arc<Entry<K, V>>>,
}

impl<'a, K, V, S> Iter<'a, K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    pub(crate) fn new(map: &'a BufferedConcurrentMap<K, V, S>) -> Iter<'a, K, V, S> {
        Iter {
            map,
            segment_idx: map.segments().len(),
            table: None,
            bucket_idx: 0,
            current: None,
        }
    }

    fn advance(&mut self) -> Option<Arc<Entry<K, V>>> {
        loop {
            if let Some(current) = self.current.take() {
                self.current = current.next.clone();
                return Some(current);
            }
            if let Some(table) = &self.table {
                while self.bucket_idx > 0 {
                    self.bucket_idx -= 1;
                    if let Some(head) = table.buckets()[self.bucket_idx].load_full() {
                        self.current = Some(head);
                        break;
                    }
                }
                if self.current.is_some() {
                    continue;
                }
            }
            self.table = None;
            loop {
                if self.segment_idx == 0 {
                    return None;
                }
                self.segment_idx -= 1;
                let segment = &self.map.segments()[self.segment_idx];
                if segment.count() != 0 {
                    let table = segment.table_snapshot();
                    self.bucket_idx = table.capacity();
                    self.table = Some(table);
                    break;
                }
            }
        }
    }
}

impl<K, V, S> Iterator for Iter<'_, K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<(K, Arc<V>)> {
        loop {
            let entry = self.advance()?;
            // A value slot observed before initialization is skipped rather
            // than surfaced as an absent value.
            if let Some(value) = entry.value.load_full() {
                return Some((entry.key.clone(), value));
            }
        }
    }
}

/// Iterator over keys.
pub struct Keys<'a, K, V, S = RandomState>(Iter<'a, K, V, S>);

impl<'a, K, V, S> Keys<'a, K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    pub(crate) fn new(map: &'a BufferedConcurrentMap<K, V, S>) -> Keys<'a, K, V, S> {
        Keys(Iter::new(map))
    }
}

impl<K, V, S> Iterator for Keys<'_, K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.0.next().map(|(key, _)| key)
    }
}

/// Iterator over values.
pub struct Values<'a, K, V, S = RandomState>(Iter<'a, K, V, S>);

impl<'a, K, V, S> Values<'a, K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    pub(crate) fn new(map: &'a BufferedConcurrentMap<K, V, S>) -> Values<'a, K, V, S> {
        Values(Iter::new(map))
    }
}

impl<K, V, S> Iterator for Values<'_, K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    type Item = Arc<V>;

    fn next(&mut self) -> Option<Arc<V>> {
        self.0.next().map(|(_, value)| value)
    }
}

//! The per-segment access buffer.
//!
//! Readers record cache hits here without taking the segment lock; whichever
//! thread later wins the lock drains the buffer and replays the recorded hits
//! into the eviction policy in one batch. The buffer is a hint, not a ledger:
//! it is bounded, and once full the oldest recorded hit is overwritten. Losing
//! a hit signal can only make the recency ordering slightly stale, never the
//! map contents wrong.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::entry::Entry;

/// Bounded multi-producer buffer of recently hit entries.
///
/// Producers are reader threads; the single consumer is whichever thread holds
/// the segment lock during a drain.
pub(crate) struct AccessBuffer<K, V> {
    queue: ArrayQueue<Arc<Entry<K, V>>>,
}

impl<K, V> AccessBuffer<K, V> {
    pub(crate) fn new(capacity: usize) -> AccessBuffer<K, V> {
        AccessBuffer {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Record a hit. Overwrites the oldest recorded hit when full.
    pub(crate) fn record(&self, entry: Arc<Entry<K, V>>) {
        self.queue.force_push(entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Take every buffered hit, oldest first. Call only under the segment lock.
    pub(crate) fn drain(&self) -> Vec<Arc<Entry<K, V>>> {
        let mut drained = Vec::with_capacity(self.queue.len());
        while let Some(entry) = self.queue.pop() {
            drained.push(entry);
        }
        drained
    }

    pub(crate) fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u32) -> Arc<Entry<u32, u32>> {
        Arc::new(Entry::new(key, u64::from(key), key, None, Some(Arc::new(key))))
    }

    #[test]
    fn drains_in_fifo_order() {
        let buf: AccessBuffer<u32, u32> = AccessBuffer::new(4);
        for k in 0..3 {
            buf.record(entry(k));
        }
        let drained = buf.drain();
        let keys: Vec<u32> = drained.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![0, 1, 2]);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let buf: AccessBuffer<u32, u32> = AccessBuffer::new(2);
        for k in 0..5 {
            buf.record(entry(k));
        }
        let keys: Vec<u32> = buf.drain().iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![3, 4]);
    }
}

//! Self-describing serialized snapshots.
//!
//! A snapshot is the map's configuration followed by every `(key, value)`
//! record and a terminating sentinel record. The sentinel, not the sequence
//! length, marks the end of the data, so a reader can stop without trusting a
//! count written before the records.
//!
//! Writing locks every segment in index order and releases in index order, so
//! the records form a consistent cut of the map. Reading reconstructs the map
//! with minimally-sized segment tables (the eviction policies keep the
//! serialized capacity) and reinserts each record through `put`, letting the
//! ordinary rehash path regrow unbounded tables. The eviction listener is not
//! part of a snapshot, so restored maps report evictions to the no-op
//! listener until the embedder installs another map.

use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::map::{BufferedConcurrentMap, CacheConfig, NullEvictionListener};

impl<K, V, S> Serialize for BufferedConcurrentMap<K, V, S>
where
    K: Hash + Eq + Clone + Serialize,
    V: Serialize,
    S: BuildHasher,
{
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: Serializer,
    {
        // Hold every segment lock, taken in index order, for the whole write.
        let guards: Vec<_> = self.segments().iter().map(|s| s.lock_policy()).collect();
        let mut state = serializer.serialize_struct("BufferedConcurrentMap", 2)?;
        state.serialize_field("config", &self.config)?;
        state.serialize_field("entries", &Records { map: self })?;
        let out = state.end();
        drop(guards);
        out
    }
}

struct Records<'a, K, V, S> {
    map: &'a BufferedConcurrentMap<K, V, S>,
}

impl<K, V, S> Serialize for Records<'_, K, V, S>
where
    K: Hash + Eq + Clone + Serialize,
    V: Serialize,
    S: BuildHasher,
{
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: Serializer,
    {
        let mut seq = serializer.serialize_seq(None)?;
        for segment in self.map.segments() {
            let table = segment.table_snapshot();
            for bucket in table.buckets() {
                let mut node = bucket.load_full();
                while let Some(entry) = node {
                    if let Some(value) = entry.value.load_full() {
                        seq.serialize_element(&Some((&entry.key, &*value)))?;
                    }
                    node = entry.next.clone();
                }
            }
        }
        // Sentinel record marking the end of the data.
        seq.serialize_element(&None::<(&K, &V)>)?;
        seq.end()
    }
}

#[derive(Deserialize)]
struct SnapshotData<K, V> {
    config: CacheConfig,
    entries: Vec<Option<(K, V)>>,
}

impl<'de, K, V, S> Deserialize<'de> for BufferedConcurrentMap<K, V, S>
where
    K: Hash + Eq + Clone + Deserialize<'de>,
    V: Deserialize<'de>,
    S: BuildHasher + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<BufferedConcurrentMap<K, V, S>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let data = SnapshotData::<K, V>::deserialize(deserializer)?;
        let map = BufferedConcurrentMap::with_minimal_tables(
            data.config,
            S::default(),
            Arc::new(NullEvictionListener),
        )
        .map_err(serde::de::Error::custom)?;
        for record in data.entries {
            match record {
                Some((key, value)) => {
                    map.put(key, value);
                }
                None => break,
            }
        }
        Ok(map)
    }
}

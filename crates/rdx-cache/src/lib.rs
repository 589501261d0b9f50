//! # rdx-cache: Segmented Concurrent Cache
//!
//! A hash map supporting full concurrency of retrievals and adjustable expected
//! concurrency for updates, extended with bounded capacity and batched, lock-amortized
//! eviction. It is the working-set cache used by the query runtime to hold hot
//! dictionary entries, access-path samples, and other derived objects.
//!
//! ## Module Overview
//!
//! - **`map`**: The public [`BufferedConcurrentMap`] type: configuration, hashing,
//!   segment selection, and the cross-segment aggregate operations.
//! - **`segment`** (internal): An independently locked partition of the key space.
//!   Readers never block; writers serialize on the segment's mutex.
//! - **`entry`** (internal): Bucket-chain nodes with immutable `next` links, a
//!   release-published value slot, and the LIRS recency state machine.
//! - **`buffer`** (internal): The bounded multi-producer access buffer that batches
//!   hit notifications so eviction bookkeeping can be amortized over many reads.
//! - **`policy`**: The eviction strategy selector, plus the no-op and LRU policy
//!   implementations and their shared operation set.
//! - **`lirs`** (internal): The LIRS eviction policy (Jiang & Zhang), layered over
//!   the segment in terms of a recency stack and a resident queue of cold entries.
//! - **`iter`**: Weakly consistent iteration over keys, values, and entries.
//! - **`snapshot`** (internal): A self-describing serialized snapshot of the map.
//!
//! ## Concurrency Model
//!
//! Each segment is a single mutex domain. Retrieval operations do not take the
//! mutex: every write publishes by a release-store to the segment's element count
//! and every read begins with an acquire-load of it, so a reader observes a
//! consistent bucket chain up to the last completed write. Structural changes
//! (insert, remove, rehash, eviction) happen only under the mutex. Eviction
//! listener callbacks always run on the calling thread after the mutex has been
//! released.

pub mod error;
pub mod iter;
pub mod map;
pub mod policy;

mod buffer;
mod entry;
mod lirs;
mod segment;
mod snapshot;

pub use error::{Error, Result};
pub use iter::{Iter, Keys, Values};
pub use map::{
    BufferedConcurrentMap, CacheConfig, EvictionListener, NullEvictionListener,
};
pub use policy::EvictionStrategy;

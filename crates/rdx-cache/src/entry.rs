//! Bucket-chain entries and the LIRS recency state machine.
//!
//! Entries are the nodes of each segment's bucket chains. Chains are built by
//! front-insertion and a node's `next` link is never mutated after the node is
//! published, which is what makes lock-free chain traversal sound: a reader that
//! captured a chain head always sees a consistent, terminated list even while a
//! writer replaces the head. When a node in the middle of a chain must go away,
//! the writer clones every node preceding it instead of relinking in place.
//!
//! The value slot is the one mutable field a reader observes. Overwrites publish
//! the new value with release semantics; a reader therefore sees either the old
//! or the new value. The `None` branch of [`Entry::value`] exists only for the
//! narrow reordering window in which an unsynchronized read could observe an
//! entry before its value store; callers fall back to a re-read under the
//! segment lock in that case.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Recency classification of a cache entry, used by the LIRS policy.
///
/// LIR entries form the hot, always-resident set. HIR entries are the cold set;
/// a HIR entry may remain known to the policy after its value has been evicted
/// (`HirNonResident`), so that a re-reference can be recognized and promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Recency {
    /// Cold and resident. The initial state of every entry.
    HirResident = 0,
    /// Hot and resident.
    LirResident = 1,
    /// Cold and evicted from the segment.
    HirNonResident = 2,
}

impl Recency {
    fn from_u8(raw: u8) -> Recency {
        match raw {
            0 => Recency::HirResident,
            1 => Recency::LirResident,
            2 => Recency::HirNonResident,
            _ => unreachable!("invalid recency discriminant: {raw}"),
        }
    }
}

/// A node in a segment's bucket chain.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    /// The key's full hash, before bit spreading. Combined with [`Entry::hash`]
    /// to form the entry's hash identity.
    pub(crate) key_hash: u64,
    /// The spread hash used for segment and bucket selection.
    pub(crate) hash: u32,
    /// Successor in the bucket chain. Immutable after publication.
    pub(crate) next: Option<Arc<Entry<K, V>>>,
    /// The mapped value. Release-stored on overwrite so lock-free readers see
    /// either the previous or the new value, never a torn one.
    pub(crate) value: ArcSwapOption<V>,
    state: AtomicU8,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(
        key: K,
        key_hash: u64,
        hash: u32,
        next: Option<Arc<Entry<K, V>>>,
        value: Option<Arc<V>>,
    ) -> Entry<K, V> {
        Entry {
            key,
            key_hash,
            hash,
            next,
            value: ArcSwapOption::new(value),
            state: AtomicU8::new(Recency::HirResident as u8),
        }
    }

    /// Hash identity of this entry: a mix of the spread hash and the raw key
    /// hash. Two incarnations of the same key share an identity, which is what
    /// lets the LIRS stack recognize a re-inserted key.
    pub(crate) fn ident(&self) -> u64 {
        (17u64
            .wrapping_mul(31)
            .wrapping_add(u64::from(self.hash)))
        .wrapping_mul(31)
        .wrapping_add(self.key_hash)
    }

    pub(crate) fn recency(&self) -> Recency {
        Recency::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn transition_hir_resident_to_lir_resident(&self) {
        self.transition(Recency::HirResident, Recency::LirResident);
    }

    pub(crate) fn transition_hir_resident_to_hir_non_resident(&self) {
        self.transition(Recency::HirResident, Recency::HirNonResident);
    }

    pub(crate) fn transition_hir_non_resident_to_lir_resident(&self) {
        self.transition(Recency::HirNonResident, Recency::LirResident);
    }

    pub(crate) fn transition_lir_resident_to_hir_resident(&self) {
        self.transition(Recency::LirResident, Recency::HirResident);
    }

    /// Transitions assert the strict source state; any other source is a policy
    /// bookkeeping bug and aborts.
    fn transition(&self, from: Recency, to: Recency) {
        let prev = self.state.swap(to as u8, Ordering::AcqRel);
        assert_eq!(
            Recency::from_u8(prev),
            from,
            "recency transition to {to:?} from wrong source state"
        );
    }
}

impl<K: Eq, V> Entry<K, V> {
    /// Entry equality is by `(hash, key)`. Distinct incarnations of the same
    /// key compare equal, which the policies rely on when a removal replaces
    /// chain nodes with clones.
    pub(crate) fn same_key(&self, other: &Entry<K, V>) -> bool {
        self.hash == other.hash && self.key == other.key
    }
}

impl<K, V> std::fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("hash", &self.hash)
            .field("state", &self.recency())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u32) -> Entry<u32, u32> {
        Entry::new(key, u64::from(key), key, None, Some(Arc::new(key)))
    }

    #[test]
    fn initial_state_is_hir_resident() {
        assert_eq!(entry(1).recency(), Recency::HirResident);
    }

    #[test]
    fn permitted_transitions() {
        let e = entry(1);
        e.transition_hir_resident_to_lir_resident();
        assert_eq!(e.recency(), Recency::LirResident);
        e.transition_lir_resident_to_hir_resident();
        assert_eq!(e.recency(), Recency::HirResident);
        e.transition_hir_resident_to_hir_non_resident();
        assert_eq!(e.recency(), Recency::HirNonResident);
        e.transition_hir_non_resident_to_lir_resident();
        assert_eq!(e.recency(), Recency::LirResident);
    }

    #[test]
    #[should_panic(expected = "wrong source state")]
    fn transition_from_wrong_source_aborts() {
        let e = entry(1);
        // HIR_RESIDENT, not LIR_RESIDENT: must abort.
        e.transition_lir_resident_to_hir_resident();
    }

    #[test]
    fn same_key_ignores_identity() {
        let a = entry(7);
        let b = entry(7);
        let c = entry(8);
        assert!(a.same_key(&b));
        assert!(!a.same_key(&c));
        assert_eq!(a.ident(), b.ident());
    }
}

//! Comparator and hash function objects for index keys.
//!
//! The index never assumes anything about its key type beyond what the
//! caller's comparator and hasher provide, mirroring how user-defined key
//! types plug into the catalog layers above.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Three-way comparison of index keys.
pub trait KeyComparator<K>: Send + Sync {
    /// Compares two keys.
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Comparator delegating to the key type's `Ord`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyComparator;

impl<K: Ord> KeyComparator<K> for DefaultKeyComparator {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

/// Hash function object for index keys.
pub trait KeyHasher<K>: Send + Sync {
    /// Hashes a key to a slot-selection value.
    fn hash_key(&self, key: &K) -> u64;
}

/// Hasher delegating to the key type's `Hash` (SipHash).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyHasher;

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

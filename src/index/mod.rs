//! Disk-resident index structures.
//!
//! This module provides the linear-probing hash index
//! ([`LinearProbeHashTable`]) together with the comparator and hash
//! function traits callers supply for their key types.

mod key;
mod linear_probe;

pub use key::{DefaultKeyComparator, DefaultKeyHasher, KeyComparator, KeyHasher};
pub use linear_probe::LinearProbeHashTable;

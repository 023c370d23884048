//! Page identifier type.

use serde::{Deserialize, Serialize};

/// Unique identifier for a page in the database file.
///
/// Page ids are dense integers handed out by the disk manager. The all-ones
/// value is reserved as the [`PageId::INVALID`] sentinel and never refers to
/// a real page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(u32);

/// Sentinel id for "no page".
pub const INVALID_PAGE_ID: PageId = PageId::INVALID;

impl PageId {
    /// Sentinel id for "no page".
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Creates a page id from a raw page index.
    #[must_use]
    pub const fn new(page_idx: u32) -> Self {
        Self(page_idx)
    }

    /// Returns the raw page index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.0
    }

    /// Returns the byte offset of this page within the database file.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.0 as u64) * (super::PAGE_SIZE as u64)
    }

    /// Returns true unless this is the [`PageId::INVALID`] sentinel.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Page({})", self.0)
        } else {
            write!(f, "Page(invalid)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PAGE_SIZE;

    #[test]
    fn test_page_id_offset() {
        assert_eq!(PageId::new(0).offset(), 0);
        assert_eq!(PageId::new(1).offset(), PAGE_SIZE as u64);
        assert_eq!(PageId::new(10).offset(), 10 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId::new(0).is_valid());
        assert!(PageId::new(12345).is_valid());
        assert!(!PageId::INVALID.is_valid());
        assert!(!INVALID_PAGE_ID.is_valid());
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId::new(7).to_string(), "Page(7)");
        assert_eq!(PageId::INVALID.to_string(), "Page(invalid)");
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId::new(1));
        set.insert(PageId::new(2));
        set.insert(PageId::new(1)); // Duplicate

        assert_eq!(set.len(), 2);
    }
}

//! Disk manager for page-level I/O.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{MinirelError, Result};
use crate::storage::page::{PageData, PageId, PAGE_SIZE};

/// Manages disk I/O for database pages.
///
/// The disk manager handles:
/// - Reading and writing pages to/from disk
/// - Allocating and deallocating page ids
/// - Managing the database file
///
/// Deallocated ids are recycled: `allocate_page` hands them out again before
/// extending the file, so a caller that deletes as many pages as it creates
/// keeps the file from growing without bound.
pub struct DiskManager {
    /// Path to the database file.
    path: PathBuf,
    /// File handle for the database file.
    file: File,
    /// Next never-used page index.
    next_page_idx: u32,
    /// Page ids returned by `deallocate_page`, available for reuse.
    free_pages: BTreeSet<PageId>,
}

impl DiskManager {
    /// Opens or creates a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                MinirelError::StorageError(format!("Failed to open database file: {e}"))
            })?;

        let file_len = file
            .metadata()
            .map_err(|e| MinirelError::StorageError(format!("Failed to get file metadata: {e}")))?
            .len();

        // Calculate next page index from file size
        let next_page_idx = if file_len == 0 {
            0
        } else {
            file_len.div_ceil(PAGE_SIZE as u64) as u32
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_page_idx,
            free_pages: BTreeSet::new(),
        })
    }

    /// Returns the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages in the database file.
    #[must_use]
    pub fn num_pages(&self) -> u32 {
        self.next_page_idx
    }

    /// Returns the number of deallocated pages awaiting reuse.
    #[must_use]
    pub fn num_free_pages(&self) -> usize {
        self.free_pages.len()
    }

    /// Fills `buf` with the page's on-disk bytes.
    ///
    /// A page that has never been written (beyond the current file size)
    /// reads as all zeroes.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails; `buf` contents are unspecified
    /// in that case.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut PageData) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(page_id.offset()))
            .map_err(|e| MinirelError::StorageError(format!("Failed to seek to page: {e}")))?;

        match self.file.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Page was never written
                buf.fill(0);
                Ok(())
            }
            Err(e) => Err(MinirelError::StorageError(format!(
                "Failed to read page {page_id}: {e}"
            ))),
        }
    }

    /// Persists `data` as the page's on-disk bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_page(&mut self, page_id: PageId, data: &PageData) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(page_id.offset()))
            .map_err(|e| MinirelError::StorageError(format!("Failed to seek to page: {e}")))?;

        self.file
            .write_all(data)
            .map_err(|e| MinirelError::StorageError(format!("Failed to write page: {e}")))?;

        Ok(())
    }

    /// Allocates a page id, reusing a deallocated one when available.
    ///
    /// Freshly extended pages are not written until the caller does so.
    ///
    /// # Errors
    ///
    /// Returns an error if file extension fails.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        if let Some(&recycled) = self.free_pages.iter().next() {
            self.free_pages.remove(&recycled);
            return Ok(recycled);
        }

        let page_id = PageId::new(self.next_page_idx);
        self.next_page_idx += 1;

        // Extend the file to include the new page
        let new_size = u64::from(self.next_page_idx) * PAGE_SIZE as u64;
        self.file
            .set_len(new_size)
            .map_err(|e| MinirelError::StorageError(format!("Failed to extend file: {e}")))?;

        Ok(page_id)
    }

    /// Marks a page id as recyclable.
    ///
    /// # Errors
    ///
    /// Returns an error if the id was never allocated or is already free.
    pub fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() || page_id.index() >= self.next_page_idx {
            return Err(MinirelError::StorageError(format!(
                "Cannot deallocate unallocated page {page_id}"
            )));
        }
        if !self.free_pages.insert(page_id) {
            return Err(MinirelError::StorageError(format!(
                "Double deallocation of page {page_id}"
            )));
        }
        Ok(())
    }

    /// Flushes all buffered writes to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| MinirelError::StorageError(format!("Failed to sync file: {e}")))
    }

    /// Returns the size of the database file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn file_size(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| MinirelError::StorageError(format!("Failed to get file size: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_dm() -> (DiskManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let dm = DiskManager::new(&db_path).unwrap();
        (dm, temp_dir)
    }

    #[test]
    fn test_create_disk_manager() {
        let (dm, _temp) = create_test_dm();
        assert_eq!(dm.num_pages(), 0);
        assert_eq!(dm.num_free_pages(), 0);
    }

    #[test]
    fn test_allocate_page() {
        let (mut dm, _temp) = create_test_dm();

        let page1 = dm.allocate_page().unwrap();
        assert_eq!(page1.index(), 0);

        let page2 = dm.allocate_page().unwrap();
        assert_eq!(page2.index(), 1);

        assert_eq!(dm.num_pages(), 2);
    }

    #[test]
    fn test_read_write_page() {
        let (mut dm, _temp) = create_test_dm();

        let page_id = dm.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[100] = 0xFF;
        dm.write_page(page_id, &data).unwrap();

        // Pre-poison the output buffer to prove every byte is overwritten
        let mut out = [0xEEu8; PAGE_SIZE];
        dm.read_page(page_id, &mut out).unwrap();
        assert_eq!(out[0], 42);
        assert_eq!(out[100], 0xFF);
        assert!(out[1..100].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_nonexistent_page_zero_fills() {
        let (mut dm, _temp) = create_test_dm();

        // A page beyond the end of the file reads as zeroes, even into a
        // dirty buffer
        let mut buf = [0xEEu8; PAGE_SIZE];
        dm.read_page(PageId::new(100), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deallocate_and_reuse() {
        let (mut dm, _temp) = create_test_dm();

        let p0 = dm.allocate_page().unwrap();
        let p1 = dm.allocate_page().unwrap();
        dm.deallocate_page(p0).unwrap();
        assert_eq!(dm.num_free_pages(), 1);

        // Recycled id comes back before the file grows
        let p2 = dm.allocate_page().unwrap();
        assert_eq!(p2, p0);
        assert_eq!(dm.num_free_pages(), 0);
        assert_eq!(dm.num_pages(), 2);

        let p3 = dm.allocate_page().unwrap();
        assert_ne!(p3, p1);
        assert_eq!(p3.index(), 2);
    }

    #[test]
    fn test_deallocate_errors() {
        let (mut dm, _temp) = create_test_dm();

        assert!(dm.deallocate_page(PageId::new(5)).is_err());
        assert!(dm.deallocate_page(PageId::INVALID).is_err());

        let p0 = dm.allocate_page().unwrap();
        dm.deallocate_page(p0).unwrap();
        assert!(dm.deallocate_page(p0).is_err());
    }

    #[test]
    fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Write data
        {
            let mut dm = DiskManager::new(&db_path).unwrap();
            let page_id = dm.allocate_page().unwrap();

            let mut data = [0u8; PAGE_SIZE];
            data[0..4].copy_from_slice(&[1, 2, 3, 4]);
            dm.write_page(page_id, &data).unwrap();
            dm.sync().unwrap();
        }

        // Read in new instance
        {
            let mut dm = DiskManager::new(&db_path).unwrap();
            assert_eq!(dm.num_pages(), 1);

            let mut data = [0u8; PAGE_SIZE];
            dm.read_page(PageId::new(0), &mut data).unwrap();
            assert_eq!(&data[0..4], &[1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_file_size() {
        let (mut dm, _temp) = create_test_dm();

        dm.allocate_page().unwrap();
        dm.allocate_page().unwrap();

        let size = dm.file_size().unwrap();
        assert_eq!(size, 2 * PAGE_SIZE as u64);
    }
}

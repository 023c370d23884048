//! Buffer pool management for page caching.
//!
//! This module implements a fixed-capacity buffer pool that caches database
//! pages in memory. It provides:
//! - Page pinning and unpinning with reference counting
//! - Clock (second-chance) eviction policy
//! - RAII guards ([`PageGuard`]) for safe page access with per-frame latches
//!
//! # Latching
//!
//! One pool mutex serializes all metadata mutations (page table, free list,
//! frame metadata) and is held for the entirety of every pool operation,
//! including the disk I/O performed inside fetch and eviction. Each frame
//! additionally carries a reader/writer page latch guarding its payload;
//! users acquire it through the guard after fetch returns and release it
//! before the guard drops. The replacer keeps its own internal mutex and is
//! never locked while waiting on anything else.
//!
//! # Example
//!
//! ```ignore
//! let pool = BufferPoolManager::new(capacity, disk_manager, None);
//! let guard = pool.new_page()?.expect("all frames pinned");
//! guard.data_mut()[0] = 42;
//! guard.mark_dirty();
//! // Page unpinned (dirty) when the guard drops
//! ```

mod buffer_frame;
mod clock_replacer;

pub use buffer_frame::{BufferFrame, FrameData};
pub use clock_replacer::{ClockReplacer, FrameId};

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::{MinirelError, Result};
use crate::storage::page::{DiskManager, PageData, PageId};
use crate::storage::wal::WalWriter;

/// Result of flushing a single page.
///
/// Separates "nothing to write" from a real failure: a clean resident page
/// is a successful no-op, while a non-resident page is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The dirty payload was written back and the dirty flag cleared.
    Flushed,
    /// The page is resident but clean; no write was performed.
    Clean,
}

/// Pool metadata, serialized by the pool latch.
struct PoolState {
    /// Frame metadata, indexed by frame id.
    frames: Vec<BufferFrame>,
    /// Maps resident page ids to frame ids.
    page_table: HashMap<PageId, FrameId>,
    /// Frames not currently holding any page, consumed FIFO.
    free_list: VecDeque<FrameId>,
    /// Disk manager for page I/O and allocation.
    disk: DiskManager,
}

/// Fixed-capacity buffer pool with clock replacement.
pub struct BufferPoolManager {
    /// Number of frames in the pool.
    pool_size: usize,
    /// Frame payloads; stable cells shared with page guards.
    frame_data: Vec<FrameData>,
    /// Metadata under the pool latch.
    state: Mutex<PoolState>,
    /// Eviction policy.
    replacer: ClockReplacer,
    /// Write-ahead log service, reserved for outer layers.
    wal: Option<Arc<WalWriter>>,
    /// Counter for cache hits (page found in buffer pool).
    cache_hits: AtomicU64,
    /// Counter for cache misses (page had to be loaded from disk).
    cache_misses: AtomicU64,
    /// Counter for number of pages evicted.
    evictions: AtomicU64,
}

impl BufferPoolManager {
    /// Creates a buffer pool with `pool_size` frames over `disk`.
    ///
    /// The WAL writer is stored for outer layers to retrieve via [`wal`];
    /// the pool itself never appends to it.
    ///
    /// [`wal`]: BufferPoolManager::wal
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is zero.
    #[must_use]
    pub fn new(pool_size: usize, disk: DiskManager, wal: Option<Arc<WalWriter>>) -> Self {
        assert!(pool_size > 0, "buffer pool must have at least one frame");

        // Initially, every frame is in the free list.
        let frames = (0..pool_size).map(BufferFrame::new).collect();
        let free_list = (0..pool_size).collect();
        let frame_data = (0..pool_size).map(|_| FrameData::new()).collect();

        Self {
            pool_size,
            frame_data,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                disk,
            }),
            replacer: ClockReplacer::new(pool_size),
            wal,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the number of frames in the pool.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of pages currently resident.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Returns the reserved WAL writer, if one was supplied.
    #[must_use]
    pub fn wal(&self) -> Option<&Arc<WalWriter>> {
        self.wal.as_ref()
    }

    /// Returns the pin count of a resident page, or `None` if not resident.
    #[must_use]
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(state.frames[frame_id].pin_count)
    }

    /// Returns the number of deallocated disk pages awaiting reuse.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.state.lock().disk.num_free_pages()
    }

    /// Returns the total number of pages allocated in the database file.
    #[must_use]
    pub fn file_page_count(&self) -> u32 {
        self.state.lock().disk.num_pages()
    }

    /// Fetches a page, loading it from disk if necessary.
    ///
    /// Returns `Ok(None)` if the page is not resident and every frame is
    /// pinned. The returned guard keeps the page pinned until dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if disk I/O fails.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<PageGuard<'_>>> {
        let mut state = self.state.lock();

        // Already resident: pin and return
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.replacer.pin(frame_id);
            state.frames[frame_id].pin();
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(self.guard(page_id, frame_id)));
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            return Ok(None);
        };

        // Read the requested page directly into the payload
        let read = state
            .disk
            .read_page(page_id, &mut self.frame_data[frame_id].write());
        if let Err(e) = read {
            // The frame was already detached from its old page; park it on
            // the free list rather than leaking it.
            state.frames[frame_id].reset();
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        self.install(&mut state, page_id, frame_id);
        Ok(Some(self.guard(page_id, frame_id)))
    }

    /// Allocates a fresh page and pins it.
    ///
    /// Returns `Ok(None)` if every frame is pinned; the freshly allocated
    /// page id is returned to the disk manager in that case. The new page's
    /// payload is zeroed and never read from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn new_page(&self) -> Result<Option<PageGuard<'_>>> {
        let mut state = self.state.lock();

        let page_id = state.disk.allocate_page()?;
        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            state.disk.deallocate_page(page_id)?;
            return Ok(None);
        };

        self.frame_data[frame_id].zero();
        self.install(&mut state, page_id, frame_id);
        Ok(Some(self.guard(page_id, frame_id)))
    }

    /// Drops one pin on a page, recording the dirty hint.
    ///
    /// Returns `false` if the page is not resident or its pin count is
    /// already zero; no state changes in that case.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return false;
        }
        frame.dirty |= is_dirty;
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a resident page back to disk if it is dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if the page is not resident or the write fails.
    pub fn flush_page(&self, page_id: PageId) -> Result<FlushOutcome> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Err(MinirelError::BufferPoolError(format!(
                "Cannot flush non-resident page {page_id}"
            )));
        };
        if !state.frames[frame_id].dirty {
            return Ok(FlushOutcome::Clean);
        }
        state
            .disk
            .write_page(page_id, &self.frame_data[frame_id].read())?;
        state.frames[frame_id].dirty = false;
        Ok(FlushOutcome::Flushed)
    }

    /// Flushes every dirty resident page.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails.
    pub fn flush_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        for frame_id in 0..self.pool_size {
            let Some(page_id) = state.frames[frame_id].page_id else {
                continue;
            };
            if !state.frames[frame_id].dirty {
                continue;
            }
            state
                .disk
                .write_page(page_id, &self.frame_data[frame_id].read())?;
            state.frames[frame_id].dirty = false;
        }
        Ok(())
    }

    /// Deletes a page, freeing its frame and deallocating its id.
    ///
    /// Returns `Ok(false)` if the page is resident and pinned. A page that
    /// is not resident is deallocated directly.
    ///
    /// # Errors
    ///
    /// Returns an error if deallocation fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            state.disk.deallocate_page(page_id)?;
            return Ok(true);
        };
        if state.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        state.frames[frame_id].reset();
        self.frame_data[frame_id].zero();
        // The frame moves to the free list; take it back out of the clock
        // so a sweep cannot hand it out a second time.
        self.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
        state.disk.deallocate_page(page_id)?;
        debug!(page_id = page_id.index(), frame_id, "deleted page");
        Ok(true)
    }

    /// Returns buffer pool statistics.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut dirty_count = 0;
        let mut pinned_count = 0;

        for frame in &state.frames {
            if frame.page_id.is_some() {
                if frame.dirty {
                    dirty_count += 1;
                }
                if frame.pin_count > 0 {
                    pinned_count += 1;
                }
            }
        }

        BufferPoolStats {
            capacity: self.pool_size,
            pages_used: state.page_table.len(),
            dirty_pages: dirty_count,
            pinned_pages: pinned_count,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Resets the cache statistics counters.
    pub fn reset_stats(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Obtains a frame for a new residency: free list first, then the
    /// replacer. Evicts (and flushes if dirty) the victim's old page.
    ///
    /// Returns `Ok(None)` if every frame is pinned.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.replacer.victim() else {
            return Ok(None);
        };

        let (old_page_id, dirty) = {
            let frame = &state.frames[frame_id];
            (frame.page_id, frame.dirty)
        };
        if let Some(old_page_id) = old_page_id {
            if dirty {
                state
                    .disk
                    .write_page(old_page_id, &self.frame_data[frame_id].read())?;
                state.frames[frame_id].dirty = false;
            }
            state.page_table.remove(&old_page_id);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(
                evicted = old_page_id.index(),
                frame_id,
                was_dirty = dirty,
                "evicted page"
            );
        }
        Ok(Some(frame_id))
    }

    /// Installs a page into a detached frame and records the residency.
    fn install(&self, state: &mut PoolState, page_id: PageId, frame_id: FrameId) {
        let frame = &mut state.frames[frame_id];
        frame.page_id = Some(page_id);
        frame.pin_count = 1;
        frame.dirty = false;
        state.page_table.insert(page_id, frame_id);
    }

    fn guard(&self, page_id: PageId, frame_id: FrameId) -> PageGuard<'_> {
        PageGuard {
            pool: self,
            data: &self.frame_data[frame_id],
            page_id,
            dirty: Cell::new(false),
        }
    }
}

/// RAII guard for a pinned page.
///
/// Grants access to the page payload through the per-frame latch and unpins
/// the page (with the recorded dirty hint) when dropped. Latch guards
/// borrow from the page guard, so they are necessarily released first.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    data: &'a FrameData,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl PageGuard<'_> {
    /// Returns the page ID.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquires the page latch in shared mode and returns the payload.
    #[must_use]
    pub fn data(&self) -> RwLockReadGuard<'_, PageData> {
        self.data.read()
    }

    /// Acquires the page latch in exclusive mode and returns the payload.
    ///
    /// Does not mark the page dirty by itself: probe paths latch pages
    /// exclusively without modifying them. Call [`mark_dirty`] after an
    /// actual write.
    ///
    /// [`mark_dirty`]: PageGuard::mark_dirty
    #[must_use]
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, PageData> {
        self.data.write()
    }

    /// Records that the payload was modified; the drop-time unpin will
    /// carry the dirty hint.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty.get());
    }
}

/// Statistics about the buffer pool state.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Maximum number of pages the pool can hold.
    pub capacity: usize,
    /// Current number of pages in the pool.
    pub pages_used: usize,
    /// Number of dirty pages.
    pub dirty_pages: usize,
    /// Number of pinned pages.
    pub pinned_pages: usize,
    /// Number of cache hits (page found in buffer pool).
    pub cache_hits: u64,
    /// Number of cache misses (page had to be loaded from disk).
    pub cache_misses: u64,
    /// Number of pages evicted.
    pub evictions: u64,
}

impl BufferPoolStats {
    /// Calculates the cache hit rate as a fraction (0.0 to 1.0).
    ///
    /// Returns `None` if there have been no cache accesses.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            None
        } else {
            Some(self.cache_hits as f64 / total as f64)
        }
    }

    /// Returns the total number of cache accesses (hits + misses).
    #[must_use]
    pub fn total_accesses(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }
}

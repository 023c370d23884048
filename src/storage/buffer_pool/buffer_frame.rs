//! Buffer frame metadata and payload cells.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::buffer_pool::FrameId;
use crate::storage::page::{PageData, PageId, PAGE_SIZE};

/// Metadata of a frame in the buffer pool.
///
/// Each frame tracks:
/// - The page currently loaded (if any)
/// - Whether the page has been modified (dirty)
/// - How many operations are currently using the page (pin count)
///
/// All fields are guarded by the pool latch; the page bytes themselves live
/// in the companion [`FrameData`] cell.
#[derive(Debug)]
pub struct BufferFrame {
    /// Index of this frame in the buffer pool.
    pub frame_id: FrameId,
    /// The page currently loaded in this frame, if any.
    pub page_id: Option<PageId>,
    /// Number of active references to this page.
    pub pin_count: u32,
    /// Whether the page has been modified since last flush.
    pub dirty: bool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    #[must_use]
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: None,
            pin_count: 0,
            dirty: false,
        }
    }

    /// Increments the pin count.
    pub fn pin(&mut self) {
        self.pin_count = self.pin_count.saturating_add(1);
    }

    /// Returns whether this frame is empty (no page loaded).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.page_id.is_none()
    }

    /// Resets the frame to empty state.
    pub fn reset(&mut self) {
        self.page_id = None;
        self.pin_count = 0;
        self.dirty = false;
    }
}

/// Payload of a frame: one page worth of bytes behind the per-frame latch.
///
/// The `RwLock` is the page latch of the frame: readers of the resident
/// page take it shared, mutators take it exclusive. The cell is shared with
/// page guards and outlives any single residency, so latch acquisition
/// never races with eviction (pin counts keep victims user-free).
pub struct FrameData {
    latch: RwLock<PageData>,
}

impl FrameData {
    /// Creates a zeroed payload cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            latch: RwLock::new([0u8; PAGE_SIZE]),
        }
    }

    /// Acquires the page latch in shared mode.
    pub fn read(&self) -> RwLockReadGuard<'_, PageData> {
        self.latch.read()
    }

    /// Acquires the page latch in exclusive mode.
    pub fn write(&self) -> RwLockWriteGuard<'_, PageData> {
        self.latch.write()
    }

    /// Zeroes the payload.
    pub fn zero(&self) {
        self.latch.write().fill(0);
    }
}

impl Default for FrameData {
    fn default() -> Self {
        Self::new()
    }
}

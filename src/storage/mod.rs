//! Storage layer for minirel.
//!
//! This module provides:
//! - Page-level I/O ([`page`]): fixed-size pages, page ids, the disk manager
//! - Buffer pool management ([`buffer_pool`]): frame table, clock replacement,
//!   RAII page guards
//! - Write-ahead logging ([`wal`]): reserved log service for outer layers

pub mod buffer_pool;
pub mod page;
pub mod wal;

// Re-export commonly used types
pub use buffer_pool::{
    BufferPoolManager, BufferPoolStats, ClockReplacer, FlushOutcome, FrameId, PageGuard,
};
pub use page::{DiskManager, PageData, PageId, Storable, INVALID_PAGE_ID, PAGE_SIZE};
pub use wal::{WalRecord, WalRecordType, WalWriter};

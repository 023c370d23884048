//! minirel — the storage-engine core of an educational relational database.
//!
//! The crate provides three layered components:
//! - Page-level disk I/O ([`storage::page`])
//! - A fixed-capacity buffer pool with clock-based page replacement
//!   ([`storage::buffer_pool`])
//! - A disk-resident linear-probing hash index backed entirely by the
//!   buffer pool ([`index`])

pub mod error;
pub mod index;
pub mod storage;
pub mod tx;

pub use error::{MinirelError, Result};

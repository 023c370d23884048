//! Disk-resident linear-probing hash table.
//!
//! The table is a paged open-addressed hash index. A header page lists the
//! ids of its block pages; each block page stores entries with parallel
//! `occupied`/`readable` bitmaps. Every page access goes through the buffer
//! pool, and no page reference survives its unpin.
//!
//! # Latching
//!
//! A table-level reader/writer latch (holding the current header page id)
//! gates structural changes: point operations take it shared, resize takes
//! it exclusive. Below it, page latches are acquired in table → header →
//! block order; the header latch and one block latch overlap during a probe
//! step, block latches never overlap each other. The probe helpers take the
//! header page id as a parameter and never touch the table latch, so the
//! resize path can re-insert entries while holding the latch exclusively.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{MinirelError, Result};
use crate::index::key::{KeyComparator, KeyHasher};
use crate::storage::buffer_pool::{BufferPoolManager, PageGuard};
use crate::storage::page::hash_table_block_page::{
    block_array_size, HashTableBlock, HashTableBlockMut,
};
use crate::storage::page::hash_table_header_page::{
    header_max_blocks, HashTableHeader, HashTableHeaderMut,
};
use crate::storage::page::{PageId, Storable};
use crate::tx::Transaction;

/// Result of one probe-insert pass.
#[derive(Debug, Clone, Copy)]
enum ProbeOutcome {
    /// The pair was written into a free or tombstoned slot.
    Inserted,
    /// The exact pair already exists live in the table.
    Duplicate,
    /// The probe wrapped to its start slot: no free slot for this key.
    Full { capacity: usize },
}

/// Per-slot step decision, computed while the block latch is held.
enum Step<T> {
    Done(T),
    NextBlock,
}

/// A linear-probing hash table over `(K, V)` pairs.
///
/// `C` supplies key comparison and `H` the hash function; both are caller
/// objects, so keys only need a fixed-width on-page encoding
/// ([`Storable`]). Values are compared with `PartialEq` for the exact-pair
/// semantics of insert and remove.
pub struct LinearProbeHashTable<K, V, C = super::DefaultKeyComparator, H = super::DefaultKeyHasher>
{
    name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    hasher: H,
    /// Table latch; the guarded value is the current header page id.
    header: RwLock<PageId>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, H> LinearProbeHashTable<K, V, C, H>
where
    K: Storable,
    V: Storable + PartialEq,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a hash table with `num_blocks` block pages.
    ///
    /// Allocates the header page and every block page through the buffer
    /// pool; block pages start zeroed (all slots empty).
    ///
    /// # Errors
    ///
    /// Returns an error if `num_blocks` is zero or exceeds what a header
    /// page can hold, or if the buffer pool cannot supply the pages.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        num_blocks: usize,
        hasher: H,
    ) -> Result<Self> {
        let name = name.into();
        if num_blocks == 0 {
            return Err(MinirelError::IndexError(format!(
                "Hash table {name} needs at least one block page"
            )));
        }
        if num_blocks > header_max_blocks() {
            return Err(MinirelError::IndexError(format!(
                "Hash table {name} cannot hold {num_blocks} block pages (max {})",
                header_max_blocks()
            )));
        }

        let header_page_id = Self::build_table(&bpm, &name, num_blocks)?;
        Ok(Self {
            name,
            bpm,
            comparator,
            hasher,
            header: RwLock::new(header_page_id),
            _marker: PhantomData,
        })
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current header page id.
    #[must_use]
    pub fn header_page_id(&self) -> PageId {
        *self.header.read()
    }

    /// Returns the total number of slots (`num_blocks × B`).
    ///
    /// # Errors
    ///
    /// Returns an error if the header page cannot be fetched.
    pub fn size(&self) -> Result<usize> {
        let table = self.header.read();
        let header_guard = self.fetch(*table)?;
        let header_data = header_guard.data();
        let header = HashTableHeader::new(&header_data[..]);
        Ok(header.num_blocks() * block_array_size::<K, V>())
    }

    /// Collects every live value stored under `key`.
    ///
    /// Returns an empty vector on a definitive miss.
    ///
    /// # Errors
    ///
    /// Returns an error if page fetches fail.
    pub fn get_value(&self, _txn: Option<&Transaction>, key: &K) -> Result<Vec<V>> {
        let table = self.header.read();
        self.probe_get(*table, key)
    }

    /// Inserts the pair `(key, value)`.
    ///
    /// Returns `false` if the identical pair is already present. When the
    /// probe wraps around a full table, the table is resized to twice its
    /// capacity and the insert retried against the new header.
    ///
    /// # Errors
    ///
    /// Returns an error if page operations fail or the resize limit is hit.
    pub fn insert(&self, _txn: Option<&Transaction>, key: &K, value: &V) -> Result<bool> {
        loop {
            let table = self.header.read();
            let outcome = self.probe_insert(*table, key, value)?;
            drop(table);
            match outcome {
                ProbeOutcome::Inserted => return Ok(true),
                ProbeOutcome::Duplicate => return Ok(false),
                ProbeOutcome::Full { capacity } => self.resize(capacity)?,
            }
        }
    }

    /// Removes the pair `(key, value)`, leaving a tombstone.
    ///
    /// Returns `false` if the pair is absent or already removed.
    ///
    /// # Errors
    ///
    /// Returns an error if page operations fail.
    pub fn remove(&self, _txn: Option<&Transaction>, key: &K, value: &V) -> Result<bool> {
        let table = self.header.read();
        self.probe_remove(*table, key, value)
    }

    /// Doubles the table from `old_capacity` slots.
    ///
    /// Holds the table latch exclusively, builds a fresh header with twice
    /// the block pages, transports every readable entry, deletes the old
    /// pages through the buffer pool, and swaps the header id. A racing
    /// insert may already have grown the table; in that case this is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the new geometry does not fit a header page or
    /// page operations fail.
    pub fn resize(&self, old_capacity: usize) -> Result<()> {
        let mut table = self.header.write();
        let b = block_array_size::<K, V>();

        let old_header_id = *table;
        let old_num_blocks = {
            let header_guard = self.fetch(old_header_id)?;
            let header_data = header_guard.data();
            HashTableHeader::new(&header_data[..]).num_blocks()
        };
        if old_num_blocks * b > old_capacity {
            // Lost the race against another resize; the table already grew.
            return Ok(());
        }

        let new_capacity = old_capacity * 2;
        let new_num_blocks = new_capacity / b;
        if new_num_blocks > header_max_blocks() {
            return Err(MinirelError::IndexError(format!(
                "Hash table {} cannot grow to {new_num_blocks} block pages (max {})",
                self.name,
                header_max_blocks()
            )));
        }
        debug!(
            table = %self.name,
            old_capacity,
            new_capacity,
            "resizing hash table"
        );

        let new_header_id = Self::build_table(&self.bpm, &self.name, new_num_blocks)?;

        // Transport every live entry, then delete the old block pages.
        {
            let header_guard = self.fetch(old_header_id)?;
            let header_data = header_guard.data();
            let header = HashTableHeader::new(&header_data[..]);

            for block_index in 0..header.num_blocks() {
                let block_page_id = header.block_page_id(block_index);
                {
                    let block_guard = self.fetch(block_page_id)?;
                    let block_data = block_guard.data();
                    let block = HashTableBlock::<K, V>::new(&block_data[..]);
                    for bucket in 0..b {
                        if !block.is_readable(bucket) {
                            continue;
                        }
                        let key = block.key_at(bucket);
                        let value = block.value_at(bucket);
                        match self.probe_insert(new_header_id, &key, &value)? {
                            ProbeOutcome::Inserted | ProbeOutcome::Duplicate => {}
                            ProbeOutcome::Full { .. } => {
                                return Err(MinirelError::IndexError(format!(
                                    "Hash table {} overflowed during rehash",
                                    self.name
                                )));
                            }
                        }
                    }
                }
                if !self.bpm.delete_page(block_page_id)? {
                    return Err(MinirelError::IndexError(format!(
                        "Old block page {block_page_id} of hash table {} still pinned",
                        self.name
                    )));
                }
            }
        }
        if !self.bpm.delete_page(old_header_id)? {
            return Err(MinirelError::IndexError(format!(
                "Old header page {old_header_id} of hash table {} still pinned",
                self.name
            )));
        }

        *table = new_header_id;
        Ok(())
    }

    /// Allocates and initializes a header page plus `num_blocks` zeroed
    /// block pages; returns the header page id.
    fn build_table(bpm: &BufferPoolManager, name: &str, num_blocks: usize) -> Result<PageId> {
        let header_guard = Self::acquire_new(bpm, name)?;
        let header_page_id = header_guard.page_id();
        {
            let mut header_data = header_guard.data_mut();
            let mut header = HashTableHeaderMut::new(&mut header_data[..]);
            header.set_size(num_blocks as u64);
            header.set_page_id(header_page_id);

            for _ in 0..num_blocks {
                // Fresh pages are zeroed: every slot starts empty. Each
                // block is unpinned clean as soon as it is registered.
                let block_guard = Self::acquire_new(bpm, name)?;
                header.add_block_page_id(block_guard.page_id());
            }
        }
        header_guard.mark_dirty();
        Ok(header_page_id)
    }

    /// Walks the probe sequence collecting matching live values.
    fn probe_get(&self, header_page_id: PageId, key: &K) -> Result<Vec<V>> {
        let b = block_array_size::<K, V>();
        let header_guard = self.fetch(header_page_id)?;
        let header_data = header_guard.data();
        let header = HashTableHeader::new(&header_data[..]);

        let num_blocks = header.num_blocks();
        let capacity = num_blocks * b;
        let start = self.start_slot(key, capacity);
        let mut block_index = start / b;
        let mut bucket = start % b;

        let mut values = Vec::new();
        let mut block_guard = self.fetch(header.block_page_id(block_index))?;
        loop {
            let step = {
                let block_data = block_guard.data();
                let block = HashTableBlock::<K, V>::new(&block_data[..]);
                loop {
                    if !block.is_occupied(bucket) {
                        break Step::Done(());
                    }
                    if block.is_readable(bucket)
                        && self.comparator.compare(&block.key_at(bucket), key) == Ordering::Equal
                    {
                        values.push(block.value_at(bucket));
                    }
                    bucket += 1;
                    if (block_index * b + bucket) % capacity == start {
                        break Step::Done(());
                    }
                    if bucket == b {
                        break Step::NextBlock;
                    }
                }
            };
            match step {
                Step::Done(()) => return Ok(values),
                Step::NextBlock => {
                    bucket = 0;
                    block_index = (block_index + 1) % num_blocks;
                    block_guard = self.fetch(header.block_page_id(block_index))?;
                }
            }
        }
    }

    /// Walks the probe sequence looking for a reclaimable slot.
    ///
    /// Latch-free with respect to the table latch; callers hold it in the
    /// mode appropriate to them.
    fn probe_insert(&self, header_page_id: PageId, key: &K, value: &V) -> Result<ProbeOutcome> {
        let b = block_array_size::<K, V>();
        let header_guard = self.fetch(header_page_id)?;
        let header_data = header_guard.data();
        let header = HashTableHeader::new(&header_data[..]);

        let num_blocks = header.num_blocks();
        let capacity = num_blocks * b;
        let start = self.start_slot(key, capacity);
        let mut block_index = start / b;
        let mut bucket = start % b;

        let mut block_guard = self.fetch(header.block_page_id(block_index))?;
        loop {
            let step = {
                let mut block_data = block_guard.data_mut();
                let mut block = HashTableBlockMut::<K, V>::new(&mut block_data[..]);
                loop {
                    if block.insert(bucket, key, value) {
                        break Step::Done(ProbeOutcome::Inserted);
                    }
                    // The slot is readable, so a live occupant blocks us;
                    // reject only an exact (key, value) duplicate.
                    if self.comparator.compare(&block.key_at(bucket), key) == Ordering::Equal
                        && block.value_at(bucket) == *value
                    {
                        break Step::Done(ProbeOutcome::Duplicate);
                    }
                    bucket += 1;
                    if (block_index * b + bucket) % capacity == start {
                        break Step::Done(ProbeOutcome::Full { capacity });
                    }
                    if bucket == b {
                        break Step::NextBlock;
                    }
                }
            };
            match step {
                Step::Done(outcome) => {
                    if matches!(outcome, ProbeOutcome::Inserted) {
                        block_guard.mark_dirty();
                    }
                    return Ok(outcome);
                }
                Step::NextBlock => {
                    bucket = 0;
                    block_index = (block_index + 1) % num_blocks;
                    block_guard = self.fetch(header.block_page_id(block_index))?;
                }
            }
        }
    }

    /// Walks the probe sequence to tombstone an exact live pair.
    fn probe_remove(&self, header_page_id: PageId, key: &K, value: &V) -> Result<bool> {
        let b = block_array_size::<K, V>();
        let header_guard = self.fetch(header_page_id)?;
        let header_data = header_guard.data();
        let header = HashTableHeader::new(&header_data[..]);

        let num_blocks = header.num_blocks();
        let capacity = num_blocks * b;
        let start = self.start_slot(key, capacity);
        let mut block_index = start / b;
        let mut bucket = start % b;

        let mut block_guard = self.fetch(header.block_page_id(block_index))?;
        loop {
            let step = {
                let mut block_data = block_guard.data_mut();
                let mut block = HashTableBlockMut::<K, V>::new(&mut block_data[..]);
                loop {
                    if !block.is_occupied(bucket) {
                        break Step::Done(false);
                    }
                    if self.comparator.compare(&block.key_at(bucket), key) == Ordering::Equal
                        && block.value_at(bucket) == *value
                    {
                        if block.is_readable(bucket) {
                            block.remove(bucket);
                            break Step::Done(true);
                        }
                        // The pair exists only as a tombstone.
                        break Step::Done(false);
                    }
                    bucket += 1;
                    if (block_index * b + bucket) % capacity == start {
                        break Step::Done(false);
                    }
                    if bucket == b {
                        break Step::NextBlock;
                    }
                }
            };
            match step {
                Step::Done(removed) => {
                    if removed {
                        block_guard.mark_dirty();
                    }
                    return Ok(removed);
                }
                Step::NextBlock => {
                    bucket = 0;
                    block_index = (block_index + 1) % num_blocks;
                    block_guard = self.fetch(header.block_page_id(block_index))?;
                }
            }
        }
    }

    /// Maps a key to its starting logical slot.
    fn start_slot(&self, key: &K, capacity: usize) -> usize {
        (self.hasher.hash_key(key) as usize) % capacity
    }

    /// Fetches a page, treating pool exhaustion as a hard error: the index
    /// pins at most a header and one block at a time, so exhaustion means
    /// the pool is simply too small for the workload.
    fn fetch(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        self.bpm.fetch_page(page_id)?.ok_or_else(|| {
            MinirelError::BufferPoolError(format!(
                "Buffer pool exhausted fetching {page_id} for hash table {}",
                self.name
            ))
        })
    }

    /// Allocates a fresh page, treating pool exhaustion as a hard error.
    fn acquire_new<'a>(bpm: &'a BufferPoolManager, name: &str) -> Result<PageGuard<'a>> {
        bpm.new_page()?.ok_or_else(|| {
            MinirelError::BufferPoolError(format!(
                "Buffer pool exhausted allocating a page for hash table {name}"
            ))
        })
    }
}

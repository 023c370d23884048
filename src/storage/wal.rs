//! Write-Ahead Logging (WAL) service.
//!
//! The storage core reserves a slot for the WAL in the buffer pool
//! constructor but never appends to it itself; recovery and transaction
//! layers above the core own the logging protocol. The writer provides:
//! - A header with magic bytes and a format version
//! - Sequential, checksummed log records
//! - Monotonically increasing log sequence numbers (LSNs)

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{MinirelError, Result};
use crate::storage::page::PageId;

/// Magic bytes for WAL file identification.
pub const WAL_MAGIC: &[u8; 8] = b"MINIWAL\0";

/// Current WAL format version.
pub const WAL_VERSION: u32 = 1;

/// Type of a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Full page image written by an outer layer.
    PageWrite = 1,
    /// Recovery bound marker.
    Checkpoint = 2,
}

impl WalRecordType {
    /// Converts from u8 to `WalRecordType`.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(WalRecordType::PageWrite),
            2 => Some(WalRecordType::Checkpoint),
            _ => None,
        }
    }
}

/// A single log record.
///
/// Encoded layout:
/// ```text
/// [0..8)   lsn: u64
/// [8..9)   record_type: u8
/// [9..13)  page_id: u32
/// [13..17) payload_len: u32
/// [17..)   payload, followed by checksum: u32
/// ```
#[derive(Debug, Clone)]
pub struct WalRecord {
    /// Log sequence number.
    pub lsn: u64,
    /// Record type.
    pub record_type: WalRecordType,
    /// Page the record refers to ([`PageId::INVALID`] for checkpoints).
    pub page_id: PageId,
    /// Record payload.
    pub payload: Vec<u8>,
}

impl WalRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(lsn: u64, record_type: WalRecordType, page_id: PageId, payload: Vec<u8>) -> Self {
        Self {
            lsn,
            record_type,
            page_id,
            payload,
        }
    }

    /// Serializes the record, appending a CRC32 checksum over the body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17 + self.payload.len() + 4);
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.push(self.record_type as u8);
        buf.extend_from_slice(&self.page_id.index().to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserializes a record, verifying its checksum.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated input, unknown record type, or
    /// checksum mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 21 {
            return Err(MinirelError::WalError("Truncated WAL record".into()));
        }
        let body_len = buf.len() - 4;
        let stored = u32::from_le_bytes(buf[body_len..].try_into().unwrap());
        if crc32fast::hash(&buf[..body_len]) != stored {
            return Err(MinirelError::WalError("WAL record checksum mismatch".into()));
        }

        let lsn = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let record_type = WalRecordType::from_u8(buf[8])
            .ok_or_else(|| MinirelError::WalError(format!("Unknown record type: {}", buf[8])))?;
        let page_id = PageId::new(u32::from_le_bytes(buf[9..13].try_into().unwrap()));
        let payload_len = u32::from_le_bytes(buf[13..17].try_into().unwrap()) as usize;
        if 17 + payload_len != body_len {
            return Err(MinirelError::WalError("WAL record length mismatch".into()));
        }

        Ok(Self {
            lsn,
            record_type,
            page_id,
            payload: buf[17..body_len].to_vec(),
        })
    }
}

/// Append-only WAL writer.
pub struct WalWriter {
    inner: Mutex<WalWriterInner>,
    path: PathBuf,
}

struct WalWriterInner {
    file: File,
    next_lsn: u64,
    bytes_written: u64,
}

impl WalWriter {
    /// Creates a WAL file at `path`, truncating any previous log, and
    /// writes the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| MinirelError::WalError(format!("Failed to create WAL file: {e}")))?;

        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(WAL_MAGIC);
        header.extend_from_slice(&WAL_VERSION.to_le_bytes());
        file.write_all(&header)
            .map_err(|e| MinirelError::WalError(format!("Failed to write WAL header: {e}")))?;

        Ok(Self {
            inner: Mutex::new(WalWriterInner {
                file,
                next_lsn: 1,
                bytes_written: header.len() as u64,
            }),
            path: path.to_path_buf(),
        })
    }

    /// Returns the path of the WAL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record and returns its assigned LSN.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append(
        &self,
        record_type: WalRecordType,
        page_id: PageId,
        payload: Vec<u8>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        let record = WalRecord::new(lsn, record_type, page_id, payload);
        let encoded = record.encode();
        inner
            .file
            .write_all(&encoded)
            .map_err(|e| MinirelError::WalError(format!("Failed to append WAL record: {e}")))?;
        inner.next_lsn += 1;
        inner.bytes_written += encoded.len() as u64;
        Ok(lsn)
    }

    /// Returns the LSN the next appended record will receive.
    #[must_use]
    pub fn next_lsn(&self) -> u64 {
        self.inner.lock().next_lsn
    }

    /// Returns the number of bytes written, header included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.lock().bytes_written
    }

    /// Returns whether the log holds no records yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().next_lsn == 1
    }

    /// Forces buffered records to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> Result<()> {
        self.inner
            .lock()
            .file
            .sync_all()
            .map_err(|e| MinirelError::WalError(format!("Failed to sync WAL: {e}")))
    }
}

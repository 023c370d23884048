//! Error types for minirel storage operations.

use thiserror::Error;

/// Result type alias using [`MinirelError`].
pub type Result<T> = std::result::Result<T, MinirelError>;

/// Error types for minirel storage operations.
///
/// Soft conditions (capacity exhaustion, pin-count misuse, missing keys) are
/// reported in-band as `Option`/`bool` by the operations that can hit them;
/// this enum covers the failures that callers cannot recover locally.
#[derive(Debug, Error)]
pub enum MinirelError {
    /// General storage/I/O error.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Page-related errors (bad layout, out-of-range access).
    #[error("Page error: {0}")]
    PageError(String),

    /// Buffer pool errors.
    #[error("Buffer pool error: {0}")]
    BufferPoolError(String),

    /// Hash index errors.
    #[error("Index error: {0}")]
    IndexError(String),

    /// WAL (Write-Ahead Log) errors.
    #[error("WAL error: {0}")]
    WalError(String),
}

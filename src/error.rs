//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key exceeds maximum allowed size
    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Value exceeds maximum allowed size
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Buffer pool has no available frames
    #[error("buffer pool exhausted: no available frames")]
    BufferPoolExhausted,

    /// Invalid operation for the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A buffered-delta tree invariant the replay path depends on did not
    /// hold (e.g. a page load found no matching delta after eviction had
    /// reported one was recorded). This always indicates a bug rather
    /// than a recoverable runtime condition, but is surfaced as an error
    /// rather than a panic so a caller embedding the engine can decide
    /// how to fail.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The delta tree already holds an entry for a page that is being
    /// inserted into it again without having been replayed first.
    #[error("delta tree already has an entry for page {0}")]
    DeltaAlreadyExists(PageId),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

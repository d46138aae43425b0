//! Error types for hashkv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using HashKvError
pub type Result<T> = std::result::Result<T, HashKvError>;

/// Unified error type for hashkv operations
#[derive(Debug, Error)]
pub enum HashKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Read, write, lock, sync or close failed at the OS level
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Creation Errors
    // -------------------------------------------------------------------------
    #[error("Invalid bucket count {0}: must be a power of two in [1, 2048]")]
    InvalidBucketCount(u32),

    // -------------------------------------------------------------------------
    // Request Errors (rejected before any I/O)
    // -------------------------------------------------------------------------
    #[error("{what} too large: {len} bytes (max {max})")]
    TooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Empty key")]
    EmptyKey,

    // -------------------------------------------------------------------------
    // Store / Delete Outcomes
    // -------------------------------------------------------------------------
    /// Insert-only store found the key already present
    #[error("Key already exists")]
    AlreadyExists,

    /// Replace-only store or delete found no such key
    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

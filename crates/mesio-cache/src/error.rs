use std::io;

use crate::session::SessionId;

/// Errors raised by cache entry operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cache entry for {url} is already being written by session {owner}")]
    AlreadyWriting { url: String, owner: SessionId },

    #[error("Session {0} is not the writer of this cache entry")]
    NotWriter(SessionId),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to grow memory cache to {0} bytes")]
    OutOfMemory(usize),

    #[error("Short write: only {written} of {expected} bytes were persisted")]
    ShortWrite { expected: usize, written: usize },

    #[error("Cache entry is corrupted: {0}")]
    Corrupted(String),

    #[error("Cache entry has been deleted")]
    Deleted,

    #[error("Operation requires a disk-backed cache entry")]
    NotDiskBacked,

    #[error("Operation requires a memory-backed cache entry")]
    NotMemoryBacked,

    #[error("Metadata error: {0}")]
    Metadata(String),
}

impl CacheError {
    /// Whether this error is an I/O failure. Short writes count as I/O.
    pub fn is_io(&self) -> bool {
        matches!(self, CacheError::Io(_) | CacheError::ShortWrite { .. })
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;

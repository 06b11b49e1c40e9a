//! # Storage
//!
//! Backing storage of a cache entry. The kind is chosen when the entry is
//! created and never changes afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Storage kind requested at entry creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Disk,
    Memory,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Disk => write!(f, "disk"),
            StorageKind::Memory => write!(f, "memory"),
        }
    }
}

/// Opaque identifier of a memory buffer, handed to collaborators instead of
/// an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BufferHandle(Uuid);

impl BufferHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BufferHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem://{}", self.0)
    }
}

/// External view of a memory buffer.
///
/// `generation` changes every time the buffer is reallocated, so a holder can
/// tell whether data it copied earlier may be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryDescriptor {
    pub length: u64,
    pub handle: BufferHandle,
    pub generation: u64,
}

/// Tagged backing storage of an entry
#[derive(Debug)]
pub enum StorageMode {
    Disk(DiskStorage),
    Memory(MemoryStorage),
}

impl StorageMode {
    pub fn kind(&self) -> StorageKind {
        match self {
            StorageMode::Disk(_) => StorageKind::Disk,
            StorageMode::Memory(_) => StorageKind::Memory,
        }
    }
}

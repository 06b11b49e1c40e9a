//! # Mesio Cache
//!
//! Resource cache entries for the mesio network layer. An entry stores a
//! downloaded (or partially downloaded) remote resource keyed by URL and an
//! optional byte range, together with the validators needed to revalidate it
//! later (ETag, Last-Modified, MIME type, content length).
//!
//! ## Features
//!
//! - Disk-backed entries with a `[cache]` sidecar metadata file
//! - Memory-backed entries exposed through opaque buffer handles
//! - One exclusive writer and any number of independent readers per entry
//! - Resumable writes for extended byte ranges
//! - Corruption detection against the persisted `Content-Length`
//! - Conditional request header generation
//! - Directory housekeeping (sweep, size aggregation, listing)
//!
//! ## Authors
//!
//! - hua0512
//!

pub mod config;
pub mod directory;
pub mod entry;
pub mod error;
pub mod headers;
pub mod housekeeping;
pub mod key;
pub mod metadata;
pub mod reader;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use directory::CacheDirectory;
pub use entry::{CacheEntry, Continuation, EntryFlags, EntrySnapshot};
pub use error::{CacheError, CacheResult};
pub use headers::{
    CacheControl, append_revalidation_headers, apply_response_headers, revalidation_header_map,
};
pub use housekeeping::{CacheFileInfo, list_cache_files, sweep_directory, total_cache_size};
pub use key::{CacheKey, DerivedKey, derive_key};
pub use metadata::{MetadataStore, Properties, SidecarMetadata};
pub use reader::ReadCursor;
pub use session::{SessionId, WriteSession};
pub use storage::{BufferHandle, MemoryDescriptor, StorageKind};

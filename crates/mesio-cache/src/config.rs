//! # Cache Configuration
//!
//! Settings shared by every entry created under one cache directory.

use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Prefix of every file owned by the cache. Sweeps and size aggregation only
/// ever touch files carrying it.
pub const DEFAULT_FILE_PREFIX: &str = "mesio_cache_";

/// Extension used when the URL does not carry a usable one
pub const DEFAULT_EXTENSION: &str = ".dat";

/// Suffix appended to the data filename for the sidecar metadata file
pub const DEFAULT_METADATA_SUFFIX: &str = ".txt";

/// Initial allocation for memory entries without a declared content length
pub const DEFAULT_MEMORY_CAPACITY: usize = 81920;

/// Configuration for a cache directory and its entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding data and sidecar files
    pub cache_dir: PathBuf,
    /// Prefix of every cache file name
    pub file_prefix: String,
    /// Extension used when the URL has none (or a too long one)
    pub default_extension: String,
    /// Suffix of sidecar metadata files
    pub metadata_suffix: String,
    /// First allocation of memory-backed entries
    pub initial_memory_capacity: usize,
    /// Serialize disk reads with the entry lock so a read never overlaps an append
    pub lock_reads: bool,
    /// Call `fsync` on the data file when a writer closes successfully
    pub sync_on_close: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("mesio-cache"),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            default_extension: DEFAULT_EXTENSION.to_string(),
            metadata_suffix: DEFAULT_METADATA_SUFFIX.to_string(),
            initial_memory_capacity: DEFAULT_MEMORY_CAPACITY,
            lock_reads: false,
            sync_on_close: false,
        }
    }
}

impl Display for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CacheConfig {{ cache_dir: {}, file_prefix: {}, memory_capacity: {} bytes, \
             lock_reads: {}, sync_on_close: {} }}",
            self.cache_dir.display(),
            self.file_prefix,
            self.initial_memory_capacity,
            self.lock_reads,
            self.sync_on_close
        )
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Create a default configuration rooted at `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = cache_dir.into();
        self
    }

    pub fn file_prefix(mut self, file_prefix: impl Into<String>) -> Self {
        self.config.file_prefix = file_prefix.into();
        self
    }

    pub fn default_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.default_extension = extension.into();
        self
    }

    pub fn metadata_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.metadata_suffix = suffix.into();
        self
    }

    pub fn initial_memory_capacity(mut self, capacity: usize) -> Self {
        if capacity > 0 {
            self.config.initial_memory_capacity = capacity;
        }
        self
    }

    pub fn lock_reads(mut self, lock_reads: bool) -> Self {
        self.config.lock_reads = lock_reads;
        self
    }

    pub fn sync_on_close(mut self, sync_on_close: bool) -> Self {
        self.config.sync_on_close = sync_on_close;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

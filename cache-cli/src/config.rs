use anyhow::{Context, Result};
use mesio_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read from the optional TOML configuration file.
/// Command line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cache directory
    pub cache_dir: Option<PathBuf>,

    /// Prefix of cache file names
    pub file_prefix: Option<String>,

    /// Extension used for URLs without one
    pub default_extension: Option<String>,

    /// Suffix of sidecar metadata files
    pub metadata_suffix: Option<String>,

    /// Initial allocation of memory entries, in bytes
    pub initial_memory_capacity: Option<usize>,

    /// Serialize reads with writes on the same entry
    pub lock_reads: bool,

    /// fsync data files when a write completes
    pub sync_on_close: bool,
}

impl AppConfig {
    /// Load configuration from `config_path`, falling back to defaults when
    /// no path is given or the file does not exist
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .context("Failed to read configuration file")?;
                toml::from_str(&content).context("Failed to parse configuration file")
            }
            _ => Ok(Self::default()),
        }
    }

    /// Build the cache configuration, applying command line overrides
    pub fn cache_config(&self, dir: Option<PathBuf>, prefix: Option<String>) -> CacheConfig {
        let mut builder = CacheConfig::builder()
            .lock_reads(self.lock_reads)
            .sync_on_close(self.sync_on_close);

        if let Some(dir) = dir.or_else(|| self.cache_dir.clone()) {
            builder = builder.cache_dir(dir);
        }
        if let Some(prefix) = prefix.or_else(|| self.file_prefix.clone()) {
            builder = builder.file_prefix(prefix);
        }
        if let Some(extension) = &self.default_extension {
            builder = builder.default_extension(extension.clone());
        }
        if let Some(suffix) = &self.metadata_suffix {
            builder = builder.metadata_suffix(suffix.clone());
        }
        if let Some(capacity) = self.initial_memory_capacity {
            builder = builder.initial_memory_capacity(capacity);
        }
        builder.build()
    }
}

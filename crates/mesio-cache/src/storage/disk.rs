//! # Disk Storage
//!
//! A data file plus its sidecar metadata file, both named after the entry's
//! key hash.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::metadata::MetadataStore;

#[derive(Debug)]
pub struct DiskStorage {
    data_path: PathBuf,
    metadata: MetadataStore,
    writer: Option<File>,
}

impl DiskStorage {
    pub fn new(data_path: PathBuf, metadata_path: PathBuf) -> Self {
        Self {
            data_path,
            metadata: MetadataStore::new(metadata_path),
            writer: None,
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Size of the data file, 0 if it does not exist
    pub fn file_len(&self) -> u64 {
        fs::metadata(&self.data_path).map_or(0, |m| m.len())
    }

    /// Open the data file for writing. Appends when `append` is set,
    /// otherwise truncates.
    pub fn open(&mut self, append: bool) -> io::Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(&self.data_path)?;
        debug!(path = ?self.data_path, append, "Opened cache file for write");
        self.writer = Some(file);
        Ok(())
    }

    /// Append `data`, retrying partial writes until the file stops accepting
    /// bytes
    pub fn append(&mut self, data: &[u8]) -> CacheResult<()> {
        let file = self
            .writer
            .as_mut()
            .ok_or_else(|| CacheError::Io(io::Error::other("cache file is not open for write")))?;

        let mut written = 0;
        while written < data.len() {
            match file.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(path = ?self.data_path, written, error = %e, "Cache file write failed");
                    return Err(e.into());
                }
            }
        }

        if written < data.len() {
            return Err(CacheError::ShortWrite {
                expected: data.len(),
                written,
            });
        }
        Ok(())
    }

    /// Flush and drop the write handle. A no-op if none is open.
    pub fn close(&mut self, sync: bool) -> io::Result<()> {
        let Some(mut file) = self.writer.take() else {
            return Ok(());
        };
        file.flush()?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Remove the data file; a missing file is not an error
    pub fn remove_data(&mut self) -> io::Result<()> {
        self.writer = None;
        match fs::remove_file(&self.data_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove both files, logging failures
    pub fn remove_all(&mut self) {
        if let Err(e) = self.remove_data() {
            warn!(path = ?self.data_path, error = %e, "Failed to delete cache file");
        }
        if let Err(e) = self.metadata.remove() {
            warn!(path = ?self.metadata.path(), error = %e, "Failed to delete cache metadata file");
        }
    }
}

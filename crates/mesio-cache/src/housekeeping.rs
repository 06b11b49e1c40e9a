//! # Directory Housekeeping
//!
//! Whole-directory operations over cache files. Only files whose name starts
//! with the cache prefix are ever touched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CacheResult;
use crate::metadata::MetadataStore;

/// A cache data file found in a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheFileInfo {
    pub path: PathBuf,
    pub size: u64,
    /// `Content-Length` recorded in the sidecar, if readable
    pub declared_length: Option<u64>,
    pub url: Option<String>,
}

impl CacheFileInfo {
    pub fn is_complete(&self) -> bool {
        self.declared_length == Some(self.size)
    }
}

/// Regular files in `dir` whose name starts with `prefix`.
/// A missing directory yields no files.
fn prefixed_files(dir: &Path, prefix: &str) -> CacheResult<Vec<(PathBuf, fs::Metadata)>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Failed to read cache directory entry");
                continue;
            }
        };
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) if metadata.is_file() => files.push((entry.path(), metadata)),
            Ok(_) => {}
            Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to stat cache file"),
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Delete every cache file in `dir`. Returns the number of files removed;
/// failures are logged and skipped.
pub fn sweep_directory(dir: &Path, prefix: &str) -> CacheResult<usize> {
    let mut removed = 0;
    for (path, _) in prefixed_files(dir, prefix)? {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = ?path, "Removed cache file");
                removed += 1;
            }
            Err(e) => warn!(path = ?path, error = %e, "Failed to remove cache file"),
        }
    }
    info!(dir = ?dir, removed, "Swept cache directory");
    Ok(removed)
}

/// Total size in bytes of all cache files in `dir`, sidecars included
pub fn total_cache_size(dir: &Path, prefix: &str) -> CacheResult<u64> {
    Ok(prefixed_files(dir, prefix)?
        .iter()
        .map(|(_, metadata)| metadata.len())
        .sum())
}

/// Cache data files in `dir`, i.e. prefixed files that are not sidecars,
/// together with what their sidecar declares
pub fn list_cache_files(
    dir: &Path,
    prefix: &str,
    metadata_suffix: &str,
) -> CacheResult<Vec<CacheFileInfo>> {
    let mut infos = Vec::new();
    for (path, metadata) in prefixed_files(dir, prefix)? {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        if name.as_deref().is_none_or(|n| n.ends_with(metadata_suffix) || n.ends_with(".tmp")) {
            continue;
        }

        let mut sidecar_path = path.clone().into_os_string();
        sidecar_path.push(metadata_suffix);
        let sidecar = match MetadataStore::new(sidecar_path).load() {
            Ok(sidecar) => sidecar,
            Err(e) => {
                debug!(path = ?path, error = %e, "Unreadable cache metadata");
                None
            }
        };

        infos.push(CacheFileInfo {
            path,
            size: metadata.len(),
            declared_length: sidecar.as_ref().and_then(|s| s.parsed_content_length()),
            url: sidecar.and_then(|s| s.url),
        });
    }
    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_FILE_PREFIX, DEFAULT_METADATA_SUFFIX};
    use crate::entry::CacheEntry;
    use crate::session::SessionId;
    use crate::storage::StorageKind;
    use crate::test_utils::test_config;
    use tempfile::TempDir;

    fn cached(dir: &TempDir, url: &str, data: &[u8]) -> CacheEntry {
        let entry =
            CacheEntry::create(&test_config(dir.path()), url, None, StorageKind::Disk).unwrap();
        let session = SessionId::new();
        entry.open_write(session).unwrap();
        entry.write(session, data).unwrap();
        entry.close_write(session, true).unwrap();
        entry
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(sweep_directory(&missing, DEFAULT_FILE_PREFIX).unwrap(), 0);
        assert_eq!(total_cache_size(&missing, DEFAULT_FILE_PREFIX).unwrap(), 0);
        assert!(list_cache_files(&missing, DEFAULT_FILE_PREFIX, DEFAULT_METADATA_SUFFIX)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_size_and_sweep_ignore_foreign_files() {
        let dir = TempDir::new().unwrap();
        let a = cached(&dir, "http://x/a.mp4", &[0u8; 100]);
        let b = cached(&dir, "http://x/b.mp4", &[0u8; 50]);
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        fs::create_dir(dir.path().join(format!("{DEFAULT_FILE_PREFIX}subdir"))).unwrap();

        let sidecars: u64 = [&a, &b]
            .iter()
            .map(|e| fs::metadata(e.metadata_path().unwrap()).unwrap().len())
            .sum();
        assert_eq!(
            total_cache_size(dir.path(), DEFAULT_FILE_PREFIX).unwrap(),
            150 + sidecars
        );

        assert_eq!(sweep_directory(dir.path(), DEFAULT_FILE_PREFIX).unwrap(), 4);
        assert_eq!(total_cache_size(dir.path(), DEFAULT_FILE_PREFIX).unwrap(), 0);
        assert!(dir.path().join("notes.txt").exists());
        assert!(!a.data_path().unwrap().exists());
    }

    #[test]
    fn test_list_reports_declared_length() {
        let dir = TempDir::new().unwrap();
        let good = cached(&dir, "http://x/a.mp4", &[0u8; 10]);
        let bad = cached(&dir, "http://x/b.mp4", &[0u8; 10]);
        let file = fs::OpenOptions::new()
            .write(true)
            .open(bad.data_path().unwrap())
            .unwrap();
        file.set_len(3).unwrap();

        let files =
            list_cache_files(dir.path(), DEFAULT_FILE_PREFIX, DEFAULT_METADATA_SUFFIX).unwrap();
        assert_eq!(files.len(), 2);

        let good_info = files
            .iter()
            .find(|f| f.path == good.data_path().unwrap())
            .unwrap();
        assert!(good_info.is_complete());
        assert_eq!(good_info.url.as_deref(), Some("http://x/a.mp4"));

        let bad_info = files
            .iter()
            .find(|f| f.path == bad.data_path().unwrap())
            .unwrap();
        assert_eq!(bad_info.size, 3);
        assert_eq!(bad_info.declared_length, Some(10));
        assert!(!bad_info.is_complete());
    }
}

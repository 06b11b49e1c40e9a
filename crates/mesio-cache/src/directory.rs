//! # Cache Directory
//!
//! Explicit context owning the cache configuration and the registry of live
//! entries. Guarantees a single [`CacheEntry`] per `(url, range)` key within
//! the process.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::housekeeping::{CacheFileInfo, list_cache_files, sweep_directory, total_cache_size};
use crate::key::CacheKey;
use crate::session::SessionId;
use crate::storage::StorageKind;

#[derive(Debug, Clone)]
pub struct CacheDirectory {
    config: Arc<CacheConfig>,
    entries: Arc<Mutex<HashMap<CacheKey, CacheEntry>>>,
}

impl CacheDirectory {
    /// Create the directory context, creating the cache directory if needed
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        fs::create_dir_all(&config.cache_dir)?;
        info!("Cache directory ready: {}", config);
        Ok(Self {
            config: Arc::new(config),
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered entries, in no particular order
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Find the entry for `url` and `range`, creating and registering it if
    /// needed. An existing entry is returned as is, whatever its storage
    /// kind.
    pub fn entry(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
        kind: StorageKind,
    ) -> CacheResult<CacheEntry> {
        let key = CacheKey::new(url, range);
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&key) {
            if !entry.is_deleted() {
                return Ok(entry.clone());
            }
        }

        let entry = CacheEntry::create(&self.config, url, range, kind)?;
        entries.insert(key, entry.clone());
        debug!(url, ?range, storage = %kind, "Registered cache entry");
        Ok(entry)
    }

    pub fn find(&self, url: &str, range: Option<(u64, u64)>) -> Option<CacheEntry> {
        self.entries
            .lock()
            .get(&CacheKey::new(url, range))
            .filter(|entry| !entry.is_deleted())
            .cloned()
    }

    /// Any live entry for `url`, ignoring the range. Used when extending a
    /// partial download.
    pub fn find_for_continuation(&self, url: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .iter()
            .find(|(key, entry)| key.url == url && !entry.is_deleted())
            .map(|(_, entry)| entry.clone())
    }

    /// Mark every entry for `url` for deletion and destroy those nobody is
    /// attached to. Returns the number of entries destroyed.
    pub fn remove_url(&self, url: &str) -> usize {
        let mut entries = self.entries.lock();
        let mut destroyed = 0;
        entries.retain(|key, entry| {
            if key.url != url {
                return true;
            }
            entry.set_delete_files_when_deleted();
            if entry.delete(None) {
                destroyed += 1;
                false
            } else {
                true
            }
        });
        debug!(url, destroyed, "Removed cache entries for URL");
        destroyed
    }

    /// Detach `session` from `entry`, unregistering the entry if that
    /// destroyed it. Returns whether it was destroyed.
    pub fn release(&self, entry: &CacheEntry, session: SessionId) -> bool {
        if !entry.detach(session) {
            return false;
        }
        let mut entries = self.entries.lock();
        if entries.get(entry.key()) == Some(entry) {
            entries.remove(entry.key());
        }
        true
    }

    /// Push a complete or partial in-memory copy of `url` into the cache
    pub fn store_memory(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
        data: &[u8],
        mime: Option<&str>,
        complete: bool,
    ) -> CacheResult<CacheEntry> {
        let entry = self.entry(url, range, StorageKind::Memory)?;
        entry.store_content(data, complete)?;
        if let Some(mime) = mime {
            entry.set_mime_type(Some(mime.to_string()));
        }
        Ok(entry)
    }

    /// Delete every cache file in the directory
    pub fn sweep(&self) -> CacheResult<usize> {
        sweep_directory(&self.config.cache_dir, &self.config.file_prefix)
    }

    /// Aggregate size of the cache files in the directory
    pub fn total_size(&self) -> CacheResult<u64> {
        total_cache_size(&self.config.cache_dir, &self.config.file_prefix)
    }

    pub fn list(&self) -> CacheResult<Vec<CacheFileInfo>> {
        list_cache_files(
            &self.config.cache_dir,
            &self.config.file_prefix,
            &self.config.metadata_suffix,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::test_utils::{init_test_tracing, test_config};
    use tempfile::TempDir;

    fn directory(dir: &TempDir) -> CacheDirectory {
        CacheDirectory::new(test_config(dir.path())).unwrap()
    }

    #[test]
    fn test_one_entry_per_key() {
        init_test_tracing!();
        let dir = TempDir::new().unwrap();
        let cache = directory(&dir);

        let a = cache.entry("http://x/a.mp4", None, StorageKind::Disk).unwrap();
        let b = cache.entry("http://x/a.mp4", Some((0, 0)), StorageKind::Disk).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);

        let head = cache.entry("http://x/a.mp4", Some((0, 99)), StorageKind::Disk).unwrap();
        let tail = cache.entry("http://x/a.mp4", Some((100, 199)), StorageKind::Disk).unwrap();
        assert_ne!(head.hash(), tail.hash());
        assert_ne!(head.data_path(), tail.data_path());
        assert_eq!(cache.len(), 3);

        assert_eq!(cache.find("http://x/a.mp4", Some((0, 99))), Some(head));
        assert_eq!(cache.find("http://x/a.mp4", Some((0, 50))), None);
        assert!(cache.find_for_continuation("http://x/a.mp4").is_some());
        assert!(cache.find_for_continuation("http://x/b.mp4").is_none());
    }

    #[test]
    fn test_shared_writer_slot_across_lookups() {
        let dir = TempDir::new().unwrap();
        let cache = directory(&dir);
        let first = cache.entry("http://x/a.mp4", None, StorageKind::Disk).unwrap();
        let second = cache.entry("http://x/a.mp4", None, StorageKind::Disk).unwrap();

        first.open_write(SessionId::new()).unwrap();
        assert!(matches!(
            second.open_write(SessionId::new()),
            Err(CacheError::AlreadyWriting { .. })
        ));
    }

    #[test]
    fn test_remove_url_spares_entries_in_use() {
        let dir = TempDir::new().unwrap();
        let cache = directory(&dir);
        let idle = cache.entry("http://x/a.mp4", Some((0, 9)), StorageKind::Disk).unwrap();
        let busy = cache.entry("http://x/a.mp4", Some((10, 19)), StorageKind::Disk).unwrap();
        let other = cache.entry("http://x/b.mp4", None, StorageKind::Disk).unwrap();

        let session = SessionId::new();
        busy.open_write(session).unwrap();
        busy.write(session, b"0123456789").unwrap();

        assert_eq!(cache.remove_url("http://x/a.mp4"), 1);
        assert!(idle.is_deleted());
        assert!(!busy.is_deleted());
        assert!(!other.is_deleted());
        assert_eq!(cache.len(), 2);

        // The writer leaving destroys the entry marked for deletion
        assert!(cache.release(&busy, session));
        assert!(busy.is_deleted());
        assert!(!busy.data_path().unwrap().exists());
        assert_eq!(cache.len(), 1);
        assert!(cache.find("http://x/a.mp4", Some((10, 19))).is_none());
    }

    #[test]
    fn test_release_keeps_entry_registered() {
        let dir = TempDir::new().unwrap();
        let cache = directory(&dir);
        let entry = cache.entry("http://x/a.mp4", None, StorageKind::Disk).unwrap();
        let session = SessionId::new();
        entry.attach(session).unwrap();

        assert!(!cache.release(&entry, session));
        assert_eq!(cache.len(), 1);
        assert_eq!(entry.session_count(), 0);
    }

    #[test]
    fn test_deleted_entry_is_recreated() {
        let dir = TempDir::new().unwrap();
        let cache = directory(&dir);
        let entry = cache.entry("http://x/a.mp4", None, StorageKind::Memory).unwrap();
        assert!(entry.delete(None));

        let fresh = cache.entry("http://x/a.mp4", None, StorageKind::Memory).unwrap();
        assert_ne!(entry, fresh);
        assert!(!fresh.is_deleted());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_store_memory() {
        let dir = TempDir::new().unwrap();
        let cache = directory(&dir);
        let entry = cache
            .store_memory(
                "http://x/init.mp4",
                None,
                b"ftyp",
                Some("video/mp4"),
                true,
            )
            .unwrap();
        assert_eq!(entry.storage_kind(), StorageKind::Memory);
        assert_eq!(entry.to_bytes().unwrap(), &b"ftyp"[..]);
        assert_eq!(entry.mime_type().as_deref(), Some("video/mp4"));
        assert_eq!(entry.content_length(), 4);

        let again = cache
            .store_memory("http://x/init.mp4", None, b"ftypmoov", None, true)
            .unwrap();
        assert_eq!(entry, again);
        assert_eq!(entry.to_bytes().unwrap(), &b"ftypmoov"[..]);
        assert_eq!(entry.mime_type().as_deref(), Some("video/mp4"));
    }

    #[test]
    fn test_housekeeping_uses_config() {
        let dir = TempDir::new().unwrap();
        let cache = directory(&dir);
        let entry = cache.entry("http://x/a.mp4", None, StorageKind::Disk).unwrap();
        let mut writer = entry.begin_write(SessionId::new()).unwrap();
        writer.write(&[1u8; 64]).unwrap();
        writer.finish(true).unwrap();

        let files = cache.list().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 64);
        assert!(cache.total_size().unwrap() > 64);
        assert_eq!(cache.sweep().unwrap(), 2);
        assert_eq!(cache.total_size().unwrap(), 0);
    }
}

//! # Cache Entry
//!
//! A [`CacheEntry`] is the long-lived object tracking one cached resource:
//! its validators, its backing storage, its flags and the sessions attached
//! to it. Handles are cheap to clone and all share the same state, guarded by
//! a per-entry lock.
//!
//! At most one writer is attached at a time. Readers on disk entries get
//! their own file handle through [`CacheEntry::attach_reader`]; memory entries
//! are read through copies or a closure run under the entry lock.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::metadata::{SidecarMetadata, format_range};
use crate::reader::ReadCursor;
use crate::session::{SessionId, WriteSession};
use crate::storage::{DiskStorage, MemoryDescriptor, MemoryStorage, StorageKind, StorageMode};

/// Status flags of an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryFlags {
    pub must_revalidate: bool,
    /// Persisted metadata and stored bytes disagree
    pub corrupted: bool,
    pub no_cache: bool,
    /// All response headers have been applied
    pub headers_done: bool,
    /// The entry has been destroyed
    pub deleted: bool,
}

/// Resumption of a partial download with an extended end range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Continuation {
    /// Content length declared before the range was extended
    pub previous_content_length: u64,
}

/// Read-only copy of an entry's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub url: String,
    pub hash: String,
    pub storage: StorageKind,
    pub data_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub memory: Option<MemoryDescriptor>,
    pub range: (u64, u64),
    pub content_length: u64,
    pub cache_size: u64,
    pub mime_type: Option<String>,
    pub etag_server: Option<String>,
    pub etag_disk: Option<String>,
    pub last_modified_server: Option<String>,
    pub last_modified_disk: Option<String>,
    /// Absolute expiry in unix seconds
    pub max_age: Option<i64>,
    pub flags: EntryFlags,
    pub persistent: bool,
    pub deletable_on_delete: bool,
    pub in_progress: bool,
    pub continuation: Option<Continuation>,
    pub session_count: usize,
    pub has_writer: bool,
}

#[derive(Debug)]
pub(crate) struct EntryState {
    pub(crate) storage: StorageMode,
    range: (u64, u64),
    content_length: u64,
    cache_size: u64,
    mime_type: Option<String>,
    etag_server: Option<String>,
    etag_disk: Option<String>,
    last_modified_server: Option<String>,
    last_modified_disk: Option<String>,
    // unix seconds, 0 when unknown
    max_age: i64,
    flags: EntryFlags,
    write_session: Option<SessionId>,
    pub(crate) sessions: HashSet<SessionId>,
    deletable_on_delete: bool,
    persistent: bool,
    continuation: Option<Continuation>,
    // content_length was declared for the next or current write
    length_declared: bool,
}

impl EntryState {
    fn new(storage: StorageMode, range: (u64, u64)) -> Self {
        Self {
            storage,
            range,
            content_length: 0,
            cache_size: 0,
            mime_type: None,
            etag_server: None,
            etag_disk: None,
            last_modified_server: None,
            last_modified_disk: None,
            max_age: 0,
            flags: EntryFlags::default(),
            write_session: None,
            sessions: HashSet::new(),
            deletable_on_delete: false,
            persistent: false,
            continuation: None,
            length_declared: false,
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.flags.deleted
    }

    fn is_in_progress(&self) -> bool {
        if self.write_session.is_some() {
            return true;
        }
        matches!(self.storage, StorageMode::Memory(_))
            && self.cache_size > 0
            && self.content_length > 0
            && self.cache_size < self.content_length
    }

    /// Apply a loaded sidecar to the disk-side fields
    fn apply_sidecar(&mut self, key: &CacheKey, sidecar: SidecarMetadata) {
        if sidecar.url.as_deref() != Some(key.url.as_str()) {
            debug!(url = %key.url, stored = ?sidecar.url, "Cache metadata URL mismatch");
            self.flags.corrupted = true;
        }
        match sidecar.parsed_range() {
            None if key.range.is_some() => self.flags.corrupted = true,
            Some(Some(range)) if range != key.range_or_default() => {
                debug!(url = %key.url, ?range, "Cache metadata range mismatch");
                self.flags.corrupted = true;
            }
            Some(None) => self.flags.corrupted = true,
            _ => {}
        }
        if sidecar.no_cache {
            self.flags.corrupted = true;
            self.flags.no_cache = true;
        }

        if let Some(length) = sidecar.parsed_content_length() {
            self.content_length = length;
        }
        self.mime_type = sidecar.content_type;
        self.etag_server = sidecar.etag.clone();
        self.etag_disk = sidecar.etag;
        self.last_modified_server = sidecar.last_modified.clone();
        self.last_modified_disk = sidecar.last_modified;
        self.max_age = sidecar.max_age.unwrap_or(0);
        self.flags.must_revalidate = sidecar.must_revalidate;
    }

    fn sidecar(&self, key: &CacheKey) -> SidecarMetadata {
        SidecarMetadata {
            url: Some(key.url.clone()),
            range: key.range.map(format_range),
            etag: self.etag_disk.clone(),
            content_type: self.mime_type.clone(),
            content_length: Some(self.content_length.to_string()),
            last_modified: self.last_modified_disk.clone(),
            max_age: (self.max_age != 0).then_some(self.max_age),
            must_revalidate: self.flags.must_revalidate,
            no_cache: self.flags.no_cache,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EntryInner {
    key: CacheKey,
    hash: String,
    pub(crate) lock_reads: bool,
    sync_on_close: bool,
    initial_memory_capacity: usize,
    pub(crate) state: Mutex<EntryState>,
}

/// Shared handle to a cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    inner: Arc<EntryInner>,
}

impl PartialEq for CacheEntry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for CacheEntry {}

impl CacheEntry {
    /// Create an entry for `url` restricted to `range`.
    ///
    /// Disk entries load their sidecar metadata and are checked for
    /// corruption. A missing or malformed sidecar leaves the entry flagged
    /// corrupted, it never fails creation.
    pub fn create(
        config: &CacheConfig,
        url: &str,
        range: Option<(u64, u64)>,
        kind: StorageKind,
    ) -> CacheResult<Self> {
        let key = CacheKey::new(url, range);
        let derived = key.derive(config)?;

        let storage = match kind {
            StorageKind::Disk => {
                fs::create_dir_all(&config.cache_dir)?;
                let data_path = config.cache_dir.join(&derived.filename_base);
                let metadata_path = config.cache_dir.join(format!(
                    "{}{}",
                    derived.filename_base, config.metadata_suffix
                ));
                StorageMode::Disk(DiskStorage::new(data_path, metadata_path))
            }
            StorageKind::Memory => StorageMode::Memory(MemoryStorage::new()),
        };

        let mut state = EntryState::new(storage, key.range_or_default());
        if let StorageMode::Disk(disk) = &state.storage {
            let loaded = disk.metadata().load();
            state.cache_size = disk.file_len();
            match loaded {
                Ok(Some(sidecar)) => state.apply_sidecar(&key, sidecar),
                Ok(None) => state.flags.corrupted = true,
                Err(e) => {
                    warn!(url = %key.url, error = %e, "Ignoring unreadable cache metadata");
                    state.flags.corrupted = true;
                }
            }
        }

        let entry = Self {
            inner: Arc::new(EntryInner {
                key,
                hash: derived.hash_hex,
                lock_reads: config.lock_reads,
                sync_on_close: config.sync_on_close,
                initial_memory_capacity: config.initial_memory_capacity,
                state: Mutex::new(state),
            }),
        };

        if kind == StorageKind::Disk {
            entry.is_corrupted();
        }
        debug!(url = %entry.url(), hash = %entry.hash(), storage = %kind, "Created cache entry");
        Ok(entry)
    }

    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn url(&self) -> &str {
        &self.inner.key.url
    }

    /// Uppercase hex SHA-1 of the key
    pub fn hash(&self) -> &str {
        &self.inner.hash
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.inner.state.lock().storage.kind()
    }

    pub fn data_path(&self) -> Option<PathBuf> {
        match &self.inner.state.lock().storage {
            StorageMode::Disk(disk) => Some(disk.data_path().to_path_buf()),
            StorageMode::Memory(_) => None,
        }
    }

    pub fn metadata_path(&self) -> Option<PathBuf> {
        match &self.inner.state.lock().storage {
            StorageMode::Disk(disk) => Some(disk.metadata().path().to_path_buf()),
            StorageMode::Memory(_) => None,
        }
    }

    pub fn range(&self) -> (u64, u64) {
        self.inner.state.lock().range
    }

    pub fn content_length(&self) -> u64 {
        self.inner.state.lock().content_length
    }

    /// Bytes actually present
    pub fn cache_size(&self) -> u64 {
        self.inner.state.lock().cache_size
    }

    pub fn mime_type(&self) -> Option<String> {
        self.inner.state.lock().mime_type.clone()
    }

    pub fn etag_server(&self) -> Option<String> {
        self.inner.state.lock().etag_server.clone()
    }

    pub fn etag_disk(&self) -> Option<String> {
        self.inner.state.lock().etag_disk.clone()
    }

    pub fn last_modified_server(&self) -> Option<String> {
        self.inner.state.lock().last_modified_server.clone()
    }

    pub fn last_modified_disk(&self) -> Option<String> {
        self.inner.state.lock().last_modified_disk.clone()
    }

    pub fn flags(&self) -> EntryFlags {
        self.inner.state.lock().flags
    }

    pub fn continuation(&self) -> Option<Continuation> {
        self.inner.state.lock().continuation
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    pub fn has_session(&self, session: SessionId) -> bool {
        self.inner.state.lock().sessions.contains(&session)
    }

    pub fn has_writer(&self) -> bool {
        self.inner.state.lock().write_session.is_some()
    }

    pub fn is_writer(&self, session: SessionId) -> bool {
        self.inner.state.lock().write_session == Some(session)
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.state.lock().flags.deleted
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.state.lock().persistent
    }

    pub fn deletes_files_when_deleted(&self) -> bool {
        self.inner.state.lock().deletable_on_delete
    }

    /// Whether bytes are still expected: a writer is attached, or a memory
    /// entry holds fewer bytes than declared
    pub fn is_in_progress(&self) -> bool {
        self.inner.state.lock().is_in_progress()
    }

    /// Record the server-declared size. During a continuation the value is
    /// added to the length declared before the range was extended.
    pub fn set_content_length(&self, length: u64) {
        let mut state = self.inner.state.lock();
        state.content_length = match state.continuation {
            Some(c) => c.previous_content_length.saturating_add(length),
            None => length,
        };
        state.length_declared = true;
    }

    pub fn set_mime_type(&self, mime: Option<String>) {
        self.inner.state.lock().mime_type = mime;
    }

    /// Set the ETag currently announced by the server
    pub fn set_etag(&self, etag: Option<String>) {
        self.inner.state.lock().etag_server = etag;
    }

    /// Set the Last-Modified date currently announced by the server
    pub fn set_last_modified(&self, last_modified: Option<String>) {
        self.inner.state.lock().last_modified_server = last_modified;
    }

    pub fn set_no_cache(&self, no_cache: bool) {
        self.inner.state.lock().flags.no_cache = no_cache;
    }

    pub fn set_headers_done(&self) {
        self.inner.state.lock().flags.headers_done = true;
    }

    /// Record freshness information. `max_age_secs` is relative to now; 0
    /// clears any known expiry.
    pub fn set_max_age(&self, max_age_secs: u32, must_revalidate: bool) {
        let mut state = self.inner.state.lock();
        state.max_age = if max_age_secs > 0 {
            Utc::now().timestamp() + i64::from(max_age_secs)
        } else {
            0
        };
        state.flags.must_revalidate = must_revalidate;
    }

    /// Whether the stored bytes may be served without contacting the server
    pub fn can_reuse(&self) -> bool {
        let state = self.inner.state.lock();
        if state.flags.corrupted || state.flags.deleted || state.max_age == 0 {
            return false;
        }
        if state.max_age > Utc::now().timestamp() {
            return true;
        }
        !state.flags.must_revalidate
    }

    /// Persistent entries keep their files when deleted
    pub fn set_persistent(&self) {
        let mut state = self.inner.state.lock();
        state.persistent = true;
        state.deletable_on_delete = false;
    }

    /// Delete backing storage when the entry is destroyed, unless persistent
    pub fn set_delete_files_when_deleted(&self) {
        let mut state = self.inner.state.lock();
        if !state.persistent {
            state.deletable_on_delete = true;
        }
    }

    /// Extend the requested range of a partial download. The next writer
    /// appends to the existing bytes.
    pub fn set_continuation(&self, new_end_range: u64) {
        let mut state = self.inner.state.lock();
        state.continuation = Some(Continuation {
            previous_content_length: state.content_length,
        });
        state.range.1 = new_end_range;
        debug!(url = %self.url(), new_end_range, "Continuing cache entry");
    }

    /// Register a session that is neither a reader nor a writer yet.
    /// Returns the number of attached sessions.
    pub fn attach(&self, session: SessionId) -> CacheResult<usize> {
        let mut state = self.inner.state.lock();
        if state.flags.deleted {
            return Err(CacheError::Deleted);
        }
        state.sessions.insert(session);
        Ok(state.sessions.len())
    }

    /// Attach `session` as the exclusive writer
    pub fn open_write(&self, session: SessionId) -> CacheResult<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if state.flags.deleted {
            return Err(CacheError::Deleted);
        }
        match state.write_session {
            Some(owner) if owner == session => return Ok(()),
            Some(owner) => {
                return Err(CacheError::AlreadyWriting {
                    url: self.url().to_string(),
                    owner,
                });
            }
            None => {}
        }

        let continuing = state.continuation.is_some();
        if !continuing && !state.length_declared {
            state.content_length = 0;
        }
        match &mut state.storage {
            StorageMode::Disk(disk) => {
                if let Err(e) = disk.open(continuing) {
                    warn!(
                        path = ?disk.data_path(),
                        error = %e,
                        "Failed to open cache file for write"
                    );
                    return Err(e.into());
                }
                state.cache_size = if continuing { disk.file_len() } else { 0 };
            }
            StorageMode::Memory(mem) => {
                let wanted = if state.content_length > 0 {
                    usize::try_from(state.content_length)
                        .map_err(|_| CacheError::OutOfMemory(usize::MAX))?
                } else if mem.capacity() == 0 {
                    self.inner.initial_memory_capacity
                } else {
                    0
                };
                mem.reserve(wanted)?;
                if !continuing {
                    mem.reset();
                    state.cache_size = 0;
                }
            }
        }

        state.write_session = Some(session);
        state.sessions.insert(session);
        state.flags.corrupted = false;
        info!(url = %self.url(), session = %session, continuing, "Opened cache entry for write");
        Ok(())
    }

    /// Append `data` through the writer `session`.
    ///
    /// A failed disk write closes the writer as failed and deletes the
    /// partial file before the error is returned.
    pub fn write(&self, session: SessionId, data: &[u8]) -> CacheResult<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if state.write_session != Some(session) {
            return Err(CacheError::NotWriter(session));
        }

        let result = match &mut state.storage {
            StorageMode::Disk(disk) => disk.append(data),
            StorageMode::Memory(mem) => mem.append(data),
        };

        match result {
            Ok(()) => {
                state.cache_size += data.len() as u64;
                Ok(())
            }
            Err(e) if e.is_io() => {
                warn!(url = %self.url(), error = %e, "Cache write failed, discarding partial data");
                if let Err(close_err) = self.close_write_locked(state, session, false) {
                    debug!(error = %close_err, "Error while closing failed cache writer");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Detach the writer `session`.
    ///
    /// On success the server validators become the disk validators and the
    /// sidecar is rewritten. On failure the data file is deleted and the
    /// entry flagged corrupted. Calling this for a session that is not the
    /// writer is a no-op.
    pub fn close_write(&self, session: SessionId, success: bool) -> CacheResult<()> {
        let mut state = self.inner.state.lock();
        self.close_write_locked(&mut state, session, success)
    }

    /// Open the writer and return a guard that aborts it when dropped
    pub fn begin_write(&self, session: SessionId) -> CacheResult<WriteSession> {
        self.open_write(session)?;
        Ok(WriteSession::new(self.clone(), session))
    }

    fn close_write_locked(
        &self,
        state: &mut EntryState,
        session: SessionId,
        success: bool,
    ) -> CacheResult<()> {
        if state.write_session != Some(session) {
            return Ok(());
        }
        state.write_session = None;
        state.sessions.remove(&session);
        state.continuation = None;
        state.length_declared = false;

        let mut result = Ok(());
        let success = match &mut state.storage {
            StorageMode::Disk(disk) => match disk.close(self.inner.sync_on_close) {
                Ok(()) => success,
                Err(e) => {
                    warn!(path = ?disk.data_path(), error = %e, "Failed to flush cache file");
                    result = Err(e.into());
                    false
                }
            },
            StorageMode::Memory(_) => success,
        };

        if success {
            if state.content_length == 0 {
                state.content_length = state.cache_size;
            }
            state.etag_disk = state.etag_server.clone();
            state.last_modified_disk = state.last_modified_server.clone();

            if let StorageMode::Disk(disk) = &state.storage {
                state.flags.corrupted = state.cache_size != state.content_length;
                if let Err(e) = disk.metadata().save(&state.sidecar(&self.inner.key)) {
                    state.flags.corrupted = true;
                    result = Err(e);
                }
            }
            info!(
                url = %self.url(),
                bytes = state.cache_size,
                corrupted = state.flags.corrupted,
                "Closed cache entry after write"
            );
        } else {
            if let StorageMode::Disk(disk) = &mut state.storage {
                if let Err(e) = disk.remove_data() {
                    warn!(
                        path = ?disk.data_path(),
                        error = %e,
                        "Failed to delete partial cache file"
                    );
                }
                state.cache_size = 0;
            }
            state.flags.corrupted = true;
            if !state.persistent {
                state.deletable_on_delete = true;
            }
            info!(url = %self.url(), "Aborted cache entry write");
        }

        result
    }

    /// Check the stored bytes against the persisted `Content-Length`.
    ///
    /// Sets the corrupted flag on mismatch and returns the current flag.
    /// Memory entries, and disk entries with an active writer, are only
    /// reported, never re-checked.
    pub fn is_corrupted(&self) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let StorageMode::Disk(disk) = &state.storage else {
            return state.flags.corrupted;
        };
        if state.write_session.is_some() || state.flags.deleted {
            return state.flags.corrupted;
        }

        let declared = match disk.metadata().load() {
            Ok(Some(sidecar)) => sidecar.parsed_content_length(),
            _ => None,
        };
        let actual = fs::metadata(disk.data_path()).map(|m| m.len()).ok();

        match (declared, actual) {
            (Some(declared), Some(actual)) if declared == actual => {}
            _ => {
                debug!(url = %self.url(), ?declared, ?actual, "Cache entry is corrupted");
                state.flags.corrupted = true;
            }
        }
        state.flags.corrupted
    }

    /// Fail with [`CacheError::Corrupted`] when [`Self::is_corrupted`] reports
    /// a mismatch
    pub fn verify(&self) -> CacheResult<()> {
        if self.is_corrupted() {
            return Err(CacheError::Corrupted(self.url().to_string()));
        }
        Ok(())
    }

    /// Rewrite the sidecar from the current disk-side fields
    pub fn flush_metadata(&self) -> CacheResult<()> {
        let state = self.inner.state.lock();
        let StorageMode::Disk(disk) = &state.storage else {
            return Err(CacheError::NotDiskBacked);
        };
        disk.metadata().save(&state.sidecar(&self.inner.key))
    }

    /// Open an independent read cursor at offset 0 (disk entries only)
    pub fn attach_reader(&self) -> CacheResult<ReadCursor> {
        let mut state = self.inner.state.lock();
        if state.flags.deleted {
            return Err(CacheError::Deleted);
        }
        let StorageMode::Disk(disk) = &state.storage else {
            return Err(CacheError::NotDiskBacked);
        };
        let file = File::open(disk.data_path())?;
        let session = SessionId::new();
        state.sessions.insert(session);
        debug!(url = %self.url(), session = %session, "Attached cache reader");
        Ok(ReadCursor::new(Arc::downgrade(&self.inner), session, file))
    }

    /// Detach `session`. A writer is closed as failed first.
    ///
    /// Returns `true` when this was the last session and the entry was
    /// marked for deletion, in which case it has been destroyed.
    pub fn detach(&self, session: SessionId) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let attached = state.sessions.contains(&session);
        if let Err(e) = self.close_write_locked(state, session, false) {
            debug!(error = %e, "Error while closing detached cache writer");
        }
        state.sessions.remove(&session);
        if !attached {
            return false;
        }
        debug!(
            url = %self.url(),
            session = %session,
            remaining = state.sessions.len(),
            "Detached cache session"
        );

        if state.sessions.is_empty() && state.deletable_on_delete && !state.flags.deleted {
            destroy_locked(&self.inner.key, state);
            return true;
        }
        false
    }

    /// Destroy the entry, releasing its storage.
    ///
    /// A no-op returning `false` while sessions other than `initiator` are
    /// attached.
    pub fn delete(&self, initiator: Option<SessionId>) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if state.flags.deleted {
            return true;
        }
        if state.sessions.iter().any(|s| Some(*s) != initiator) {
            debug!(
                url = %self.url(),
                sessions = state.sessions.len(),
                "Cache entry still in use, not deleting"
            );
            return false;
        }
        if let Some(session) = initiator {
            if let Err(e) = self.close_write_locked(state, session, false) {
                debug!(error = %e, "Error while closing writer before deletion");
            }
            state.sessions.remove(&session);
        }
        destroy_locked(&self.inner.key, state);
        true
    }

    /// Conditional request headers for revalidating the stored bytes.
    ///
    /// Empty for corrupted or deleted entries. Persistent memory entries
    /// report the server validators.
    pub fn revalidation_headers(&self) -> Vec<(String, String)> {
        let state = self.inner.state.lock();
        if state.flags.corrupted || state.flags.deleted {
            return Vec::new();
        }
        let (etag, last_modified) =
            if state.persistent && matches!(state.storage, StorageMode::Memory(_)) {
                (&state.etag_server, &state.last_modified_server)
            } else {
                (&state.etag_disk, &state.last_modified_disk)
            };

        let mut headers = Vec::with_capacity(2);
        if let Some(etag) = etag {
            headers.push(("If-None-Match".to_string(), etag.clone()));
        }
        if let Some(last_modified) = last_modified {
            headers.push(("If-Modified-Since".to_string(), last_modified.clone()));
        }
        headers
    }

    /// Copy of a memory entry's content
    pub fn to_bytes(&self) -> CacheResult<Bytes> {
        self.with_bytes(Bytes::copy_from_slice)
    }

    /// Run `f` over a memory entry's content while holding the entry lock.
    /// The slice cannot outlive the call, so buffer growth never invalidates
    /// it.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> CacheResult<R> {
        let state = self.inner.state.lock();
        match &state.storage {
            StorageMode::Memory(mem) => Ok(f(mem.as_slice())),
            StorageMode::Disk(_) => Err(CacheError::NotMemoryBacked),
        }
    }

    /// Length and handle of a memory entry's buffer
    pub fn memory_descriptor(&self) -> CacheResult<MemoryDescriptor> {
        match &self.inner.state.lock().storage {
            StorageMode::Memory(mem) => Ok(mem.descriptor()),
            StorageMode::Disk(_) => Err(CacheError::NotMemoryBacked),
        }
    }

    /// Replace a memory entry's content with a copy of `data`.
    ///
    /// The declared length becomes `data.len()` when `complete`, otherwise 0
    /// while the transfer is still running.
    pub fn store_content(&self, data: &[u8], complete: bool) -> CacheResult<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.flags.deleted {
            return Err(CacheError::Deleted);
        }
        let StorageMode::Memory(mem) = &mut state.storage else {
            return Err(CacheError::NotMemoryBacked);
        };
        mem.replace(data)?;
        state.cache_size = data.len() as u64;
        state.content_length = if complete { data.len() as u64 } else { 0 };
        state.flags.corrupted = false;
        Ok(())
    }

    /// Override a memory entry's range and declared size
    pub fn set_range(&self, size: u64, start: u64, end: u64) -> CacheResult<()> {
        let mut state = self.inner.state.lock();
        if !matches!(state.storage, StorageMode::Memory(_)) {
            return Err(CacheError::NotMemoryBacked);
        }
        state.range = (start, end);
        state.content_length = size;
        state.length_declared = true;
        state.continuation = None;
        Ok(())
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        let state = self.inner.state.lock();
        let (data_path, metadata_path, memory) = match &state.storage {
            StorageMode::Disk(disk) => (
                Some(disk.data_path().to_path_buf()),
                Some(disk.metadata().path().to_path_buf()),
                None,
            ),
            StorageMode::Memory(mem) => (None, None, Some(mem.descriptor())),
        };

        EntrySnapshot {
            url: self.url().to_string(),
            hash: self.hash().to_string(),
            storage: state.storage.kind(),
            data_path,
            metadata_path,
            memory,
            range: state.range,
            content_length: state.content_length,
            cache_size: state.cache_size,
            mime_type: state.mime_type.clone(),
            etag_server: state.etag_server.clone(),
            etag_disk: state.etag_disk.clone(),
            last_modified_server: state.last_modified_server.clone(),
            last_modified_disk: state.last_modified_disk.clone(),
            max_age: (state.max_age != 0).then_some(state.max_age),
            flags: state.flags,
            persistent: state.persistent,
            deletable_on_delete: state.deletable_on_delete,
            in_progress: state.is_in_progress(),
            continuation: state.continuation,
            session_count: state.sessions.len(),
            has_writer: state.write_session.is_some(),
        }
    }

    pub(crate) fn from_inner(inner: Arc<EntryInner>) -> Self {
        Self { inner }
    }
}

fn destroy_locked(key: &CacheKey, state: &mut EntryState) {
    match &mut state.storage {
        StorageMode::Disk(disk) => {
            if let Err(e) = disk.close(false) {
                debug!(error = %e, "Error while closing cache file on delete");
            }
            if state.deletable_on_delete {
                disk.remove_all();
            }
        }
        StorageMode::Memory(mem) => mem.release(),
    }

    if state.deletable_on_delete || matches!(state.storage, StorageMode::Memory(_)) {
        state.cache_size = 0;
        state.content_length = 0;
        state.mime_type = None;
        state.etag_server = None;
        state.etag_disk = None;
        state.last_modified_server = None;
        state.last_modified_disk = None;
    }
    state.flags.deleted = true;
    info!(url = %key.url, "Deleted cache entry");
}

//! # Read Cursor
//!
//! Independent, seekable reader over a disk entry. Each cursor owns its own
//! file handle and position; the entry only knows the cursor's session id.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::entry::{CacheEntry, EntryInner};
use crate::error::{CacheError, CacheResult};
use crate::session::SessionId;

#[derive(Debug)]
pub struct ReadCursor {
    entry: Weak<EntryInner>,
    session: SessionId,
    file: File,
    position: u64,
    detached: bool,
}

impl ReadCursor {
    pub(crate) fn new(entry: Weak<EntryInner>, session: SessionId, file: File) -> Self {
        Self {
            entry,
            session,
            file,
            position: 0,
            detached: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move to absolute offset `pos`, returning the new position
    pub fn seek(&mut self, pos: u64) -> CacheResult<u64> {
        self.ensure_attached()?;
        self.position = self.file.seek(SeekFrom::Start(pos))?;
        Ok(self.position)
    }

    /// Read into `buf` from the current position. Returns 0 at the end of
    /// the bytes currently on disk.
    pub fn read(&mut self, buf: &mut [u8]) -> CacheResult<usize> {
        let entry = self.ensure_attached()?;

        let read = if entry.lock_reads {
            let _state = entry.state.lock();
            self.file.read(buf)?
        } else {
            self.file.read(buf)?
        };
        self.position += read as u64;
        Ok(read)
    }

    /// Bytes between the current position and the end of the file
    pub fn available(&self) -> CacheResult<u64> {
        let len = self.file.metadata()?.len();
        Ok(len.saturating_sub(self.position))
    }

    /// Detach from the entry. Further reads fail; dropping the cursor
    /// detaches it as well.
    pub fn detach(&mut self) -> bool {
        if self.detached {
            return false;
        }
        self.detached = true;
        match self.entry.upgrade() {
            Some(inner) => CacheEntry::from_inner(inner).detach(self.session),
            None => false,
        }
    }

    fn ensure_attached(&self) -> CacheResult<Arc<EntryInner>> {
        if self.detached {
            return Err(CacheError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "read cursor is detached",
            )));
        }
        let inner = self.entry.upgrade().ok_or(CacheError::Deleted)?;
        if inner.state.lock().is_deleted() {
            return Err(CacheError::Deleted);
        }
        Ok(inner)
    }
}

impl Read for ReadCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ReadCursor::read(self, buf).map_err(|e| match e {
            CacheError::Io(e) => e,
            other => io::Error::other(other),
        })
    }
}

impl Drop for ReadCursor {
    fn drop(&mut self) {
        if !self.detached {
            debug!(session = %self.session, "Dropping attached cache reader");
            self.detach();
        }
    }
}

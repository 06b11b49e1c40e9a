//! # Sessions
//!
//! Every reader and writer attached to an entry is identified by a
//! [`SessionId`]. The entry only ever stores these identifiers, never a
//! reference back to the session itself.

use std::fmt;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};

/// Opaque identifier of a session attached to a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exclusive writer guard returned by [`CacheEntry::begin_write`].
///
/// Dropping the guard without calling [`WriteSession::finish`] closes the
/// writer as failed.
#[derive(Debug)]
pub struct WriteSession {
    entry: CacheEntry,
    session: SessionId,
    finished: bool,
}

impl WriteSession {
    pub(crate) fn new(entry: CacheEntry, session: SessionId) -> Self {
        Self {
            entry,
            session,
            finished: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// Append `data` to the entry.
    ///
    /// A failed write has already closed the writer slot, so the guard is
    /// finished afterwards.
    pub fn write(&mut self, data: &[u8]) -> CacheResult<()> {
        if self.finished {
            return Err(CacheError::NotWriter(self.session));
        }
        let result = self.entry.write(self.session, data);
        if result.is_err() && !self.entry.is_writer(self.session) {
            self.finished = true;
        }
        result
    }

    /// Close the writer, persisting metadata when `success` is set
    pub fn finish(mut self, success: bool) -> CacheResult<()> {
        self.finished = true;
        self.entry.close_write(self.session, success)
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.entry.close_write(self.session, false) {
            warn!(url = %self.entry.url(), error = %e, "Failed to abort cache write session");
        }
    }
}

//! # Memory Storage
//!
//! Growable in-memory buffer. The logical content is always followed by two
//! zero bytes so text payloads can be consumed as NUL-terminated strings.

use bytes::Bytes;

use crate::error::{CacheError, CacheResult};

use super::{BufferHandle, MemoryDescriptor};

/// Zero bytes kept past the logical end
pub const PADDING: usize = 2;

#[derive(Debug)]
pub struct MemoryStorage {
    handle: BufferHandle,
    // capacity + PADDING bytes, zero filled past `len`
    buffer: Vec<u8>,
    len: usize,
    generation: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            handle: BufferHandle::new(),
            buffer: Vec::new(),
            len: 0,
            generation: 0,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Usable bytes before the next reallocation
    pub fn capacity(&self) -> usize {
        self.buffer.len().saturating_sub(PADDING)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }

    pub fn descriptor(&self) -> MemoryDescriptor {
        MemoryDescriptor {
            length: self.len as u64,
            handle: self.handle,
            generation: self.generation,
        }
    }

    /// Grow to at least `capacity` usable bytes. Never shrinks.
    pub fn reserve(&mut self, capacity: usize) -> CacheResult<()> {
        if capacity <= self.capacity() {
            return Ok(());
        }
        let target = capacity
            .checked_add(PADDING)
            .ok_or(CacheError::OutOfMemory(capacity))?;
        self.buffer
            .try_reserve_exact(target - self.buffer.len())
            .map_err(|_| CacheError::OutOfMemory(capacity))?;
        self.buffer.resize(target, 0);
        self.generation += 1;
        Ok(())
    }

    /// Set the logical length back to 0, keeping the allocation
    pub fn reset(&mut self) {
        self.len = 0;
        self.pad();
    }

    /// Append `data`, doubling the capacity (or growing to the needed size
    /// if larger) when it does not fit
    pub fn append(&mut self, data: &[u8]) -> CacheResult<()> {
        let needed = self
            .len
            .checked_add(data.len())
            .ok_or(CacheError::OutOfMemory(usize::MAX))?;
        if needed > self.capacity() {
            self.reserve(needed.max(self.capacity().saturating_mul(2)))?;
        }
        self.buffer[self.len..needed].copy_from_slice(data);
        self.len = needed;
        self.pad();
        Ok(())
    }

    /// Replace the whole content with a copy of `data`
    pub fn replace(&mut self, data: &[u8]) -> CacheResult<()> {
        self.reset();
        self.append(data)
    }

    /// Drop the allocation
    pub fn release(&mut self) {
        self.buffer = Vec::new();
        self.len = 0;
        self.generation += 1;
    }

    fn pad(&mut self) {
        if let Some(tail) = self.buffer.get_mut(self.len..self.len + PADDING) {
            tail.fill(0);
        }
    }

    #[cfg(test)]
    fn padded(&self) -> &[u8] {
        &self.buffer[..self.len + PADDING]
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

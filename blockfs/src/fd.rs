//! Open file descriptors. Unlike inodes, file descriptors are never
//! written to the backing file — they describe process-local read/write
//! cursors and are reconstructed empty on every `mount`, so a plain
//! in-memory table (rather than the byte-record [`SubStore`](crate::sub_store::SubStore))
//! is the right shape for them.

use crate::consts::*;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub inum: u8,
    offset: usize,
}

impl FileDescriptor {
    fn new(inum: u8) -> Self {
        FileDescriptor { inum, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Logical block index and in-block byte offset for the cursor's
    /// current position. Recomputed fresh from `offset` every time rather
    /// than tracked incrementally, so the cursor can never drift out of
    /// sync with itself.
    pub fn cursor(&self) -> (usize, usize) {
        (self.offset / BLOCK_SIZE_BYTES, self.offset % BLOCK_SIZE_BYTES)
    }

    /// Always clamps to `[0, file_size]` rather than erroring — a very
    /// negative delta lands at 0, a very large one lands at `file_size`,
    /// matching the original's `_clamped_add(new_cursor, offset, 0,
    /// inode.file_size)`.
    pub fn seek(&mut self, whence: Whence, delta: i64, file_size: usize) -> usize {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => self.offset as i64,
            Whence::End => file_size as i64,
        };
        let new_offset = base.saturating_add(delta);
        self.offset = new_offset.clamp(0, file_size as i64) as usize;
        self.offset
    }

    pub fn advance(&mut self, n: usize) {
        self.offset += n;
    }
}

pub struct FdTable {
    slots: Vec<Option<FileDescriptor>>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable {
            slots: (0..NUM_FDS).map(|_| None).collect(),
        }
    }

    pub fn open(&mut self, inum: u8) -> Result<u8> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::OutOfSpace)?;
        self.slots[slot] = Some(FileDescriptor::new(inum));
        Ok(slot as u8)
    }

    pub fn close(&mut self, fd: u8) -> Result<()> {
        let slot = self.slot_mut(fd)?;
        if slot.is_none() {
            return Err(Error::NotFound("file descriptor is not open"));
        }
        *slot = None;
        Ok(())
    }

    pub fn get(&self, fd: u8) -> Result<&FileDescriptor> {
        self.slots
            .get(fd as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Error::NotFound("file descriptor is not open"))
    }

    pub fn get_mut(&mut self, fd: u8) -> Result<&mut FileDescriptor> {
        self.slots
            .get_mut(fd as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Error::NotFound("file descriptor is not open"))
    }

    fn slot_mut(&mut self, fd: u8) -> Result<&mut Option<FileDescriptor>> {
        self.slots
            .get_mut(fd as usize)
            .ok_or(Error::InvalidArgument("file descriptor out of range"))
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

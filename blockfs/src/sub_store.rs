//! A sub-store is a fixed-record allocator layered over a flat byte buffer,
//! used for both the inode table and the file-descriptor table. Unlike the
//! whole [`BlockStore`](crate::block_store::BlockStore), callers read and
//! write whole records (inodes, file descriptors), not raw blocks.
//!
//! The inode sub-store's bitmap and record bytes are additionally synced
//! into reserved blocks of the whole store by `fs.rs`, so they survive
//! `serialize`/`deserialize`. The fd sub-store is never synced — per the
//! spec, file descriptors are process-local and reconstructed empty on
//! every `mount`.

use crate::bitmap::Bitmap;

pub struct SubStore {
    bitmap: Bitmap<'static>,
    record_size: usize,
    records: Vec<u8>,
}

impl SubStore {
    pub fn new(num_records: usize, record_size: usize) -> Self {
        SubStore {
            bitmap: Bitmap::new(num_records),
            record_size,
            records: vec![0u8; num_records * record_size],
        }
    }

    pub fn num_records(&self) -> usize {
        self.bitmap.bits()
    }

    fn in_range(&self, index: usize) -> bool {
        index < self.num_records()
    }

    pub fn test(&self, index: usize) -> bool {
        self.in_range(index) && self.bitmap.test(index)
    }

    /// Allocate the first free record slot, returning its index.
    pub fn allocate(&mut self) -> Option<usize> {
        let idx = self.bitmap.first_zero()?;
        self.bitmap.set(idx);
        let start = idx * self.record_size;
        self.records[start..start + self.record_size].fill(0);
        Some(idx)
    }

    pub fn release(&mut self, index: usize) {
        if self.in_range(index) {
            self.bitmap.reset(index);
        }
    }

    /// Read a record's raw bytes. Returns the number of bytes transferred:
    /// 0 if out of range or not allocated, `record_size` on success.
    pub fn read(&self, index: usize, buf: &mut [u8]) -> usize {
        if !self.in_range(index) || !self.bitmap.test(index) || buf.len() < self.record_size {
            return 0;
        }
        let start = index * self.record_size;
        buf[..self.record_size].copy_from_slice(&self.records[start..start + self.record_size]);
        self.record_size
    }

    /// Write a record's raw bytes. Unlike `read`, this does not require the
    /// slot to already be marked allocated, mirroring the original's
    /// `block_store_inode_write`/`block_store_fd_write`, which trust the
    /// caller to have allocated first.
    pub fn write(&mut self, index: usize, buf: &[u8]) -> usize {
        if !self.in_range(index) || buf.len() < self.record_size {
            return 0;
        }
        let start = index * self.record_size;
        self.records[start..start + self.record_size].copy_from_slice(&buf[..self.record_size]);
        self.record_size
    }

    /// Raw bytes of the occupancy bitmap, for write-through syncing.
    pub fn bitmap_bytes(&self) -> &[u8] {
        self.bitmap.as_bytes()
    }

    pub fn load_bitmap_bytes(&mut self, bytes: &[u8]) {
        self.bitmap.load_bytes(bytes);
    }

    /// Raw bytes of the whole record table, for write-through syncing.
    pub fn record_bytes(&self) -> &[u8] {
        &self.records
    }

    pub fn load_record_bytes(&mut self, bytes: &[u8]) {
        let n = self.records.len().min(bytes.len());
        self.records[..n].copy_from_slice(&bytes[..n]);
    }
}

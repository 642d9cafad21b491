//! The block store: a fixed-size array of blocks plus an embedded
//! free-block map (FBM).
//!
//! The FBM logically lives inside the last [`FBM_NUM_BLOCKS`] blocks of the
//! store it describes. Rather than alias a `Bitmap` over those blocks'
//! bytes (which safe Rust cannot express without also giving up ordinary
//! `&mut` access to the rest of the store), this implementation keeps the
//! FBM as a plain owned [`Bitmap`] and re-syncs it into the reserved blocks
//! after every mutation. `serialize`/`deserialize` therefore always see
//! exactly the same bytes a C-style aliased view would have produced.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, trace};

use crate::bitmap::Bitmap;
use crate::consts::*;
use crate::error::{Error, Result};

pub type BlockId = u32;
pub type Block = [u8; BLOCK_SIZE_BYTES];

pub struct BlockStore {
    blocks: Vec<Block>,
    fbm: Bitmap<'static>,
}

impl BlockStore {
    /// Create a new store with every block zeroed, except that the FBM's
    /// own reserved blocks are marked in-use (in the bitmap and synced out
    /// to those blocks' bytes).
    pub fn create() -> Self {
        let mut store = BlockStore {
            blocks: vec![[0u8; BLOCK_SIZE_BYTES]; BLOCK_STORE_NUM_BLOCKS],
            fbm: Bitmap::new(BLOCK_STORE_NUM_BLOCKS),
        };
        for b in FBM_START_BLOCK..BLOCK_STORE_NUM_BLOCKS {
            store.fbm.set(b);
        }
        store.sync_fbm();
        debug!(
            "block store created: {} blocks, {} reserved for the free-block map",
            BLOCK_STORE_NUM_BLOCKS, FBM_NUM_BLOCKS
        );
        store
    }

    /// Write the in-memory FBM's bytes out to its reserved trailing blocks.
    fn sync_fbm(&mut self) {
        let bytes = self.fbm.as_bytes();
        for (i, block_idx) in (FBM_START_BLOCK..BLOCK_STORE_NUM_BLOCKS).enumerate() {
            let block = &mut self.blocks[block_idx];
            block.fill(0);
            let start = i * BLOCK_SIZE_BYTES;
            if start >= bytes.len() {
                continue;
            }
            let end = (start + BLOCK_SIZE_BYTES).min(bytes.len());
            block[..end - start].copy_from_slice(&bytes[start..end]);
        }
    }

    /// Rebuild the in-memory FBM from whatever bytes currently sit in the
    /// reserved trailing blocks. Used after overwriting the block array
    /// wholesale, as `deserialize` does.
    fn reload_fbm(&mut self) {
        let mut bytes = Vec::with_capacity(FBM_NUM_BLOCKS * BLOCK_SIZE_BYTES);
        for block_idx in FBM_START_BLOCK..BLOCK_STORE_NUM_BLOCKS {
            bytes.extend_from_slice(&self.blocks[block_idx]);
        }
        self.fbm.load_bytes(&bytes);
    }

    fn in_range(&self, id: BlockId) -> bool {
        (id as usize) < BLOCK_STORE_NUM_BLOCKS
    }

    /// Find the first free block, mark it used, and return its id. `None`
    /// if the store is full.
    pub fn allocate(&mut self) -> Option<BlockId> {
        let id = self.fbm.first_zero()? as BlockId;
        let ok = self.request(id);
        debug_assert!(ok);
        trace!("block store: allocated block {id}");
        Some(id)
    }

    /// Reserve a specific block. Fails if already used or out of range.
    pub fn request(&mut self, id: BlockId) -> bool {
        if !self.in_range(id) || self.fbm.test(id as usize) {
            return false;
        }
        self.fbm.set(id as usize);
        self.sync_fbm();
        true
    }

    /// Mark a block free. No error if it was already free or out of range.
    pub fn release(&mut self, id: BlockId) {
        if !self.in_range(id) {
            return;
        }
        self.fbm.reset(id as usize);
        self.sync_fbm();
        trace!("block store: released block {id}");
    }

    pub fn used_count(&self) -> usize {
        self.fbm.popcount()
    }

    pub fn free_count(&self) -> usize {
        BLOCK_STORE_NUM_BLOCKS - self.used_count()
    }

    pub fn total_count(&self) -> usize {
        BLOCK_STORE_NUM_BLOCKS
    }

    pub fn is_allocated(&self, id: BlockId) -> bool {
        self.in_range(id) && self.fbm.test(id as usize)
    }

    /// Full-block copy out of the store. Returns bytes transferred: 0 on
    /// any boundary failure, `BLOCK_SIZE_BYTES` on success.
    pub fn read(&self, id: BlockId, buf: &mut Block) -> usize {
        if !self.in_range(id) {
            return 0;
        }
        buf.copy_from_slice(&self.blocks[id as usize]);
        BLOCK_SIZE_BYTES
    }

    /// Full-block copy into the store.
    pub fn write(&mut self, id: BlockId, buf: &Block) -> usize {
        if !self.in_range(id) {
            return 0;
        }
        self.blocks[id as usize].copy_from_slice(buf);
        BLOCK_SIZE_BYTES
    }

    /// Write every block to `path`, truncating any prior content, mode
    /// 0644.
    pub fn serialize(&self, path: impl AsRef<Path>) -> Result<()> {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)?;
        for block in &self.blocks {
            file.write_all(block)?;
        }
        file.flush()?;
        Ok(())
    }

    /// Create a fresh store, then overwrite its block array with the file
    /// contents at `path`. Fails if fewer bytes are present than a full
    /// image.
    pub fn deserialize(path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self::create();
        let mut file = File::open(path)?;
        let mut buf = vec![0u8; BLOCK_SIZE_BYTES];
        for block in store.blocks.iter_mut() {
            file.read_exact(&mut buf).map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "backing file shorter than the block store image",
                ))
            })?;
            block.copy_from_slice(&buf);
        }
        store.reload_fbm();
        Ok(store)
    }
}

/// Tracks blocks allocated during a multi-step operation (e.g. appending a
/// new data block to a file, which may also need a fresh indirect block)
/// and releases any that were never committed when the guard drops.
///
/// Replaces the `goto err_N` rollback chains of the original C: instead of
/// manually undoing each allocation on every early-return path, operations
/// push freshly allocated ids onto a `BlockGuard` and call `commit()` only
/// once the operation has fully succeeded.
pub struct BlockGuard<'a> {
    store: &'a mut BlockStore,
    pending: Vec<BlockId>,
    committed: bool,
}

impl<'a> BlockGuard<'a> {
    pub fn new(store: &'a mut BlockStore) -> Self {
        BlockGuard {
            store,
            pending: Vec::new(),
            committed: false,
        }
    }

    /// Allocate a block and track it for rollback.
    pub fn allocate(&mut self) -> Option<BlockId> {
        let id = self.store.allocate()?;
        self.pending.push(id);
        Some(id)
    }

    pub fn store(&mut self) -> &mut BlockStore {
        &mut *self.store
    }

    /// Keep every block allocated through this guard. After this call,
    /// dropping the guard does nothing.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl<'a> Drop for BlockGuard<'a> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for id in self.pending.drain(..) {
            self.store.release(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reserves_fbm_blocks() {
        let bs = BlockStore::create();
        assert_eq!(bs.used_count(), FBM_NUM_BLOCKS);
        for b in FBM_START_BLOCK..BLOCK_STORE_NUM_BLOCKS {
            assert!(bs.is_allocated(b as BlockId));
        }
    }

    #[test]
    fn allocate_then_release_roundtrips() {
        let mut bs = BlockStore::create();
        let id = bs.allocate().unwrap();
        assert!(bs.is_allocated(id));
        bs.release(id);
        assert!(!bs.is_allocated(id));
    }

    #[test]
    fn request_rejects_already_used() {
        let mut bs = BlockStore::create();
        let id = bs.allocate().unwrap();
        assert!(!bs.request(id));
    }

    #[test]
    fn read_write_roundtrip() {
        let mut bs = BlockStore::create();
        let id = bs.allocate().unwrap();
        let mut buf = [0u8; BLOCK_SIZE_BYTES];
        buf[0] = 0xAB;
        assert_eq!(bs.write(id, &buf), BLOCK_SIZE_BYTES);
        let mut out = [0u8; BLOCK_SIZE_BYTES];
        assert_eq!(bs.read(id, &mut out), BLOCK_SIZE_BYTES);
        assert_eq!(out, buf);
    }

    #[test]
    fn out_of_range_read_write_fail_without_side_effects() {
        let mut bs = BlockStore::create();
        let used_before = bs.used_count();
        let mut buf = [0u8; BLOCK_SIZE_BYTES];
        assert_eq!(bs.read(BLOCK_STORE_NUM_BLOCKS as BlockId, &mut buf), 0);
        assert_eq!(bs.write(BLOCK_STORE_NUM_BLOCKS as BlockId, &buf), 0);
        assert_eq!(bs.used_count(), used_before);
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.img");

        let mut bs = BlockStore::create();
        let id = bs.allocate().unwrap();
        let mut buf = [0u8; BLOCK_SIZE_BYTES];
        buf[10] = 0x42;
        bs.write(id, &buf);
        bs.serialize(&path).unwrap();

        let bs2 = BlockStore::deserialize(&path).unwrap();
        assert_eq!(bs2.used_count(), bs.used_count());
        let mut out = [0u8; BLOCK_SIZE_BYTES];
        bs2.read(id, &mut out);
        assert_eq!(out, buf);
    }

    #[test]
    fn allocate_exhaustion_returns_none() {
        let mut bs = BlockStore::create();
        while bs.allocate().is_some() {}
        assert_eq!(bs.free_count(), 0);
        assert!(bs.allocate().is_none());
    }

    #[test]
    fn uncommitted_guard_releases_blocks_on_drop() {
        let mut bs = BlockStore::create();
        let used_before = bs.used_count();
        {
            let mut guard = BlockGuard::new(&mut bs);
            guard.allocate().unwrap();
            guard.allocate().unwrap();
        }
        assert_eq!(bs.used_count(), used_before);
    }

    #[test]
    fn committed_guard_keeps_blocks() {
        let mut bs = BlockStore::create();
        let used_before = bs.used_count();
        let id = {
            let mut guard = BlockGuard::new(&mut bs);
            let id = guard.allocate().unwrap();
            guard.commit();
            id
        };
        assert_eq!(bs.used_count(), used_before + 1);
        assert!(bs.is_allocated(id));
    }
}

//! The file system façade: the single entry point that ties the block
//! store, the inode sub-store, directories, and open file descriptors
//! together into `format`/`mount`/`create`/`open`/`read`/`write`/...

use std::path::Path;

use log::{debug, info};

use crate::block_store::{BlockGuard, BlockId, BlockStore};
use crate::consts::*;
use crate::directory::{self, DirEntry};
use crate::error::{Error, Result};
use crate::fd::{FdTable, Whence};
use crate::inode::{FileType, Inode};
use crate::path;
use crate::sub_store::SubStore;

pub struct FS {
    store: BlockStore,
    inodes: SubStore,
    fds: FdTable,
}

impl FS {
    /// Build a brand new, empty file system: a fresh block store with the
    /// inode table's blocks reserved and a root directory created at inum
    /// 0.
    pub fn format() -> Self {
        let mut store = BlockStore::create();
        for b in 0..(INODE_TABLE_START_BLOCK + INODE_TABLE_NUM_BLOCKS) {
            store.request(b as BlockId);
        }
        let inodes = SubStore::new(NUM_INODES, INODE_SIZE);
        let mut fs = FS {
            store,
            inodes,
            fds: FdTable::new(),
        };
        fs.sync_inodes_to_store();
        fs.create_root()
            .expect("root directory creation cannot fail on a freshly formatted store");
        info!("file system formatted");
        fs
    }

    /// Load a file system from a backing file written by a prior
    /// `unmount`. File descriptors always start empty: they are
    /// process-local and were never part of the image.
    pub fn mount(path: impl AsRef<Path>) -> Result<Self> {
        let store = BlockStore::deserialize(path)?;
        let inodes = SubStore::new(NUM_INODES, INODE_SIZE);
        let mut fs = FS {
            store,
            inodes,
            fds: FdTable::new(),
        };
        fs.reload_inodes_from_store();
        info!("file system mounted");
        Ok(fs)
    }

    pub fn unmount(&self, path: impl AsRef<Path>) -> Result<()> {
        self.store.serialize(path)?;
        info!("file system unmounted");
        Ok(())
    }

    fn create_root(&mut self) -> Result<()> {
        let inum = self.inodes.allocate().ok_or(Error::OutOfSpace)? as u8;
        debug_assert_eq!(inum, ROOT_INUM);
        let mut inode = Inode::new(FileType::Directory);
        inode.link_count = 1;
        {
            let mut guard = BlockGuard::new(&mut self.store);
            inode.block_for_write(0, &mut guard)?;
            guard.commit();
        }
        self.write_inode(inum, &inode);
        Ok(())
    }

    fn sync_inodes_to_store(&mut self) {
        let mut bitmap_block = [0u8; BLOCK_SIZE_BYTES];
        let bm = self.inodes.bitmap_bytes();
        bitmap_block[..bm.len()].copy_from_slice(bm);
        self.store.write(INODE_BITMAP_BLOCK as BlockId, &bitmap_block);

        let records = self.inodes.record_bytes();
        for i in 0..INODE_TABLE_NUM_BLOCKS {
            let mut block = [0u8; BLOCK_SIZE_BYTES];
            let start = i * BLOCK_SIZE_BYTES;
            let end = (start + BLOCK_SIZE_BYTES).min(records.len());
            block[..end - start].copy_from_slice(&records[start..end]);
            self.store.write((INODE_TABLE_START_BLOCK + i) as BlockId, &block);
        }
    }

    fn reload_inodes_from_store(&mut self) {
        let mut bitmap_block = [0u8; BLOCK_SIZE_BYTES];
        self.store.read(INODE_BITMAP_BLOCK as BlockId, &mut bitmap_block);
        self.inodes.load_bitmap_bytes(&bitmap_block);

        let mut records = Vec::with_capacity(INODE_TABLE_NUM_BLOCKS * BLOCK_SIZE_BYTES);
        for i in 0..INODE_TABLE_NUM_BLOCKS {
            let mut block = [0u8; BLOCK_SIZE_BYTES];
            self.store.read((INODE_TABLE_START_BLOCK + i) as BlockId, &mut block);
            records.extend_from_slice(&block);
        }
        self.inodes.load_record_bytes(&records);
    }

    fn read_inode(&self, inum: u8) -> Result<Inode> {
        let mut buf = [0u8; INODE_SIZE];
        if self.inodes.read(inum as usize, &mut buf) == 0 {
            return Err(Error::NotFound("inode is not allocated"));
        }
        Ok(Inode::from_bytes(&buf))
    }

    /// Always routes inode writes through the inode sub-store's typed API,
    /// including error-path rollback writes in `create` — writing an
    /// inode's bytes through the whole block store, keyed by inode number,
    /// would silently corrupt whatever data block happens to share that
    /// index.
    fn write_inode(&mut self, inum: u8, inode: &Inode) {
        let bytes = inode.to_bytes();
        self.inodes.write(inum as usize, &bytes);
        self.sync_inodes_to_store();
    }

    fn dir_block(&self, inode: &Inode) -> Result<[u8; BLOCK_SIZE_BYTES]> {
        let id = inode
            .block_for_read(0, &self.store)
            .ok_or(Error::Structural("directory has no entry block"))?;
        let mut buf = [0u8; BLOCK_SIZE_BYTES];
        self.store.read(id, &mut buf);
        Ok(buf)
    }

    fn namei(&self, path: &str) -> Result<u8> {
        let parts = path::components(path)?;
        let mut cur = ROOT_INUM;
        for part in parts {
            let inode = self.read_inode(cur)?;
            if inode.file_type != FileType::Directory {
                return Err(Error::TypeMismatch("path component is not a directory"));
            }
            let block = self.dir_block(&inode)?;
            let entry = directory::find_child(&block, &inode.dir_bitmap, part)
                .ok_or(Error::NotFound("no such file or directory"))?;
            cur = entry.inum;
        }
        Ok(cur)
    }

    fn create(&mut self, path: &str, file_type: FileType) -> Result<u8> {
        if path.len() > 1 && path.ends_with('/') {
            return Err(Error::InvalidArgument("path must not end with a trailing slash"));
        }
        let parent_path = path::dirname(path)?;
        let name = path::basename(path)?;
        let parent_inum = self.namei(&parent_path)?;
        let mut parent_inode = self.read_inode(parent_inum)?;
        if parent_inode.file_type != FileType::Directory {
            return Err(Error::TypeMismatch("parent is not a directory"));
        }
        let mut parent_block = self.dir_block(&parent_inode)?;
        if directory::find_child(&parent_block, &parent_inode.dir_bitmap, name).is_some() {
            return Err(Error::Exists("a file with that name already exists"));
        }

        let child_inum = self.inodes.allocate().ok_or(Error::OutOfSpace)? as u8;
        let outcome = self.populate_new_child(
            child_inum,
            file_type,
            &mut parent_inode,
            parent_inum,
            &mut parent_block,
            name,
        );

        if let Err(e) = outcome {
            // Roll back the inode allocation itself through the same typed
            // API used for every other inode write.
            self.inodes.release(child_inum as usize);
            self.sync_inodes_to_store();
            return Err(e);
        }
        debug!("created {:?} at {path} (inum {child_inum})", file_type);
        Ok(child_inum)
    }

    fn populate_new_child(
        &mut self,
        child_inum: u8,
        file_type: FileType,
        parent_inode: &mut Inode,
        parent_inum: u8,
        parent_block: &mut [u8; BLOCK_SIZE_BYTES],
        name: &str,
    ) -> Result<()> {
        let mut child_inode = Inode::new(file_type);
        child_inode.link_count = 1;
        if file_type == FileType::Directory {
            let mut guard = BlockGuard::new(&mut self.store);
            child_inode.block_for_write(0, &mut guard)?;
            guard.commit();
        }
        self.write_inode(child_inum, &child_inode);

        directory::add_child(parent_block, &mut parent_inode.dir_bitmap, name, child_inum)?;
        let parent_block_id = parent_inode
            .block_for_read(0, &self.store)
            .ok_or(Error::Structural("parent directory has no entry block"))?;
        self.store.write(parent_block_id, parent_block);
        self.write_inode(parent_inum, parent_inode);
        Ok(())
    }

    pub fn mkdir(&mut self, path: &str) -> Result<u8> {
        self.create(path, FileType::Directory)
    }

    pub fn touch(&mut self, path: &str) -> Result<u8> {
        self.create(path, FileType::Regular)
    }

    pub fn open(&mut self, path: &str) -> Result<u8> {
        let inum = self.namei(path)?;
        let inode = self.read_inode(inum)?;
        if inode.file_type != FileType::Regular {
            return Err(Error::TypeMismatch("only regular files can be opened"));
        }
        self.fds.open(inum)
    }

    pub fn close(&mut self, fd: u8) -> Result<()> {
        self.fds.close(fd)
    }

    pub fn seek(&mut self, fd: u8, whence: Whence, delta: i64) -> Result<usize> {
        let inum = self.fds.get(fd)?.inum;
        let file_size = self.read_inode(inum)?.file_size as usize;
        Ok(self.fds.get_mut(fd)?.seek(whence, delta, file_size))
    }

    pub fn read(&mut self, fd: u8, buf: &mut [u8]) -> Result<usize> {
        let inum = self.fds.get(fd)?.inum;
        let inode = self.read_inode(inum)?;
        let start_offset = self.fds.get(fd)?.offset();
        let remaining_in_file = (inode.file_size as usize).saturating_sub(start_offset);
        let to_read = buf.len().min(remaining_in_file);

        let mut done = 0;
        while done < to_read {
            let offset = start_offset + done;
            let logical = offset / BLOCK_SIZE_BYTES;
            let in_block = offset % BLOCK_SIZE_BYTES;
            let block_id = match inode.block_for_read(logical, &self.store) {
                Some(id) => id,
                None => break,
            };
            let mut block_buf = [0u8; BLOCK_SIZE_BYTES];
            self.store.read(block_id, &mut block_buf);
            let take = (BLOCK_SIZE_BYTES - in_block).min(to_read - done);
            buf[done..done + take].copy_from_slice(&block_buf[in_block..in_block + take]);
            done += take;
        }
        self.fds.get_mut(fd)?.advance(done);
        Ok(done)
    }

    /// Writes up to `buf.len()` bytes starting at the descriptor's cursor.
    /// Running out of free blocks, or reaching the absolute maximum file
    /// size, stops the write early rather than failing it: whatever was
    /// written before that point stays committed, `file_size` and the
    /// cursor advance by the short count, and `Ok(done)` is returned with
    /// `done < buf.len()`. Only a genuine I/O or structural failure rolls
    /// back this call's allocations and returns `Err`.
    pub fn write(&mut self, fd: u8, buf: &[u8]) -> Result<usize> {
        let inum = self.fds.get(fd)?.inum;
        let mut inode = self.read_inode(inum)?;
        let start_offset = self.fds.get(fd)?.offset();

        let mut done = 0;
        let mut guard = BlockGuard::new(&mut self.store);
        while done < buf.len() {
            let offset = start_offset + done;
            if offset >= MAX_FILE_SIZE {
                break;
            }
            let logical = offset / BLOCK_SIZE_BYTES;
            let in_block = offset % BLOCK_SIZE_BYTES;
            let block_id = match inode.block_for_write(logical, &mut guard) {
                Ok(id) => id,
                Err(Error::OutOfSpace) => break,
                Err(e) => return Err(e),
            };

            let mut block_buf = [0u8; BLOCK_SIZE_BYTES];
            guard.store().read(block_id, &mut block_buf);
            let take = (BLOCK_SIZE_BYTES - in_block)
                .min(buf.len() - done)
                .min(MAX_FILE_SIZE - offset);
            block_buf[in_block..in_block + take].copy_from_slice(&buf[done..done + take]);
            guard.store().write(block_id, &block_buf);
            done += take;
        }
        guard.commit();

        let new_size = (start_offset + done) as u32;
        if new_size > inode.file_size {
            inode.file_size = new_size;
        }
        self.write_inode(inum, &inode);
        self.fds.get_mut(fd)?.advance(done);
        Ok(done)
    }

    pub fn get_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let inum = self.namei(path)?;
        let inode = self.read_inode(inum)?;
        if inode.file_type != FileType::Directory {
            return Err(Error::TypeMismatch("not a directory"));
        }
        let block = self.dir_block(&inode)?;
        Ok(directory::list_children(&block, &inode.dir_bitmap))
    }

    pub fn free_blocks(&self) -> usize {
        self.store.free_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_creates_root_directory() {
        let fs = FS::format();
        assert_eq!(fs.get_dir("/").unwrap().len(), 0);
    }

    #[test]
    fn mkdir_then_touch_nested() {
        let mut fs = FS::format();
        fs.mkdir("/docs").unwrap();
        fs.touch("/docs/readme.txt").unwrap();
        let entries = fs.get_dir("/docs").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "readme.txt");
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut fs = FS::format();
        fs.touch("/a.txt").unwrap();
        let fd = fs.open("/a.txt").unwrap();
        let data = b"hello, file system";
        assert_eq!(fs.write(fd, data).unwrap(), data.len());
        fs.seek(fd, Whence::Set, 0).unwrap();
        let mut out = vec![0u8; data.len()];
        assert_eq!(fs.read(fd, &mut out).unwrap(), data.len());
        assert_eq!(&out, data);
    }

    #[test]
    fn write_spanning_direct_and_indirect_tiers() {
        let mut fs = FS::format();
        fs.touch("/big.bin").unwrap();
        let fd = fs.open("/big.bin").unwrap();
        let size = (MAX_DIRECT_BLOCKS + 2) * BLOCK_SIZE_BYTES;
        let data = vec![0x5Au8; size];
        assert_eq!(fs.write(fd, &data).unwrap(), size);
        fs.seek(fd, Whence::Set, 0).unwrap();
        let mut out = vec![0u8; size];
        assert_eq!(fs.read(fd, &mut out).unwrap(), size);
        assert_eq!(out, data);
    }

    #[test]
    fn duplicate_create_leaves_free_block_count_unchanged() {
        let mut fs = FS::format();
        fs.touch("/x.txt").unwrap();
        let free_before = fs.free_blocks();
        let err = fs.touch("/x.txt").unwrap_err();
        assert!(matches!(err, Error::Exists(_)));
        assert_eq!(fs.free_blocks(), free_before);
    }

    #[test]
    fn directory_full_at_31_children() {
        let mut fs = FS::format();
        fs.mkdir("/many").unwrap();
        for i in 0..DIR_ENTRIES_PER_BLOCK {
            fs.touch(&format!("/many/f{i}")).unwrap();
        }
        let err = fs.touch("/many/one_too_many").unwrap_err();
        assert!(matches!(err, Error::OutOfSpace));
    }

    #[test]
    fn create_rejects_trailing_slash() {
        let mut fs = FS::format();
        let err = fs.mkdir("/docs/").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn write_returns_short_count_when_store_is_full() {
        let mut fs = FS::format();
        fs.touch("/a.txt").unwrap();
        let fd = fs.open("/a.txt").unwrap();
        while fs.store.allocate().is_some() {}

        let data = vec![7u8; BLOCK_SIZE_BYTES * 2];
        let written = fs.write(fd, &data).unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn write_exhausting_space_mid_write_keeps_already_written_block() {
        let mut fs = FS::format();
        fs.touch("/a.txt").unwrap();
        let fd = fs.open("/a.txt").unwrap();

        let mut spare = None;
        while let Some(id) = fs.store.allocate() {
            spare = Some(id);
        }
        fs.store.release(spare.unwrap());

        let data = vec![9u8; BLOCK_SIZE_BYTES * 2];
        let written = fs.write(fd, &data).unwrap();
        assert_eq!(written, BLOCK_SIZE_BYTES);
        assert_eq!(fs.free_blocks(), 0);

        fs.seek(fd, Whence::Set, 0).unwrap();
        let mut out = vec![0u8; BLOCK_SIZE_BYTES];
        fs.read(fd, &mut out).unwrap();
        assert_eq!(out, data[..BLOCK_SIZE_BYTES]);
    }

    #[test]
    fn opening_a_directory_is_rejected() {
        let mut fs = FS::format();
        fs.mkdir("/dir").unwrap();
        assert!(matches!(fs.open("/dir"), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn serialize_and_mount_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.img");

        let mut fs = FS::format();
        fs.mkdir("/docs").unwrap();
        fs.touch("/docs/a.txt").unwrap();
        let fd = fs.open("/docs/a.txt").unwrap();
        fs.write(fd, b"persisted").unwrap();
        fs.close(fd).unwrap();
        fs.unmount(&path).unwrap();

        let mut remounted = FS::mount(&path).unwrap();
        let entries = remounted.get_dir("/docs").unwrap();
        assert_eq!(entries[0].name, "a.txt");
        let fd2 = remounted.open("/docs/a.txt").unwrap();
        let mut out = vec![0u8; "persisted".len()];
        remounted.read(fd2, &mut out).unwrap();
        assert_eq!(&out, b"persisted");
    }
}

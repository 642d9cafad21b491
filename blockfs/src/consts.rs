//! Wire-visible constants. These must not drift between `format` and
//! `mount` — they describe the on-disk layout, not just in-memory limits.

pub const BLOCK_SIZE_BYTES: usize = 1024;
pub const BLOCK_STORE_NUM_BLOCKS: usize = 65536;

/// Trailing blocks of the whole store reserved for the free-block map.
/// `BLOCK_STORE_NUM_BLOCKS` bits packed 8-to-a-byte need this many blocks.
pub const FBM_NUM_BLOCKS: usize = BLOCK_STORE_NUM_BLOCKS / 8 / BLOCK_SIZE_BYTES;
pub const FBM_START_BLOCK: usize = BLOCK_STORE_NUM_BLOCKS - FBM_NUM_BLOCKS;

pub const NUM_INODES: usize = 256;
pub const NUM_FDS: usize = 256;

pub const DIR_ENTRIES_PER_BLOCK: usize = 31;
pub const BLOCK_PTRS_PER_BLOCK: usize = 512;
pub const FD_DIRECT_N_PTRS: usize = 6;
pub const FS_FNAME_MAX: usize = 32;

pub const INODE_SIZE: usize = 64;
pub const FD_SIZE: usize = 16;

/// Block 0 of the whole store holds the inode-table bitmap.
pub const INODE_BITMAP_BLOCK: usize = 0;
/// Blocks 1..=16 hold the 256 inode records (16 blocks * 1024B / 64B each).
pub const INODE_TABLE_START_BLOCK: usize = 1;
pub const INODE_TABLE_NUM_BLOCKS: usize = NUM_INODES * INODE_SIZE / BLOCK_SIZE_BYTES;

pub const ROOT_INUM: u8 = 0;

pub const MAX_DIRECT_BLOCKS: usize = FD_DIRECT_N_PTRS;
pub const MAX_INDIRECT_BLOCKS: usize = MAX_DIRECT_BLOCKS + BLOCK_PTRS_PER_BLOCK;
pub const MAX_DOUBLE_INDIRECT_BLOCKS: usize =
    MAX_INDIRECT_BLOCKS + BLOCK_PTRS_PER_BLOCK * BLOCK_PTRS_PER_BLOCK;

pub const MAX_FILE_SIZE: usize = MAX_DOUBLE_INDIRECT_BLOCKS * BLOCK_SIZE_BYTES;

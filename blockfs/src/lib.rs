//! A block-oriented storage layer and a small hierarchical file system
//! built on top of it, modeled after a single flat image file addressed in
//! fixed-size blocks with an embedded free-block map.
//!
//! The public surface is the [`fs::FS`] façade; the lower layers
//! ([`block_store`], [`sub_store`], [`bitmap`]) are exposed for callers
//! (and tests) that want to drive the block store directly.

pub mod bitmap;
pub mod block_store;
pub mod consts;
pub mod directory;
pub mod error;
pub mod fd;
pub mod fs;
pub mod inode;
pub mod path;
pub mod sub_store;

pub use block_store::{BlockGuard, BlockId, BlockStore};
pub use directory::DirEntry;
pub use error::{Error, Result};
pub use fd::Whence;
pub use fs::FS;
pub use inode::FileType;

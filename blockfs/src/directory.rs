//! Directory entries and the operations over a directory's single entry
//! block. A directory never grows past one block, matching the original's
//! `DIR_ENTRIES_PER_BLOCK` ceiling — this crate has no multi-block
//! directories.

use crate::bitmap::Bitmap;
use crate::consts::*;
use crate::error::{Error, Result};

const ENTRY_SIZE: usize = FS_FNAME_MAX + 1;

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inum: u8,
}

fn encode_name(name: &str) -> Result<[u8; FS_FNAME_MAX]> {
    if name.is_empty() || name.len() >= FS_FNAME_MAX || name.contains('/') {
        return Err(Error::InvalidArgument("directory entry name is invalid"));
    }
    let mut buf = [0u8; FS_FNAME_MAX];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    Ok(buf)
}

fn decode_name(buf: &[u8; FS_FNAME_MAX]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn entry_at(block: &[u8; BLOCK_SIZE_BYTES], slot: usize) -> DirEntry {
    let start = slot * ENTRY_SIZE;
    let mut name_buf = [0u8; FS_FNAME_MAX];
    name_buf.copy_from_slice(&block[start..start + FS_FNAME_MAX]);
    DirEntry {
        name: decode_name(&name_buf),
        inum: block[start + FS_FNAME_MAX],
    }
}

fn write_entry_at(block: &mut [u8; BLOCK_SIZE_BYTES], slot: usize, name: &[u8; FS_FNAME_MAX], inum: u8) {
    let start = slot * ENTRY_SIZE;
    block[start..start + FS_FNAME_MAX].copy_from_slice(name);
    block[start + FS_FNAME_MAX] = inum;
}

/// Look up `name` among the live entries recorded in `live` (the
/// directory's entry-occupancy bitmap, `dir_bitmap` on its inode).
pub fn find_child(
    block: &[u8; BLOCK_SIZE_BYTES],
    live: &[u8; 4],
    name: &str,
) -> Option<DirEntry> {
    let mut live_copy = *live;
    let bitmap = Bitmap::overlay(DIR_ENTRIES_PER_BLOCK, &mut live_copy);
    for slot in 0..DIR_ENTRIES_PER_BLOCK {
        if !bitmap.test(slot) {
            continue;
        }
        let entry = entry_at(block, slot);
        if entry.name == name {
            return Some(entry);
        }
    }
    None
}

/// Every live entry in the directory, in slot order.
pub fn list_children(block: &[u8; BLOCK_SIZE_BYTES], live: &[u8; 4]) -> Vec<DirEntry> {
    let mut live_copy = *live;
    let bitmap = Bitmap::overlay(DIR_ENTRIES_PER_BLOCK, &mut live_copy);
    (0..DIR_ENTRIES_PER_BLOCK)
        .filter(|&slot| bitmap.test(slot))
        .map(|slot| entry_at(block, slot))
        .collect()
}

/// Insert a new entry. Fails with `Exists` if `name` is already present,
/// `OutOfSpace` if the block's 31 slots are full. On any failure `live` is
/// left unchanged.
pub fn add_child(
    block: &mut [u8; BLOCK_SIZE_BYTES],
    live: &mut [u8; 4],
    name: &str,
    inum: u8,
) -> Result<()> {
    let encoded = encode_name(name)?;
    if find_child(block, live, name).is_some() {
        return Err(Error::Exists("directory entry already exists"));
    }
    let mut bitmap = Bitmap::overlay(DIR_ENTRIES_PER_BLOCK, live);
    let slot = bitmap.first_zero().ok_or(Error::OutOfSpace)?;
    bitmap.set(slot);
    write_entry_at(block, slot, &encoded, inum);
    Ok(())
}

/// Remove the entry named `name`, if present. No error if it was absent.
pub fn remove_child(block: &mut [u8; BLOCK_SIZE_BYTES], live: &mut [u8; 4], name: &str) {
    let slot = {
        let bitmap = Bitmap::overlay(DIR_ENTRIES_PER_BLOCK, live);
        (0..DIR_ENTRIES_PER_BLOCK).find(|&slot| bitmap.test(slot) && entry_at(block, slot).name == name)
    };
    if let Some(slot) = slot {
        let mut bitmap = Bitmap::overlay(DIR_ENTRIES_PER_BLOCK, live);
        bitmap.reset(slot);
        let start = slot * ENTRY_SIZE;
        block[start..start + ENTRY_SIZE].fill(0);
    }
}

pub fn child_count(live: &[u8; 4]) -> usize {
    let mut live_copy = *live;
    let bitmap = Bitmap::overlay(DIR_ENTRIES_PER_BLOCK, &mut live_copy);
    bitmap.popcount()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_find_round_trips() {
        let mut block = [0u8; BLOCK_SIZE_BYTES];
        let mut live = [0u8; 4];
        add_child(&mut block, &mut live, "foo.txt", 3).unwrap();
        let found = find_child(&block, &live, "foo.txt").unwrap();
        assert_eq!(found.inum, 3);
    }

    #[test]
    fn duplicate_name_is_rejected_without_side_effects() {
        let mut block = [0u8; BLOCK_SIZE_BYTES];
        let mut live = [0u8; 4];
        add_child(&mut block, &mut live, "foo.txt", 3).unwrap();
        let before = live;
        let err = add_child(&mut block, &mut live, "foo.txt", 9).unwrap_err();
        assert!(matches!(err, Error::Exists(_)));
        assert_eq!(live, before);
    }

    #[test]
    fn directory_full_at_31_entries() {
        let mut block = [0u8; BLOCK_SIZE_BYTES];
        let mut live = [0u8; 4];
        for i in 0..DIR_ENTRIES_PER_BLOCK {
            add_child(&mut block, &mut live, &format!("f{i}"), i as u8).unwrap();
        }
        let err = add_child(&mut block, &mut live, "one_too_many", 0).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace));
        assert_eq!(child_count(&live), DIR_ENTRIES_PER_BLOCK);
    }

    #[test]
    fn remove_then_slot_is_reusable() {
        let mut block = [0u8; BLOCK_SIZE_BYTES];
        let mut live = [0u8; 4];
        add_child(&mut block, &mut live, "foo.txt", 3).unwrap();
        remove_child(&mut block, &mut live, "foo.txt");
        assert!(find_child(&block, &live, "foo.txt").is_none());
        add_child(&mut block, &mut live, "bar.txt", 4).unwrap();
        assert_eq!(child_count(&live), 1);
    }

    #[test]
    fn list_children_reports_only_live_entries() {
        let mut block = [0u8; BLOCK_SIZE_BYTES];
        let mut live = [0u8; 4];
        add_child(&mut block, &mut live, "a", 1).unwrap();
        add_child(&mut block, &mut live, "b", 2).unwrap();
        remove_child(&mut block, &mut live, "a");
        let names: Vec<_> = list_children(&block, &live).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b".to_string()]);
    }
}

//! Produces a valid, empty V6++ filesystem image.
//!
//! Ported from `original_source/format_disk.py`: zero the whole image,
//! build a fresh superblock, push every data block onto its free stack
//! (letting [`Superblock::release_block`]'s existing spill-to-chain
//! logic build the free-index chain), then write the root directory
//! inode. This crate always formats without the optional MBR boot area
//! (`S = 0`); `mkfs/src/ext2.rs`'s "write the whole image, then fill in
//! structures" ordering is the idiom this follows, generalized from one
//! filesystem's on-disk layout to this one's.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::accessor::ObjectAccessor;
use crate::cache::{BlockCache, DEFAULT_CAPACITY};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::inode::{FileKind, Inode};
use crate::layout::{BLOCK_SIZE, INODES_PER_BLOCK, ROOT_INODE, SUPERBLOCK_BLOCKS};
use crate::superblock::Superblock;

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn zero_file(file: &File, len: u64) -> Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(0))?;
    let zero_block = [0u8; BLOCK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(BLOCK_SIZE as u64) as usize;
        f.write_all(&zero_block[..chunk])?;
        remaining -= chunk as u64;
    }
    f.flush()?;
    Ok(())
}

/// Formats `file` as a fresh V6++ image with `inode_blocks` blocks of
/// inode table (8 inodes each). The image's current length (a multiple
/// of `BLOCK_SIZE`) determines the total block count; callers `set_len`
/// it before calling this.
pub fn format_image(file: &File, inode_blocks: u64) -> Result<()> {
    let len = file.metadata()?.len();
    if len % BLOCK_SIZE as u64 != 0 {
        return Err(Error::Corruption(format!(
            "image length {len} is not a multiple of the block size"
        )));
    }
    let total_blocks = len / BLOCK_SIZE as u64;
    let data_region_start = SUPERBLOCK_BLOCKS + inode_blocks;
    if data_region_start >= total_blocks {
        return Err(Error::Corruption(
            "inode region leaves no room for a data region".into(),
        ));
    }
    info!("formatting image: {total_blocks} blocks, {inode_blocks} inode blocks");

    zero_file(file, len)?;

    let device = BlockDevice::open(file.try_clone()?)?;
    let cache = BlockCache::new(device, DEFAULT_CAPACITY);
    let mut accessor = ObjectAccessor::open(cache)?;

    let files = inode_blocks * INODES_PER_BLOCK;
    // Inode 0 is the reserved "none" slot: the free-inode scan (both the
    // cache refill and a from-scratch recompute) always starts at 1, so
    // it is never counted as free. Seed ffree from the scannable range
    // only, to match what a hash-mismatch recompute would find.
    let mut superblock = Superblock {
        isize_blocks: inode_blocks,
        fsize_blocks: total_blocks,
        nfree: 0,
        free: [0; crate::layout::MAX_FREE_CACHE],
        ninode: 0,
        inode_cache: [0; crate::layout::MAX_FREE_CACHE],
        time: now(),
        bfree: 0,
        files,
        ffree: files - 1,
    };

    for b in data_region_start..total_blocks {
        superblock.release_block(&mut accessor, b)?;
    }

    let root = Inode::new(ROOT_INODE, FileKind::Directory, superblock.time);
    root.flush(&mut accessor)?;
    superblock.ffree -= 1;

    let record = superblock.to_record();
    accessor.set_superblock(&record)?;
    accessor.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Filesystem;
    use tempfile::tempfile;

    #[test]
    fn format_produces_mountable_image_with_empty_root() {
        let file = tempfile().unwrap();
        file.set_len(256 * BLOCK_SIZE as u64).unwrap();
        format_image(&file, 4).unwrap();

        let mut fs = Filesystem::mount(file).unwrap();
        assert!(fs.exists("/").unwrap());
        assert_eq!(fs.dir_list("/").unwrap().len(), 0);
        let stats = fs.get_stats();
        // Inode 0 (reserved) and inode 1 (root, just allocated) are
        // both unavailable, so ffree is two short of the total.
        assert_eq!(stats.ffree, 4 * INODES_PER_BLOCK - 2);
    }

    #[test]
    fn format_rejects_misaligned_length() {
        let file = tempfile().unwrap();
        file.set_len(BLOCK_SIZE as u64 + 1).unwrap();
        assert!(format_image(&file, 1).is_err());
    }
}

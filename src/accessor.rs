//! Typed, random-access façade over the block cache.
//!
//! Each accessor method treats a block (or block range) as one record
//! kind: superblock, inode, directory block, file-index block, or
//! free-index block. Directory, free-index, file-index and file-data
//! blocks all share the same 512-byte space; this module is the single
//! place that picks which codec applies, rather than modeling the
//! kinds as an inheritance hierarchy (see DESIGN.md).
//!
//! Every getter returns a **detached** value and every setter writes
//! it back explicitly — mutating a value returned by a getter has no
//! effect until passed back through the matching setter. This is
//! spelled out because some reference implementations in this domain
//! instead return a live proxy that writes back on mutation, which is
//! an easy source of silent bugs; this crate never does that.

use crate::cache::BlockCache;
use crate::codec::{DirBlockRecord, FileIndexBlockRecord, FreeIndexBlockRecord, InodeRecord, SuperblockRecord};
use crate::error::Result;
use crate::layout::{BLOCK_SIZE, BOOT_BLOCKS_WITH_MBR, INODES_PER_BLOCK, SUPERBLOCK_BLOCKS, SUPERBLOCK_SIZE};

/// Inspects block 0 of `cache` and returns the superblock's starting
/// block offset `S`: `BOOT_BLOCKS_WITH_MBR` if the last two bytes of
/// block 0 are the `0x55 0xAA` MBR signature, `0` otherwise.
pub fn detect_superblock_offset(cache: &mut BlockCache) -> Result<u64> {
    let block0 = cache.read(0)?;
    if block0[BLOCK_SIZE - 2] == 0x55 && block0[BLOCK_SIZE - 1] == 0xAA {
        Ok(BOOT_BLOCKS_WITH_MBR)
    } else {
        Ok(0)
    }
}

/// Typed accessor over a [`BlockCache`].
pub struct ObjectAccessor {
    cache: BlockCache,
    /// Block offset `S` of the superblock from the start of the image.
    superblock_offset: u64,
}

impl ObjectAccessor {
    /// Wraps `cache`, detecting the superblock offset from block 0.
    pub fn open(mut cache: BlockCache) -> Result<Self> {
        let superblock_offset = detect_superblock_offset(&mut cache)?;
        Ok(Self {
            cache,
            superblock_offset,
        })
    }

    /// The block offset `S` of the superblock.
    pub fn superblock_offset(&self) -> u64 {
        self.superblock_offset
    }

    /// The first block of the inode region.
    pub fn inode_region_start(&self) -> u64 {
        self.superblock_offset + SUPERBLOCK_BLOCKS
    }

    /// Reads the superblock.
    pub fn get_superblock(&mut self) -> Result<SuperblockRecord> {
        let mut bytes = [0u8; SUPERBLOCK_SIZE];
        for i in 0..SUPERBLOCK_BLOCKS {
            let block = self.cache.read(self.superblock_offset + i)?;
            let off = (i as usize) * BLOCK_SIZE;
            bytes[off..off + BLOCK_SIZE].copy_from_slice(&block);
        }
        Ok(SuperblockRecord::decode(&bytes))
    }

    /// Writes the superblock.
    pub fn set_superblock(&mut self, sb: &SuperblockRecord) -> Result<()> {
        let bytes = sb.encode();
        for i in 0..SUPERBLOCK_BLOCKS {
            let off = (i as usize) * BLOCK_SIZE;
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&bytes[off..off + BLOCK_SIZE]);
            self.cache.write(self.superblock_offset + i, block)?;
        }
        Ok(())
    }

    fn inode_block_and_slot(&self, i: u32) -> (u64, usize) {
        let block = self.inode_region_start() + (i as u64) / INODES_PER_BLOCK;
        let slot = (i as u64 % INODES_PER_BLOCK) as usize;
        (block, slot)
    }

    /// Reads inode number `i` (0-indexed; inode 0 is the reserved "none" inode).
    pub fn get_inode(&mut self, i: u32) -> Result<InodeRecord> {
        let (block, slot) = self.inode_block_and_slot(i);
        let data = self.cache.read(block)?;
        let off = slot * crate::layout::INODE_SIZE;
        Ok(InodeRecord::decode(&data[off..off + crate::layout::INODE_SIZE]))
    }

    /// Writes inode number `i`.
    pub fn set_inode(&mut self, i: u32, inode: &InodeRecord) -> Result<()> {
        let (block, slot) = self.inode_block_and_slot(i);
        let mut data = self.cache.read(block)?;
        let off = slot * crate::layout::INODE_SIZE;
        data[off..off + crate::layout::INODE_SIZE].copy_from_slice(&inode.encode());
        self.cache.write(block, data)
    }

    /// Reads the raw bytes of a file-data block.
    pub fn get_file_block(&mut self, b: u64) -> Result<[u8; BLOCK_SIZE]> {
        self.cache.read(b)
    }

    /// Writes the raw bytes of a file-data block.
    pub fn set_file_block(&mut self, b: u64, data: [u8; BLOCK_SIZE]) -> Result<()> {
        self.cache.write(b, data)
    }

    /// Overwrites a byte range within a file-data block.
    pub fn write_file_block_range(&mut self, b: u64, offset: usize, patch: &[u8]) -> Result<()> {
        self.cache.write_partial(b, offset, patch)
    }

    /// Reads block `b` as a directory block.
    pub fn get_dir_block(&mut self, b: u64) -> Result<DirBlockRecord> {
        let data = self.cache.read(b)?;
        Ok(DirBlockRecord::decode(&data))
    }

    /// Writes block `b` as a directory block.
    pub fn set_dir_block(&mut self, b: u64, block: &DirBlockRecord) -> Result<()> {
        self.cache.write(b, block.encode())
    }

    /// Reads block `b` as a file-index block.
    pub fn get_file_index_block(&mut self, b: u64) -> Result<FileIndexBlockRecord> {
        let data = self.cache.read(b)?;
        Ok(FileIndexBlockRecord::decode(&data))
    }

    /// Writes block `b` as a file-index block.
    pub fn set_file_index_block(&mut self, b: u64, block: &FileIndexBlockRecord) -> Result<()> {
        self.cache.write(b, block.encode())
    }

    /// Reads block `b` as a free-index block.
    pub fn get_free_index_block(&mut self, b: u64) -> Result<FreeIndexBlockRecord> {
        let data = self.cache.read(b)?;
        Ok(FreeIndexBlockRecord::decode(&data))
    }

    /// Writes block `b` as a free-index block.
    pub fn set_free_index_block(&mut self, b: u64, block: &FreeIndexBlockRecord) -> Result<()> {
        self.cache.write(b, block.encode())
    }

    /// Zeroes block `b`.
    pub fn clear_data_block(&mut self, b: u64) -> Result<()> {
        self.cache.write(b, [0u8; BLOCK_SIZE])
    }

    /// Flushes the underlying cache.
    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush()
    }

    /// Flushes then consumes the accessor, releasing the device.
    pub fn close(self) -> Result<()> {
        self.cache.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlockCache;
    use crate::device::BlockDevice;
    use std::fs::File;
    use tempfile::tempfile;

    fn make_accessor(blocks: u64) -> ObjectAccessor {
        let file: File = tempfile().unwrap();
        file.set_len(blocks * BLOCK_SIZE as u64).unwrap();
        let cache = BlockCache::new(BlockDevice::open(file).unwrap(), 16);
        ObjectAccessor::open(cache).unwrap()
    }

    #[test]
    fn no_mbr_gives_zero_offset() {
        let accessor = make_accessor(16);
        assert_eq!(accessor.superblock_offset(), 0);
    }

    #[test]
    fn detects_mbr_signature() {
        let file: File = tempfile().unwrap();
        file.set_len(256 * BLOCK_SIZE as u64).unwrap();
        let mut cache = BlockCache::new(BlockDevice::open(file).unwrap(), 16);
        let mut block0 = [0u8; BLOCK_SIZE];
        block0[BLOCK_SIZE - 2] = 0x55;
        block0[BLOCK_SIZE - 1] = 0xAA;
        cache.write(0, block0).unwrap();
        cache.flush().unwrap();
        let accessor = ObjectAccessor::open(cache).unwrap();
        assert_eq!(accessor.superblock_offset(), BOOT_BLOCKS_WITH_MBR);
    }

    #[test]
    fn superblock_and_inode_round_trip() {
        let mut accessor = make_accessor(16);
        let mut sb = SuperblockRecord::default();
        sb.s_isize = 2;
        sb.s_fsize = 16;
        accessor.set_superblock(&sb).unwrap();
        let read_back = accessor.get_superblock().unwrap();
        assert_eq!({ read_back.s_fsize }, 16);

        let mut inode = InodeRecord::default();
        inode.d_size = 128;
        accessor.set_inode(3, &inode).unwrap();
        let read_back = accessor.get_inode(3).unwrap();
        assert_eq!({ read_back.d_size }, 128);
        // A different slot in the same block must be untouched.
        let other = accessor.get_inode(2).unwrap();
        assert_eq!({ other.d_size }, 0);
    }
}

//! In-memory superblock state and the free-block / free-inode
//! allocators rooted in it.
//!
//! The free-block stack discipline (push/pop, spill-into-freed-block
//! when full, chain-load-from-freed-block when empty) is ported from
//! `original_source/free_index_block.py`'s `try_push_flush`/
//! `try_pop_flush`/`subblock` chaining; the free-inode cache refill
//! scan is new (the Python reference keeps the equivalent state as
//! plain superblock fields touched the same way, see
//! `original_source/superblock.py`).

use sha2::{Digest, Sha256};

use crate::accessor::ObjectAccessor;
use crate::codec::{FreeIndexBlockRecord, SuperblockRecord};
use crate::error::{Error, Result};
use crate::layout::{IALLOC, INODES_PER_BLOCK, MAX_FREE_CACHE, SB_MAGIC};

/// In-memory superblock: mutable allocator state plus the geometry
/// fields needed to address the inode table.
pub struct Superblock {
    /// Inode-region block count.
    pub isize_blocks: u64,
    /// Total blocks in the filesystem.
    pub fsize_blocks: u64,
    /// Count of valid entries in `free`.
    pub nfree: usize,
    /// In-core free-block stack; `free[0]` chains to another free-index
    /// block when it holds a block number at all (it always does,
    /// except at end of filesystem life where it is `0`).
    pub free: [u32; MAX_FREE_CACHE],
    /// Count of valid entries in `inode_cache`.
    pub ninode: usize,
    /// In-core free-inode cache.
    pub inode_cache: [u32; MAX_FREE_CACHE],
    /// Last superblock modification time.
    pub time: u32,
    /// Trusted/recomputed count of free blocks.
    pub bfree: u64,
    /// Total number of inodes in the filesystem.
    pub files: u64,
    /// Trusted/recomputed count of free inodes.
    pub ffree: u64,
}

impl Superblock {
    /// Builds the in-memory state from a decoded on-disk record,
    /// recomputing `bfree`/`ffree`/`files` from a live walk unless the
    /// trailer hash matches (spec.md §4.3/§6: "Superblock trailer
    /// hash ... permits skipping recomputation").
    pub fn load(record: &SuperblockRecord, accessor: &mut ObjectAccessor) -> Result<Self> {
        let free = record.free_array();
        let inode_cache = record.inode_array();

        let mut sb = Self {
            isize_blocks: record.s_isize as u64,
            fsize_blocks: record.s_fsize as u64,
            nfree: record.s_nfree as usize,
            free,
            ninode: record.s_ninode as usize,
            inode_cache,
            time: record.s_time,
            bfree: record.bfree as u64,
            files: record.files as u64,
            ffree: record.ffree as u64,
        };

        if !Self::hash_matches(record) {
            sb.recompute_counters(accessor)?;
        }
        Ok(sb)
    }

    /// Total number of inode slots in the filesystem.
    pub fn inode_count(&self) -> u64 {
        self.isize_blocks * INODES_PER_BLOCK
    }

    /// Serializes the in-memory state back into an on-disk record,
    /// stamping a fresh trailer hash.
    pub fn to_record(&self) -> SuperblockRecord {
        let mut record = SuperblockRecord {
            s_isize: self.isize_blocks as u32,
            s_fsize: self.fsize_blocks as u32,
            s_nfree: self.nfree as u32,
            s_free: self.free,
            s_flock: 0,
            s_ninode: self.ninode as u32,
            s_inode: self.inode_cache,
            s_ilock: 0,
            s_fmod: 0,
            s_ronly: 0,
            s_time: self.time,
            bfree: self.bfree as u32,
            files: self.files as u32,
            ffree: self.ffree as u32,
            ..SuperblockRecord::default()
        };
        record.hash = Self::compute_hash(&record);
        record
    }

    fn compute_hash(record: &SuperblockRecord) -> [u8; 8] {
        let digest = Sha256::digest(record.hashed_prefix());
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        for (b, m) in out.iter_mut().zip(SB_MAGIC.iter()) {
            *b ^= m;
        }
        out
    }

    fn hash_matches(record: &SuperblockRecord) -> bool {
        Self::compute_hash(record) == record.hash
    }

    /// Recomputes `bfree`, `files` and `ffree` by walking the free
    /// chain and scanning the inode region, used when the trailer hash
    /// does not match (untrusted or never-written counters).
    fn recompute_counters(&mut self, accessor: &mut ObjectAccessor) -> Result<()> {
        self.files = self.inode_count();
        self.bfree = self.walk_free_chain(accessor)?;
        self.ffree = self.count_free_inodes(accessor)?;
        Ok(())
    }

    /// Sums the free-block stack plus every chained free-index block
    /// reachable from it, without mutating any state.
    fn walk_free_chain(&self, accessor: &mut ObjectAccessor) -> Result<u64> {
        let mut total = self.nfree as u64;
        let mut next = if self.nfree > 0 { self.free[0] } else { 0 };
        while next != 0 {
            let block = accessor.get_free_index_block(next as u64)?;
            total += block.s_nfree as u64;
            let chained = block.free_array();
            next = if block.s_nfree > 0 { chained[0] } else { 0 };
        }
        Ok(total)
    }

    fn count_free_inodes(&self, accessor: &mut ObjectAccessor) -> Result<u64> {
        let mut free = 0u64;
        for i in 1..self.inode_count() as u32 {
            let inode = accessor.get_inode(i)?;
            if inode.d_mode & IALLOC == 0 {
                free += 1;
            }
        }
        Ok(free)
    }

    /// Allocates one data block from the free-block stack, refilling
    /// from the chained free-index block when the stack empties.
    /// Zeroes the block first when `zero` is set.
    pub fn allocate_block(&mut self, accessor: &mut ObjectAccessor, zero: bool) -> Result<u64> {
        if self.nfree == 0 {
            return Err(Error::NoSpace);
        }
        self.nfree -= 1;
        let index = self.free[self.nfree];
        if self.nfree == 0 {
            if index == 0 {
                return Err(Error::NoSpace);
            }
            let chain = accessor.get_free_index_block(index as u64)?;
            self.nfree = chain.s_nfree as usize;
            self.free = chain.s_free;
        }
        if zero {
            accessor.clear_data_block(index as u64)?;
        }
        self.bfree -= 1;
        Ok(index as u64)
    }

    /// Releases block `b` back to the free-block stack, spilling the
    /// current stack into `b` (as a new chain head) when full.
    pub fn release_block(&mut self, accessor: &mut ObjectAccessor, b: u64) -> Result<()> {
        if self.nfree < MAX_FREE_CACHE {
            self.free[self.nfree] = b as u32;
            self.nfree += 1;
        } else {
            let chain = FreeIndexBlockRecord {
                s_nfree: self.nfree as u32,
                s_free: self.free,
                ..FreeIndexBlockRecord::default()
            };
            accessor.set_free_index_block(b, &chain)?;
            self.free = [0; MAX_FREE_CACHE];
            self.free[0] = b as u32;
            self.nfree = 1;
        }
        self.bfree += 1;
        Ok(())
    }

    fn refill_free_inodes(&mut self, accessor: &mut ObjectAccessor) -> Result<()> {
        self.ninode = 0;
        let total = self.inode_count() as u32;
        let mut i = 1u32;
        while i < total && self.ninode < MAX_FREE_CACHE {
            let inode = accessor.get_inode(i)?;
            if inode.d_mode & IALLOC == 0 {
                self.inode_cache[self.ninode] = i;
                self.ninode += 1;
            }
            i += 1;
        }
        Ok(())
    }

    /// Allocates an inode number from the free-inode cache, refilling
    /// it by scanning the inode region if it is empty. The caller is
    /// responsible for setting `IALLOC` when it writes the inode back.
    pub fn allocate_inode(&mut self, accessor: &mut ObjectAccessor) -> Result<u32> {
        if self.ninode == 0 {
            self.refill_free_inodes(accessor)?;
            if self.ninode == 0 {
                return Err(Error::NoInode);
            }
        }
        self.ninode -= 1;
        let index = self.inode_cache[self.ninode];
        self.ffree -= 1;
        Ok(index)
    }

    /// Releases inode number `i` back to the free-inode cache, if it
    /// has room. The caller is responsible for clearing `IALLOC` on
    /// disk; this only updates in-core allocator state.
    pub fn release_inode(&mut self, i: u32) {
        if self.ninode < MAX_FREE_CACHE {
            self.inode_cache[self.ninode] = i;
            self.ninode += 1;
        }
        self.ffree += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlockCache;
    use crate::device::BlockDevice;
    use crate::layout::BLOCK_SIZE;
    use std::fs::File;
    use tempfile::tempfile;

    fn make_accessor(blocks: u64) -> ObjectAccessor {
        let file: File = tempfile().unwrap();
        file.set_len(blocks * BLOCK_SIZE as u64).unwrap();
        let cache = BlockCache::new(BlockDevice::open(file).unwrap(), 32);
        ObjectAccessor::open(cache).unwrap()
    }

    fn fresh_superblock(isize_blocks: u64, fsize_blocks: u64) -> Superblock {
        Superblock {
            isize_blocks,
            fsize_blocks,
            nfree: 0,
            free: [0; MAX_FREE_CACHE],
            ninode: 0,
            inode_cache: [0; MAX_FREE_CACHE],
            time: 0,
            bfree: 0,
            files: isize_blocks * INODES_PER_BLOCK,
            ffree: 0,
        }
    }

    #[test]
    fn allocate_and_release_round_trip() {
        let mut accessor = make_accessor(32);
        let mut sb = fresh_superblock(2, 32);
        sb.free[0] = 20;
        sb.nfree = 1;
        sb.bfree = 1;

        let b = sb.allocate_block(&mut accessor, true).unwrap();
        assert_eq!(b, 20);
        assert_eq!(sb.nfree, 0);
        assert_eq!(sb.bfree, 0);

        sb.release_block(&mut accessor, b).unwrap();
        assert_eq!(sb.nfree, 1);
        assert_eq!(sb.free[0], 20);
        assert_eq!(sb.bfree, 1);
    }

    #[test]
    fn allocate_refills_from_chain() {
        let mut accessor = make_accessor(300);
        // Chain block 99 holds 3 more free blocks.
        let chain = FreeIndexBlockRecord {
            s_nfree: 3,
            s_free: {
                let mut f = [0u32; MAX_FREE_CACHE];
                f[0] = 10;
                f[1] = 11;
                f[2] = 12;
                f
            },
            ..FreeIndexBlockRecord::default()
        };
        accessor.set_free_index_block(99, &chain).unwrap();

        let mut sb = fresh_superblock(2, 300);
        sb.nfree = 1;
        sb.free[0] = 99;
        sb.bfree = 4; // 99 itself, plus the 3 chained

        let first = sb.allocate_block(&mut accessor, false).unwrap();
        assert_eq!(first, 99);
        // The stack refilled from block 99's chained content.
        assert_eq!(sb.nfree, 3);
        assert_eq!(sb.free[0], 10);
        assert_eq!(sb.bfree, 3);
    }

    #[test]
    fn release_spills_full_stack_into_freed_block() {
        let mut accessor = make_accessor(300);
        let mut sb = fresh_superblock(2, 300);
        for i in 0..MAX_FREE_CACHE {
            sb.free[i] = (i + 1) as u32;
        }
        sb.nfree = MAX_FREE_CACHE;
        sb.bfree = MAX_FREE_CACHE as u64;

        sb.release_block(&mut accessor, 200).unwrap();
        assert_eq!(sb.nfree, 1);
        assert_eq!(sb.free[0], 200);
        assert_eq!(sb.bfree, MAX_FREE_CACHE as u64 + 1);

        let chain = accessor.get_free_index_block(200).unwrap();
        assert_eq!({ chain.s_nfree }, MAX_FREE_CACHE as u32);
        assert_eq!({ chain.s_free[0] }, 1);
    }

    #[test]
    fn inode_allocate_release_and_refill() {
        let mut accessor = make_accessor(32);
        // Mark inodes 1..=5 as free (IALLOC clear) in the inode region.
        for i in 1..=5u32 {
            accessor.set_inode(i, &Default::default()).unwrap();
        }
        let mut sb = fresh_superblock(2, 32);
        sb.ninode = 0; // empty cache forces a refill scan

        let first = sb.allocate_inode(&mut accessor).unwrap();
        assert_eq!(first, 1);
        let second = sb.allocate_inode(&mut accessor).unwrap();
        assert_eq!(second, 2);

        sb.release_inode(first);
        assert_eq!(sb.ninode, 1);
        assert_eq!(sb.inode_cache[0], first);
    }

    #[test]
    fn hash_round_trip_is_trusted() {
        let mut accessor = make_accessor(32);
        let mut sb = fresh_superblock(2, 32);
        sb.bfree = 7;
        sb.ffree = 3;
        let record = sb.to_record();
        assert!(Superblock::hash_matches(&record));

        let reloaded = Superblock::load(&record, &mut accessor).unwrap();
        assert_eq!(reloaded.bfree, 7);
        assert_eq!(reloaded.ffree, 3);
    }
}

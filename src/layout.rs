//! On-disk geometry constants for the V6++ filesystem.
//!
//! These mirror the thresholds a V6-style inode's tiered block index
//! imposes; see [`crate::inode`] for the planner that turns a logical
//! block number into a `d_addr` slot using them.

/// Size of a disk block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Size of the superblock in bytes (two blocks).
pub const SUPERBLOCK_SIZE: usize = 1024;
/// Number of blocks the superblock occupies.
pub const SUPERBLOCK_BLOCKS: u64 = 2;

/// Size of a single on-disk inode record in bytes.
pub const INODE_SIZE: usize = 64;
/// Number of inodes packed into one block.
pub const INODES_PER_BLOCK: u64 = (BLOCK_SIZE / INODE_SIZE) as u64;

/// Number of (inode, name) slots in a directory block.
pub const DIR_ENTRIES_PER_BLOCK: usize = 16;
/// Size in bytes of one directory entry (4-byte inode number + 28-byte name).
pub const DIR_ENTRY_SIZE: usize = 32;
/// Maximum length in bytes of a path component's name (NUL-terminated in a 28-byte field).
pub const MAX_NAME_LEN: usize = 27;

/// Number of 4-byte block-number slots in a file-index or free-index block.
pub const INDEX_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Maximum length of the in-core free-block stack / free-inode cache.
pub const MAX_FREE_CACHE: usize = 100;

/// Number of slots in `d_addr`.
pub const ADDR_SLOTS: usize = 10;
/// Number of direct slots (0..6).
pub const DIRECT_SLOTS: usize = 6;
/// Number of single-indirect slots (6..8).
pub const SINGLE_INDIRECT_SLOTS: usize = 2;
/// Number of double-indirect slots (8..10).
pub const DOUBLE_INDIRECT_SLOTS: usize = 2;

/// Logical block count at which single-indirect addressing begins (S1).
pub const DIRECT_THRESHOLD: u64 = DIRECT_SLOTS as u64;
/// Logical block count at which double-indirect addressing begins (S2).
pub const SINGLE_INDIRECT_THRESHOLD: u64 =
    DIRECT_THRESHOLD + (SINGLE_INDIRECT_SLOTS * INDEX_ENTRIES_PER_BLOCK) as u64;
/// Logical block count beyond which a file cannot grow (S3).
pub const DOUBLE_INDIRECT_THRESHOLD: u64 = SINGLE_INDIRECT_THRESHOLD
    + (DOUBLE_INDIRECT_SLOTS * INDEX_ENTRIES_PER_BLOCK * INDEX_ENTRIES_PER_BLOCK) as u64;

/// Inode number of the filesystem root directory.
pub const ROOT_INODE: u32 = 1;
/// Reserved "no inode" sentinel.
pub const NO_INODE: u32 = 0;

/// Boot-block region size when an MBR signature is present, in blocks.
pub const BOOT_BLOCKS_WITH_MBR: u64 = 200;

/// `d_mode` bit: inode is allocated.
pub const IALLOC: u32 = 1 << 15;
/// `d_mode` field shift for the 2-bit IFMT file-type code.
pub const IFMT_SHIFT: u32 = 13;
/// `d_mode` mask for the 2-bit IFMT file-type code (pre-shift).
pub const IFMT_MASK: u32 = 0b11;
/// Default permission bits granted to newly created files (`rwxrwxrwx`).
pub const DEFAULT_PERM_BITS: u32 = 0o777;

/// The 8-byte magic constant XORed into the superblock trailer hash.
pub const SB_MAGIC: [u8; 8] = *b"V6FSHASH";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_match_spec() {
        assert_eq!(DIRECT_THRESHOLD, 6);
        assert_eq!(SINGLE_INDIRECT_THRESHOLD, 262);
        assert_eq!(DOUBLE_INDIRECT_THRESHOLD, 33_030);
    }

    #[test]
    fn inodes_per_block() {
        assert_eq!(INODES_PER_BLOCK, 8);
    }
}

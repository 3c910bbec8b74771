//! Bit-exact on-disk record layouts.
//!
//! Each record type is a `#[repr(C, packed)]` struct whose field order
//! and widths are the on-disk byte layout, the same approach the
//! teacher's ext2 formatter uses for its `Superblock`, `BlockGroupDescriptor`
//! and `INode` structs: move bytes in and out of the struct with a raw
//! pointer cast instead of a field-by-field parser. `encode`/`decode`
//! round-trip on well-formed bytes of the right size (spec testable
//! property: `encode(decode(bytes)) == bytes`).
//!
//! All integers are little-endian. On a little-endian host (the only
//! target this crate is built for) that is simply the host's native
//! representation, so no byte-swapping is needed; see DESIGN.md for the
//! explicit choice.

use std::mem::size_of;
use std::slice;

use crate::layout::*;

/// Reinterprets a reference to a plain-old-data struct as its raw bytes.
///
/// # Safety
/// `T` must have no padding bytes that matter (all of this module's
/// types are `#[repr(C, packed)]`) and must be valid for any bit
/// pattern, which holds for the integer-only records below.
unsafe fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

/// Reinterprets a byte slice of the correct length as a plain-old-data struct.
///
/// # Safety
/// See [`as_bytes`]. `bytes.len()` must equal `size_of::<T>()`.
unsafe fn from_bytes<T: Copy>(bytes: &[u8]) -> T {
    debug_assert_eq!(bytes.len(), size_of::<T>());
    unsafe { (bytes.as_ptr() as *const T).read_unaligned() }
}

/// The on-disk superblock record (1024 bytes).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SuperblockRecord {
    pub s_isize: u32,
    pub s_fsize: u32,
    pub s_nfree: u32,
    pub s_free: [u32; MAX_FREE_CACHE],
    pub s_flock: u32,
    pub s_ninode: u32,
    pub s_inode: [u32; MAX_FREE_CACHE],
    pub s_ilock: u32,
    pub s_fmod: u32,
    pub s_ronly: u32,
    pub s_time: u32,
    _padding: [u8; 160],
    pub bfree: u32,
    pub files: u32,
    pub ffree: u32,
    pub hash: [u8; 8],
    pub magic: [u8; 8],
}

impl Default for SuperblockRecord {
    fn default() -> Self {
        Self {
            s_isize: 0,
            s_fsize: 0,
            s_nfree: 0,
            s_free: [0; MAX_FREE_CACHE],
            s_flock: 0,
            s_ninode: 0,
            s_inode: [0; MAX_FREE_CACHE],
            s_ilock: 0,
            s_fmod: 0,
            s_ronly: 0,
            s_time: 0,
            _padding: [0; 160],
            bfree: 0,
            files: 0,
            ffree: 0,
            hash: [0; 8],
            magic: SB_MAGIC,
        }
    }
}

impl SuperblockRecord {
    /// Encodes this record into its on-disk byte representation.
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut out = [0u8; SUPERBLOCK_SIZE];
        let bytes = unsafe { as_bytes(self) };
        out.copy_from_slice(bytes);
        out
    }

    /// Decodes a record from its on-disk byte representation.
    pub fn decode(bytes: &[u8]) -> Self {
        unsafe { from_bytes(&bytes[..SUPERBLOCK_SIZE]) }
    }

    /// The bytes of the record that are hashed to produce the trailer
    /// hash (everything except the 8-byte hash field itself).
    pub fn hashed_prefix(&self) -> [u8; SUPERBLOCK_SIZE - 16] {
        let full = self.encode();
        let mut out = [0u8; SUPERBLOCK_SIZE - 16];
        out.copy_from_slice(&full[..SUPERBLOCK_SIZE - 16]);
        out
    }

    /// Copies the free-block stack out whole. `s_free` is a multi-byte
    /// array inside a packed struct, so indexing it in place would
    /// require a misaligned reference; callers index this owned copy
    /// instead.
    pub fn free_array(&self) -> [u32; MAX_FREE_CACHE] {
        self.s_free
    }

    /// Copies the free-inode cache out whole; see [`Self::free_array`].
    pub fn inode_array(&self) -> [u32; MAX_FREE_CACHE] {
        self.s_inode
    }
}

/// The on-disk inode record (64 bytes).
#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
pub struct InodeRecord {
    pub d_mode: u32,
    pub d_nlink: u32,
    pub d_uid: u16,
    pub d_gid: u16,
    pub d_size: u32,
    pub d_addr: [u32; ADDR_SLOTS],
    pub d_atime: u32,
    pub d_mtime: u32,
}

impl InodeRecord {
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut out = [0u8; INODE_SIZE];
        out.copy_from_slice(unsafe { as_bytes(self) });
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        unsafe { from_bytes(&bytes[..INODE_SIZE]) }
    }

    /// Copies `d_addr` out whole; see [`SuperblockRecord::free_array`]
    /// for why direct indexing of a packed array field isn't used.
    pub fn addr_array(&self) -> [u32; ADDR_SLOTS] {
        self.d_addr
    }

    /// Writes `d_addr` back whole.
    pub fn set_addr_array(&mut self, addr: [u32; ADDR_SLOTS]) {
        self.d_addr = addr;
    }
}

/// One directory entry (32 bytes): a 4-byte inode number and a
/// 28-byte NUL-padded UTF-8 name.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct DirEntryRecord {
    pub m_ino: u32,
    pub m_name: [u8; DIR_ENTRY_SIZE - 4],
}

impl Default for DirEntryRecord {
    fn default() -> Self {
        Self {
            m_ino: 0,
            m_name: [0; DIR_ENTRY_SIZE - 4],
        }
    }
}

impl DirEntryRecord {
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut out = [0u8; DIR_ENTRY_SIZE];
        out.copy_from_slice(unsafe { as_bytes(self) });
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        unsafe { from_bytes(&bytes[..DIR_ENTRY_SIZE]) }
    }

    /// Decodes `m_name` up to its first NUL byte as UTF-8.
    ///
    /// Returns `Corruption` if the bytes before the first NUL are not
    /// valid UTF-8.
    pub fn name(&self) -> crate::error::Result<String> {
        let nul = self.m_name.iter().position(|&b| b == 0).unwrap_or(self.m_name.len());
        std::str::from_utf8(&self.m_name[..nul])
            .map(str::to_owned)
            .map_err(|e| crate::error::Error::Corruption(format!("directory entry name: {e}")))
    }

    /// Builds an entry for `ino`/`name`. `name` must be at most
    /// `MAX_NAME_LEN` bytes; the caller is expected to have validated
    /// this already (see [`crate::error::Error::InvalidName`]).
    pub fn new(ino: u32, name: &str) -> Self {
        let mut m_name = [0u8; DIR_ENTRY_SIZE - 4];
        let bytes = name.as_bytes();
        m_name[..bytes.len()].copy_from_slice(bytes);
        Self { m_ino: ino, m_name }
    }
}

/// A directory block: 16 fixed-width entries.
pub struct DirBlockRecord {
    pub entries: [DirEntryRecord; DIR_ENTRIES_PER_BLOCK],
}

impl Default for DirBlockRecord {
    fn default() -> Self {
        Self {
            entries: [DirEntryRecord::default(); DIR_ENTRIES_PER_BLOCK],
        }
    }
}

impl DirBlockRecord {
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        for (i, entry) in self.entries.iter().enumerate() {
            let off = i * DIR_ENTRY_SIZE;
            out[off..off + DIR_ENTRY_SIZE].copy_from_slice(&entry.encode());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut entries = [DirEntryRecord::default(); DIR_ENTRIES_PER_BLOCK];
        for (i, entry) in entries.iter_mut().enumerate() {
            let off = i * DIR_ENTRY_SIZE;
            *entry = DirEntryRecord::decode(&bytes[off..off + DIR_ENTRY_SIZE]);
        }
        Self { entries }
    }
}

/// A file-index block: 128 direct-or-index block numbers.
pub struct FileIndexBlockRecord {
    pub entries: [u32; INDEX_ENTRIES_PER_BLOCK],
}

impl Default for FileIndexBlockRecord {
    fn default() -> Self {
        Self {
            entries: [0; INDEX_ENTRIES_PER_BLOCK],
        }
    }
}

impl FileIndexBlockRecord {
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        for (i, &entry) in self.entries.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut entries = [0u32; INDEX_ENTRIES_PER_BLOCK];
        for (i, entry) in entries.iter_mut().enumerate() {
            let off = i * 4;
            *entry = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        }
        Self { entries }
    }
}

/// A free-index block: same shape as the superblock's free portion
/// (`s_nfree` + `s_free[100]`), padded out to one block.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FreeIndexBlockRecord {
    pub s_nfree: u32,
    pub s_free: [u32; MAX_FREE_CACHE],
    _padding: [u8; BLOCK_SIZE - 4 - MAX_FREE_CACHE * 4],
}

impl Default for FreeIndexBlockRecord {
    fn default() -> Self {
        Self {
            s_nfree: 0,
            s_free: [0; MAX_FREE_CACHE],
            _padding: [0; BLOCK_SIZE - 4 - MAX_FREE_CACHE * 4],
        }
    }
}

impl FreeIndexBlockRecord {
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(unsafe { as_bytes(self) });
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        unsafe { from_bytes(&bytes[..BLOCK_SIZE]) }
    }

    /// Copies `s_free` out whole; see [`SuperblockRecord::free_array`].
    pub fn free_array(&self) -> [u32; MAX_FREE_CACHE] {
        self.s_free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_spec() {
        assert_eq!(size_of::<SuperblockRecord>(), SUPERBLOCK_SIZE);
        assert_eq!(size_of::<InodeRecord>(), INODE_SIZE);
        assert_eq!(size_of::<DirEntryRecord>(), DIR_ENTRY_SIZE);
        assert_eq!(size_of::<FreeIndexBlockRecord>(), BLOCK_SIZE);
    }

    #[test]
    fn superblock_round_trip() {
        let mut sb = SuperblockRecord::default();
        sb.s_isize = 7;
        sb.s_fsize = 50_000;
        sb.s_nfree = 3;
        let mut free = sb.free_array();
        free[0] = 42;
        sb.s_free = free;
        sb.bfree = 123;
        let bytes = sb.encode();
        let decoded = SuperblockRecord::decode(&bytes);
        assert_eq!(decoded.encode(), bytes);
        assert_eq!({ decoded.s_isize }, 7);
        assert_eq!(decoded.free_array()[0], 42);
    }

    #[test]
    fn inode_round_trip() {
        let mut inode = InodeRecord::default();
        inode.d_mode = IALLOC | (2 << IFMT_SHIFT) | 0o755;
        inode.d_nlink = 1;
        inode.d_size = 4096;
        let mut addr = inode.addr_array();
        addr[0] = 10;
        inode.set_addr_array(addr);
        let bytes = inode.encode();
        let decoded = InodeRecord::decode(&bytes);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn dir_entry_name_round_trip() {
        let entry = DirEntryRecord::new(5, "hello.txt");
        let bytes = entry.encode();
        let decoded = DirEntryRecord::decode(&bytes);
        assert_eq!(decoded.name().unwrap(), "hello.txt");
        assert_eq!({ decoded.m_ino }, 5);
    }

    #[test]
    fn dir_block_round_trip() {
        let mut block = DirBlockRecord::default();
        block.entries[0] = DirEntryRecord::new(2, "a");
        block.entries[3] = DirEntryRecord::new(9, "b");
        let bytes = block.encode();
        let decoded = DirBlockRecord::decode(&bytes);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn file_index_block_round_trip() {
        let mut block = FileIndexBlockRecord::default();
        block.entries[0] = 100;
        block.entries[127] = 200;
        let bytes = block.encode();
        let decoded = FileIndexBlockRecord::decode(&bytes);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn free_index_block_round_trip() {
        let mut block = FreeIndexBlockRecord::default();
        block.s_nfree = 2;
        let mut free = block.free_array();
        free[0] = 7;
        free[1] = 8;
        block.s_free = free;
        let bytes = block.encode();
        let decoded = FreeIndexBlockRecord::decode(&bytes);
        assert_eq!(decoded.encode(), bytes);
    }
}

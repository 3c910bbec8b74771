//! Directory blocks: a fixed 16-slot table of (inode#, name) entries.
//!
//! Ported from `original_source/dir_block.py`'s `find`/`contains`/`add`/
//! `remove`/`list`/`length`/`is_empty`/`is_full` surface. The Python
//! reference keeps a live reference back into the object accessor and
//! writes through on every `__setitem__`; this crate follows the
//! accessor's detached-value contract instead (DESIGN.md): a
//! `DirectoryBlock` is loaded, mutated in memory, and explicitly
//! flushed back through the accessor by the caller.

use crate::accessor::ObjectAccessor;
use crate::codec::{DirBlockRecord, DirEntryRecord};
use crate::error::{Error, Result};
use crate::layout::{DIR_ENTRIES_PER_BLOCK, MAX_NAME_LEN};

/// A single loaded directory block, identified by its physical block number.
pub struct DirectoryBlock {
    block: u64,
    record: DirBlockRecord,
}

impl DirectoryBlock {
    /// Loads the directory block at `block`.
    pub fn from_block(block: u64, accessor: &mut ObjectAccessor) -> Result<Self> {
        let record = accessor.get_dir_block(block)?;
        Ok(Self { block, record })
    }

    /// Builds a fresh, all-empty directory block for `block`, not yet
    /// written back.
    pub fn new(block: u64) -> Self {
        Self {
            block,
            record: DirBlockRecord::default(),
        }
    }

    /// Writes this block's current contents back through the accessor.
    pub fn flush(&self, accessor: &mut ObjectAccessor) -> Result<()> {
        accessor.set_dir_block(self.block, &self.record)
    }

    /// Returns the inode number bound to `name`, or `0` ("not found").
    pub fn find(&self, name: &str) -> u32 {
        for entry in &self.record.entries {
            if entry.m_ino != 0 && entry.name().as_deref() == Ok(name) {
                return entry.m_ino;
            }
        }
        0
    }

    /// Whether `name` is bound in this block.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name) != 0
    }

    /// Binds `name` to `ino` in the first free slot. Returns `false`
    /// if the block is full. `name` must be at most `MAX_NAME_LEN`
    /// bytes (the caller validates via [`Error::InvalidName`] before
    /// reaching here).
    pub fn add(&mut self, ino: u32, name: &str) -> bool {
        debug_assert!(name.len() <= MAX_NAME_LEN);
        for entry in &mut self.record.entries {
            if entry.m_ino == 0 {
                *entry = DirEntryRecord::new(ino, name);
                return true;
            }
        }
        false
    }

    /// Unbinds `name`, zeroing its slot. Returns `false` if not found.
    pub fn remove(&mut self, name: &str) -> bool {
        for entry in &mut self.record.entries {
            if entry.m_ino != 0 && entry.name().as_deref() == Ok(name) {
                *entry = DirEntryRecord::default();
                return true;
            }
        }
        false
    }

    /// Lists the names of all occupied slots.
    pub fn list(&self) -> Result<Vec<String>> {
        self.record
            .entries
            .iter()
            .filter(|e| e.m_ino != 0)
            .map(|e| e.name())
            .collect()
    }

    /// Number of occupied slots.
    pub fn length(&self) -> usize {
        self.record.entries.iter().filter(|e| e.m_ino != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.record.entries.iter().all(|e| e.m_ino == 0)
    }

    pub fn is_full(&self) -> bool {
        self.record.entries.iter().all(|e| e.m_ino != 0)
    }
}

/// Validates a path component's name against the 27-byte slot limit.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName);
    }
    Ok(())
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
        let cache = BlockCache::new(BlockDevice::open(file).unwrap(), 16);
        ObjectAccessor::open(cache).unwrap()
    }

    #[test]
    fn add_find_remove_round_trip() {
        let mut accessor = make_accessor(16);
        let mut dir = DirectoryBlock::new(5);
        assert!(dir.add(7, "hello.txt"));
        assert_eq!(dir.find("hello.txt"), 7);
        assert!(dir.contains("hello.txt"));
        dir.flush(&mut accessor).unwrap();

        let reloaded = DirectoryBlock::from_block(5, &mut accessor).unwrap();
        assert_eq!(reloaded.find("hello.txt"), 7);
        assert_eq!(reloaded.length(), 1);

        let mut dir = reloaded;
        assert!(dir.remove("hello.txt"));
        assert!(!dir.contains("hello.txt"));
        assert_eq!(dir.length(), 0);
    }

    #[test]
    fn fills_up_and_reports_full() {
        let mut dir = DirectoryBlock::new(0);
        for i in 0..DIR_ENTRIES_PER_BLOCK {
            assert!(dir.add((i + 1) as u32, &format!("f{i}")));
        }
        assert!(dir.is_full());
        assert!(!dir.add(99, "overflow"));
    }

    #[test]
    fn empty_block_reports_empty() {
        let dir = DirectoryBlock::new(0);
        assert!(dir.is_empty());
        assert!(!dir.is_full());
        assert_eq!(dir.list().unwrap().len(), 0);
    }

    #[test]
    fn validate_name_rejects_empty_and_oversized() {
        assert!(validate_name("ok").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(28)).is_err());
        assert!(validate_name(&"x".repeat(27)).is_ok());
    }
}

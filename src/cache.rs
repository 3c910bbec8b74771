//! LRU cache of decoded blocks over a [`BlockDevice`], with
//! write-through-on-eviction.
//!
//! New relative to the teacher (its tools write an image once,
//! sequentially, and never re-read it), but the discipline —
//! materialize-then-overwrite for partial writes, flush dirty entries
//! on eviction/close — follows directly from spec.md §4.1's cache
//! contract.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::device::BlockDevice;
use crate::error::Result;
use crate::layout::BLOCK_SIZE;

/// Default number of blocks the cache holds before evicting.
pub const DEFAULT_CAPACITY: usize = 64;

struct Entry {
    data: [u8; BLOCK_SIZE],
    dirty: bool,
}

/// An LRU cache of blocks backed by a [`BlockDevice`].
pub struct BlockCache {
    device: BlockDevice,
    capacity: usize,
    entries: HashMap<u64, Entry>,
    /// Most-recently-used block numbers at the back.
    lru: VecDeque<u64>,
}

impl BlockCache {
    /// Wraps `device` in a cache with the given capacity.
    pub fn new(device: BlockDevice, capacity: usize) -> Self {
        Self {
            device,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            lru: VecDeque::new(),
        }
    }

    fn touch(&mut self, b: u64) {
        if let Some(pos) = self.lru.iter().position(|&x| x == b) {
            self.lru.remove(pos);
        }
        self.lru.push_back(b);
    }

    fn evict_if_needed(&mut self) -> Result<()> {
        while self.entries.len() > self.capacity {
            let Some(victim) = self.lru.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                if entry.dirty {
                    self.device.write_block(victim, &entry.data)?;
                }
            }
        }
        Ok(())
    }

    /// Reads block `b`, populating the cache on miss.
    pub fn read(&mut self, b: u64) -> Result<[u8; BLOCK_SIZE]> {
        if !self.entries.contains_key(&b) {
            let data = self.device.read_block(b)?;
            self.entries.insert(b, Entry { data, dirty: false });
        }
        self.touch(b);
        self.evict_if_needed()?;
        Ok(self.entries[&b].data)
    }

    /// Overwrites block `b` in full, marking it dirty.
    pub fn write(&mut self, b: u64, data: [u8; BLOCK_SIZE]) -> Result<()> {
        self.entries.insert(b, Entry { data, dirty: true });
        self.touch(b);
        self.evict_if_needed()?;
        Ok(())
    }

    /// Overwrites the byte range `[offset, offset + patch.len())` of
    /// block `b`, reading the current full block first if it isn't
    /// already resident.
    pub fn write_partial(&mut self, b: u64, offset: usize, patch: &[u8]) -> Result<()> {
        let mut data = self.read(b)?;
        data[offset..offset + patch.len()].copy_from_slice(patch);
        self.write(b, data)
    }

    /// Writes every dirty entry back to the device, without evicting
    /// them from the cache.
    pub fn flush(&mut self) -> Result<()> {
        for (&b, entry) in self.entries.iter_mut() {
            if entry.dirty {
                self.device.write_block(b, &entry.data)?;
                entry.dirty = false;
            }
        }
        self.device.sync()
    }

    /// Flushes then releases the underlying device.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempfile;

    fn make_cache(blocks: u64, capacity: usize) -> BlockCache {
        let file: File = tempfile().unwrap();
        file.set_len(blocks * BLOCK_SIZE as u64).unwrap();
        BlockCache::new(BlockDevice::open(file).unwrap(), capacity)
    }

    #[test]
    fn read_your_writes_before_flush() {
        let mut cache = make_cache(4, 2);
        let mut data = [0u8; BLOCK_SIZE];
        data[0] = 7;
        cache.write(1, data).unwrap();
        assert_eq!(cache.read(1).unwrap(), data);
    }

    #[test]
    fn eviction_flushes_dirty_blocks() {
        let mut cache = make_cache(8, 2);
        let mut a = [0u8; BLOCK_SIZE];
        a[0] = 1;
        let mut b = [0u8; BLOCK_SIZE];
        b[0] = 2;
        let mut c = [0u8; BLOCK_SIZE];
        c[0] = 3;
        cache.write(0, a).unwrap();
        cache.write(1, b).unwrap();
        // Capacity is 2: writing a third block evicts block 0, flushing it.
        cache.write(2, c).unwrap();
        assert!(!cache.entries.contains_key(&0));
        // Reading it back should come from the device, not a stale cache miss.
        assert_eq!(cache.read(0).unwrap(), a);
    }

    #[test]
    fn partial_write_preserves_rest_of_block() {
        let mut cache = make_cache(2, 4);
        let mut full = [0u8; BLOCK_SIZE];
        full[10] = 0xFF;
        cache.write(0, full).unwrap();
        cache.write_partial(0, 0, &[1, 2, 3]).unwrap();
        let data = cache.read(0).unwrap();
        assert_eq!(&data[0..3], &[1, 2, 3]);
        assert_eq!(data[10], 0xFF);
    }

    #[test]
    fn flush_is_idempotent() {
        let mut cache = make_cache(2, 4);
        cache.write(0, [5u8; BLOCK_SIZE]).unwrap();
        cache.flush().unwrap();
        cache.flush().unwrap();
    }
}

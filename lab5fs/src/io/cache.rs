use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::debug;

use crate::io::BlockStorage;
use crate::layout::{BlockNumber, BLOCK_SIZE};

pub type Block = [u8; BLOCK_SIZE];

const DEFAULT_CAPACITY: usize = 64;

struct Buffer {
    data: Box<Block>,
    /// Set once the buffer is modified, cleared when written back.
    dirty: bool,
}

/// Buffers blocks read from a device. Modifications only mark a buffer dirty;
/// nothing reaches the device until [`BlockCache::sync`] writes dirty buffers
/// back.
///
/// Once `capacity` buffers are held, a clean buffer is dropped to make room
/// for the next block. Dirty buffers are never dropped, so the cache can grow
/// past its capacity until the next sync.
pub struct BlockCache<T: BlockStorage> {
    dev: T,
    buffers: HashMap<BlockNumber, Buffer>,
    capacity: usize,
}

impl<T: BlockStorage> BlockCache<T> {
    pub fn new(dev: T) -> Self {
        Self::with_capacity(dev, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(dev: T, capacity: usize) -> Self {
        Self {
            dev,
            buffers: HashMap::new(),
            capacity,
        }
    }

    /// Number of blocks currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffers.len()
    }

    fn drop_clean_buffer(&mut self) {
        let victim = self
            .buffers
            .iter()
            .find(|(_, buffer)| !buffer.dirty)
            .map(|(&blocknr, _)| blocknr);
        if let Some(blocknr) = victim {
            self.buffers.remove(&blocknr);
            debug!("Dropped clean buffer of block {}.", blocknr);
        }
    }

    pub fn block_count(&self) -> usize {
        self.dev.block_count()
    }

    fn buffer(&mut self, blocknr: BlockNumber) -> std::io::Result<&mut Buffer> {
        if self.buffers.len() >= self.capacity && !self.buffers.contains_key(&blocknr) {
            self.drop_clean_buffer();
        }
        match self.buffers.entry(blocknr) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut data = Box::new([0; BLOCK_SIZE]);
                self.dev.read_block(blocknr, &mut data[..])?;
                debug!("Read block {} from device.", blocknr);
                Ok(entry.insert(Buffer { data, dirty: false }))
            }
        }
    }

    /// Maps `f` over the contents of a block, reading it from the device if
    /// it is not buffered yet.
    pub fn read<V>(
        &mut self,
        blocknr: BlockNumber,
        f: impl FnOnce(&Block) -> V,
    ) -> std::io::Result<V> {
        let buffer = self.buffer(blocknr)?;
        Ok(f(&buffer.data))
    }

    /// Like [`BlockCache::read`] but hands out the block mutably and marks it
    /// dirty.
    pub fn modify<V>(
        &mut self,
        blocknr: BlockNumber,
        f: impl FnOnce(&mut Block) -> V,
    ) -> std::io::Result<V> {
        let buffer = self.buffer(blocknr)?;
        buffer.dirty = true;
        Ok(f(&mut buffer.data))
    }

    /// Reports whether a block has unwritten modifications.
    pub fn is_dirty(&self, blocknr: BlockNumber) -> bool {
        self.buffers
            .get(&blocknr)
            .map(|buffer| buffer.dirty)
            .unwrap_or(false)
    }

    /// Writes every dirty buffer back and flushes the device.
    pub fn sync(&mut self) -> std::io::Result<()> {
        let mut dirty: Vec<BlockNumber> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| buffer.dirty)
            .map(|(&blocknr, _)| blocknr)
            .collect();
        dirty.sort_unstable();

        for blocknr in dirty {
            if let Some(buffer) = self.buffers.get_mut(&blocknr) {
                self.dev.write_block(blocknr, &buffer.data[..])?;
                buffer.dirty = false;
                debug!("Wrote block {} back to device.", blocknr);
            }
        }
        self.dev.sync_disk()
    }

    /// Drops all buffers and returns the device. Unsynced changes are lost.
    pub fn into_inner(self) -> T {
        self.dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileBlockEmulatorBuilder;

    fn cache(blocks: usize) -> BlockCache<crate::io::FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_size(blocks)
            .build()
            .unwrap();
        BlockCache::new(dev)
    }

    #[test]
    fn modifications_stay_buffered_until_sync() {
        let mut cache = cache(4);
        cache.modify(2, |block| block[0] = 0xAB).unwrap();
        assert!(cache.is_dirty(2));
        assert_eq!(cache.read(2, |block| block[0]).unwrap(), 0xAB);

        let mut dev = cache.into_inner();
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(2, &mut buf).unwrap();
        assert_eq!(buf[0], 0x00);
    }

    #[test]
    fn sync_writes_dirty_buffers_back() {
        let mut cache = cache(4);
        cache.modify(3, |block| block[BLOCK_SIZE - 1] = 0x7F).unwrap();
        cache.sync().unwrap();
        assert!(!cache.is_dirty(3));

        let mut dev = cache.into_inner();
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(3, &mut buf).unwrap();
        assert_eq!(buf[BLOCK_SIZE - 1], 0x7F);
    }

    #[test]
    fn clean_buffers_make_room_for_new_blocks() {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_size(8)
            .build()
            .unwrap();
        let mut cache = BlockCache::with_capacity(dev, 2);
        for blocknr in 0..8 {
            cache.read(blocknr, |_| ()).unwrap();
            assert!(cache.buffered() <= 2);
        }
    }

    #[test]
    fn dirty_buffers_stay_until_synced() {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_size(8)
            .build()
            .unwrap();
        let mut cache = BlockCache::with_capacity(dev, 2);
        cache.modify(0, |block| block[0] = 1).unwrap();
        cache.modify(1, |block| block[0] = 2).unwrap();
        cache.read(2, |_| ()).unwrap();
        assert_eq!(cache.buffered(), 3);
        assert_eq!(cache.read(0, |block| block[0]).unwrap(), 1);

        cache.sync().unwrap();
        cache.read(3, |_| ()).unwrap();
        cache.read(4, |_| ()).unwrap();
        assert!(cache.buffered() <= 3);
        assert_eq!(cache.read(1, |block| block[0]).unwrap(), 2);
    }

    #[test]
    fn reading_out_of_range_block_fails() {
        let mut cache = cache(2);
        assert!(cache.read(2, |_| ()).is_err());
    }
}

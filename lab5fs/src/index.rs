//! The data-index block: a table of block pointers owned by one inode.
//!
//! Only slot 0 is ever populated, which caps every file and directory at a
//! single data block.

use log::error;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::alloc::BlockAllocator;
use crate::error::{LogicError, Result};
use crate::io::{BlockCache, BlockStorage};
use crate::layout::{BlockNumber, InodeNumber, INDEX_SLOTS, NO_BLOCK};

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
struct IndexBlock {
    blocks: [U32<LittleEndian>; INDEX_SLOTS],
}

fn first_slot(block: &[u8]) -> BlockNumber {
    IndexBlock::ref_from(block)
        .map(|index| index.blocks[0].get())
        .unwrap_or(NO_BLOCK)
}

/// Zero-fills the slot table of a newly allocated index block and marks it
/// dirty for write-back.
pub fn initialize<T: BlockStorage>(cache: &mut BlockCache<T>, index_block: BlockNumber) -> Result<()> {
    cache.modify(index_block, |block| {
        block.copy_from_slice(IndexBlock::new_zeroed().as_bytes());
    })?;
    Ok(())
}

/// Returns the value of slot 0, [`NO_BLOCK`] if the inode owns no data block yet.
pub fn first_data_block<T: BlockStorage>(
    cache: &mut BlockCache<T>,
    index_block: BlockNumber,
) -> Result<BlockNumber> {
    Ok(cache.read(index_block, |block| first_slot(&block[..]))?)
}

pub fn set_first_data_block<T: BlockStorage>(
    cache: &mut BlockCache<T>,
    index_block: BlockNumber,
    blocknr: BlockNumber,
) -> Result<()> {
    cache.modify(index_block, |block| {
        if let Some(index) = IndexBlock::mut_from(&mut block[..]) {
            index.blocks[0] = U32::new(blocknr);
        }
    })?;
    Ok(())
}

/// An index block pointer is only usable when it names a block the allocator
/// handed out. Anything else was never initialized by an allocation.
pub fn ensure_initialized(
    blocks: &BlockAllocator,
    ino: InodeNumber,
    index_block: BlockNumber,
) -> Result<()> {
    if index_block == NO_BLOCK || !blocks.is_used(index_block) {
        let err = LogicError::UninitializedIndex {
            ino,
            block: index_block,
        };
        error!("{}", err);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileBlockEmulatorBuilder;
    use crate::layout::BLOCK_SIZE;

    fn cache() -> BlockCache<crate::io::FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_size(8)
            .build()
            .unwrap();
        BlockCache::new(dev)
    }

    #[test]
    fn initialize_zeroes_every_slot() {
        let mut cache = cache();
        cache.modify(4, |block| block.copy_from_slice(&[0xFF; BLOCK_SIZE])).unwrap();

        initialize(&mut cache, 4).unwrap();

        assert!(cache.is_dirty(4));
        assert_eq!(first_data_block(&mut cache, 4).unwrap(), NO_BLOCK);
        assert!(cache.read(4, |block| block.iter().all(|&b| b == 0)).unwrap());
    }

    #[test]
    fn first_slot_round_trips_little_endian() {
        let mut cache = cache();
        initialize(&mut cache, 5).unwrap();
        set_first_data_block(&mut cache, 5, 0x0403).unwrap();

        assert_eq!(first_data_block(&mut cache, 5).unwrap(), 0x0403);
        assert_eq!(cache.read(5, |block| [block[0], block[1], block[4]]).unwrap(), [3, 4, 0]);
    }

    #[test]
    fn unallocated_index_block_is_a_logic_error() {
        let mut blocks = BlockAllocator::format(8);
        let index_block = blocks.allocate().unwrap();

        assert!(ensure_initialized(&blocks, 1, index_block).is_ok());
        assert!(ensure_initialized(&blocks, 1, NO_BLOCK).unwrap_err().is_logic());
        assert!(ensure_initialized(&blocks, 1, 7).unwrap_err().is_logic());
    }
}

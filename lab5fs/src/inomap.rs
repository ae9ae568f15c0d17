use log::{debug, error};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Lab5Error, LogicError, Resource, Result};
use crate::layout::{BlockNumber, InodeNumber, BLOCK_SIZE, MAX_INODES, NO_BLOCK, NO_INODE};

/// On-disk table binding every inode number to the block holding its inode
/// record. A zero entry marks the number as free.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct InodeMap {
    slots: [U32<LittleEndian>; MAX_INODES as usize],
}

impl InodeMap {
    pub fn new() -> Self {
        Self::new_zeroed()
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        buf.get(..BLOCK_SIZE).and_then(InodeMap::read_from)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Grants and reclaims inode numbers. Inode number 0 is never handed out.
///
/// Reserving a number records which metadata block the caller allocated for
/// it, so the inode record can later be found from the number alone.
pub struct InodeNumberAllocator {
    map: InodeMap,
    /// Inode numbers available, number 0 included.
    cap: usize,
    free: usize,
    dirty: bool,
}

impl InodeNumberAllocator {
    pub fn new(map: InodeMap, cap: usize) -> Self {
        let cap = cap.min(MAX_INODES as usize);
        let used = map
            .slots
            .iter()
            .take(cap)
            .skip(1)
            .filter(|slot| slot.get() != NO_BLOCK)
            .count();
        Self {
            map,
            cap,
            free: cap.saturating_sub(1) - used,
            dirty: false,
        }
    }

    pub fn format(cap: usize) -> Self {
        let mut alloc = Self::new(InodeMap::new(), cap);
        alloc.dirty = true;
        alloc
    }

    /// Reserves the lowest free inode number and binds it to `metadata_block`.
    pub fn allocate(&mut self, metadata_block: BlockNumber) -> Result<InodeNumber> {
        if metadata_block == NO_BLOCK {
            return Err(Lab5Error::InvalidArgument(
                "inode numbers must be bound to a real block".to_string(),
            ));
        }
        let ino = (1..self.cap)
            .find(|&ino| self.map.slots[ino].get() == NO_BLOCK)
            .ok_or(Lab5Error::Exhausted(Resource::InodeNumber))?;

        self.map.slots[ino] = U32::new(metadata_block);
        self.free -= 1;
        self.dirty = true;
        debug!("Allocated inode {} at block {}.", ino, metadata_block);
        Ok(ino as InodeNumber)
    }

    pub fn release(&mut self, ino: InodeNumber) -> Result<()> {
        if self.metadata_block(ino).is_none() {
            let err = LogicError::DoubleRelease {
                resource: Resource::InodeNumber,
                number: ino,
            };
            error!("{}", err);
            return Err(err.into());
        }
        self.map.slots[ino as usize] = U32::new(NO_BLOCK);
        self.free += 1;
        self.dirty = true;
        debug!("Released inode {}.", ino);
        Ok(())
    }

    /// The metadata block bound to a live inode number.
    pub fn metadata_block(&self, ino: InodeNumber) -> Option<BlockNumber> {
        if ino == NO_INODE || ino as usize >= self.cap {
            return None;
        }
        match self.map.slots[ino as usize].get() {
            NO_BLOCK => None,
            blocknr => Some(blocknr),
        }
    }

    pub fn free_inodes(&self) -> usize {
        self.free
    }

    pub fn total_inodes(&self) -> usize {
        self.cap
    }

    pub fn map(&self) -> &InodeMap {
        &self.map
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_start_at_one_and_bind_their_block() {
        let mut alloc = InodeNumberAllocator::format(8);
        assert_eq!(alloc.free_inodes(), 7);

        let ino = alloc.allocate(42).unwrap();
        assert_eq!(ino, 1);
        assert_eq!(alloc.metadata_block(ino), Some(42));
        assert_eq!(alloc.metadata_block(NO_INODE), None);
        assert_eq!(alloc.free_inodes(), 6);
    }

    #[test]
    fn released_numbers_are_reused() {
        let mut alloc = InodeNumberAllocator::format(8);
        let a = alloc.allocate(10).unwrap();
        let b = alloc.allocate(11).unwrap();
        alloc.release(a).unwrap();

        assert_eq!(alloc.metadata_block(a), None);
        assert_eq!(alloc.allocate(12).unwrap(), a);
        assert_eq!(alloc.metadata_block(b), Some(11));
    }

    #[test]
    fn exhausted_table_reports_exhaustion() {
        let mut alloc = InodeNumberAllocator::format(3);
        alloc.allocate(10).unwrap();
        alloc.allocate(11).unwrap();
        match alloc.allocate(12) {
            Err(Lab5Error::Exhausted(Resource::InodeNumber)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn double_release_is_a_logic_error() {
        let mut alloc = InodeNumberAllocator::format(8);
        let ino = alloc.allocate(10).unwrap();
        alloc.release(ino).unwrap();

        assert!(alloc.release(ino).unwrap_err().is_logic());
        assert!(alloc.release(NO_INODE).unwrap_err().is_logic());
        assert!(alloc.release(100).unwrap_err().is_logic());
        assert_eq!(alloc.free_inodes(), 7);
    }

    #[test]
    fn binding_to_the_null_block_is_rejected() {
        let mut alloc = InodeNumberAllocator::format(8);
        assert!(alloc.allocate(NO_BLOCK).is_err());
        assert_eq!(alloc.free_inodes(), 7);
    }

    #[test]
    fn map_is_little_endian_and_reloads() {
        let mut alloc = InodeNumberAllocator::format(8);
        alloc.allocate(0x0102).unwrap();

        let bytes = alloc.map().serialize();
        assert_eq!(&bytes[4..8], &[0x02, 0x01, 0, 0]);

        let reloaded = InodeNumberAllocator::new(InodeMap::parse(bytes).unwrap(), 8);
        assert_eq!(reloaded.metadata_block(1), Some(0x0102));
        assert_eq!(reloaded.free_inodes(), 6);
    }
}

use log::{debug, error};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Lab5Error, LogicError, Resource, Result};
use crate::layout::{BlockNumber, BLOCK_SIZE, FIRST_FREE_BLOCK, MAX_BLOCKS, NO_BLOCK};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, PartialEq)]
pub struct Bitmap {
    /// Stores one bit per logical block, least significant bit first within each
    /// byte. A 1K bitmap tracks up to 1024 * 8 = 8192 blocks.
    bitmap: [u8; BLOCK_SIZE],
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bitmap: [0; BLOCK_SIZE],
        }
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        buf.get(..BLOCK_SIZE).and_then(Bitmap::read_from)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn get(&self, blocknr: usize) -> State {
        assert!(blocknr < MAX_BLOCKS as usize);
        let mask = 1_u8 << (blocknr % 8);
        if self.bitmap[blocknr / 8] & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn set_reserved(&mut self, blocknr: usize) {
        assert!(blocknr < MAX_BLOCKS as usize);
        self.bitmap[blocknr / 8] |= 1_u8 << (blocknr % 8);
    }

    pub fn set_free(&mut self, blocknr: usize) {
        assert!(blocknr < MAX_BLOCKS as usize);
        self.bitmap[blocknr / 8] &= !(1_u8 << (blocknr % 8));
    }

    /// Counts used bits among the first `cap` blocks.
    pub fn count_used(&self, cap: usize) -> usize {
        (0..cap).filter(|&i| self.get(i) == State::Used).count()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Grants and reclaims block numbers on the device.
///
/// Implements a naive block allocation policy for new data block requirements. This policy will
/// retrieve the next available sequential block starting where the previous search left off,
/// wrapping around once it reaches the end of the device.
///
/// ## Other Pre-Allocation Policies
///
/// 1. Allocation that attempts to find enough contiguous available blocks so data can be allocated
///    close together (speed ups through sequential reads).
/// 2. Allocation that attempts to spread randomly over blocks to prevent wear of physical devices
///    in the front section (that may be rewritten many times before allocating to the back).
///
/// Changes are visible to the next call immediately and only marked dirty for
/// persistence; the owner writes [`BlockAllocator::bitmap`] back during sync.
/// The allocator does no locking of its own.
pub struct BlockAllocator {
    /// Keeps track of the next starting place for looking for available blocks.
    marker: usize,
    /// A simple bitmap tracking which blocks are allocated and which are free.
    bitmap: Bitmap,
    /// The number of blocks on the device. Bits at or past this are never handed out.
    cap: usize,
    free: usize,
    dirty: bool,
}

impl BlockAllocator {
    /// Builds an allocator over a freshly formatted device, with the fixed
    /// metadata blocks already marked used.
    pub fn format(cap: usize) -> Self {
        let mut bitmap = Bitmap::new();
        for blocknr in 0..FIRST_FREE_BLOCK as usize {
            bitmap.set_reserved(blocknr);
        }
        let mut alloc = Self::new(bitmap, cap);
        alloc.dirty = true;
        alloc
    }

    /// Builds an allocator from a bitmap read off the device.
    pub fn new(bitmap: Bitmap, cap: usize) -> Self {
        let cap = cap.min(MAX_BLOCKS as usize);
        let free = cap - bitmap.count_used(cap);
        Self {
            marker: FIRST_FREE_BLOCK as usize,
            bitmap,
            cap,
            free,
            dirty: false,
        }
    }

    /// Reserves a free block. Never returns block 0 or a block that is still in use.
    pub fn allocate(&mut self) -> Result<BlockNumber> {
        let start = self.marker.max(FIRST_FREE_BLOCK as usize);
        let candidates = (start..self.cap).chain(FIRST_FREE_BLOCK as usize..start);
        for blocknr in candidates {
            if let State::Free = self.bitmap.get(blocknr) {
                self.bitmap.set_reserved(blocknr);
                self.marker = blocknr + 1;
                self.free -= 1;
                self.dirty = true;
                debug!("Allocated block {}.", blocknr);
                return Ok(blocknr as BlockNumber);
            }
        }
        Err(Lab5Error::Exhausted(Resource::Block))
    }

    /// Returns a block to the free pool. Releasing a block that is not in use
    /// means something else in the system holds a stale block number.
    pub fn release(&mut self, blocknr: BlockNumber) -> Result<()> {
        let idx = blocknr as usize;
        if blocknr == NO_BLOCK
            || blocknr < FIRST_FREE_BLOCK
            || idx >= self.cap
            || self.bitmap.get(idx) == State::Free
        {
            let err = LogicError::DoubleRelease {
                resource: Resource::Block,
                number: blocknr,
            };
            error!("{}", err);
            return Err(err.into());
        }
        self.bitmap.set_free(idx);
        self.free += 1;
        self.dirty = true;
        debug!("Released block {}.", blocknr);
        Ok(())
    }

    pub fn is_used(&self, blocknr: BlockNumber) -> bool {
        (blocknr as usize) < self.cap && self.bitmap.get(blocknr as usize) == State::Used
    }

    pub fn free_blocks(&self) -> usize {
        self.free
    }

    pub fn total_blocks(&self) -> usize {
        self.cap
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

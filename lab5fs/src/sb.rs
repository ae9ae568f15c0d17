use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Lab5Error, Result};
use crate::layout::{
    BlockNumber, InodeNumber, BLOCK_BMP, BLOCK_SIZE, FIRST_FREE_BLOCK, INODE_MAP, LAB5FS_MAGIC,
    MAX_BLOCKS, MAX_INODES,
};

/// The first block of the file system storing information critical for mounting
/// the file system and verifying the underlying disk is formatted correctly.
///
/// The free counters are informational; the bitmap and inode map remain the
/// source of truth and are recounted on mount.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq)]
struct DiskSuperBlock {
    magic: U32<LittleEndian>,
    block_size: U32<LittleEndian>,
    blocks_count: U32<LittleEndian>,
    inodes_count: U32<LittleEndian>,
    free_blocks_count: U32<LittleEndian>,
    free_inodes_count: U32<LittleEndian>,
    bitmap_block: U32<LittleEndian>,
    inode_map_block: U32<LittleEndian>,
    root_ino: U32<LittleEndian>,
}

const DISK_SUPER_BLOCK_SIZE: usize = std::mem::size_of::<DiskSuperBlock>();

#[derive(Debug, Clone, PartialEq)]
pub struct SuperBlock {
    /// Total blocks on the device, reserved ones included.
    pub blocks_count: u32,
    /// Inode numbers available, number 0 included.
    pub inodes_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub bitmap_block: BlockNumber,
    pub inode_map_block: BlockNumber,
    pub root_ino: InodeNumber,
}

impl SuperBlock {
    pub fn new(blocks_count: u32, inodes_count: u32, root_ino: InodeNumber) -> Self {
        Self {
            blocks_count,
            inodes_count,
            free_blocks_count: blocks_count.saturating_sub(FIRST_FREE_BLOCK),
            // Inode number 0 is never handed out.
            free_inodes_count: inodes_count.saturating_sub(1),
            bitmap_block: BLOCK_BMP,
            inode_map_block: INODE_MAP,
            root_ino,
        }
    }

    /// Decodes and validates a super block read from block 0.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let raw = buf
            .get(..DISK_SUPER_BLOCK_SIZE)
            .and_then(DiskSuperBlock::read_from)
            .ok_or_else(|| Lab5Error::Corrupted("super block buffer too short".to_string()))?;

        if raw.magic.get() != LAB5FS_MAGIC {
            return Err(Lab5Error::Corrupted(format!(
                "bad super block magic {:#010x}",
                raw.magic.get()
            )));
        }
        if raw.block_size.get() as usize != BLOCK_SIZE {
            return Err(Lab5Error::Corrupted(format!(
                "unsupported block size {}",
                raw.block_size.get()
            )));
        }

        let sb = Self {
            blocks_count: raw.blocks_count.get(),
            inodes_count: raw.inodes_count.get(),
            free_blocks_count: raw.free_blocks_count.get(),
            free_inodes_count: raw.free_inodes_count.get(),
            bitmap_block: raw.bitmap_block.get(),
            inode_map_block: raw.inode_map_block.get(),
            root_ino: raw.root_ino.get(),
        };
        sb.validate()?;
        Ok(sb)
    }

    fn validate(&self) -> Result<()> {
        if self.blocks_count <= FIRST_FREE_BLOCK || self.blocks_count > MAX_BLOCKS {
            return Err(Lab5Error::Corrupted(format!(
                "block count {} out of range",
                self.blocks_count
            )));
        }
        if self.inodes_count < 2 || self.inodes_count > MAX_INODES {
            return Err(Lab5Error::Corrupted(format!(
                "inode count {} out of range",
                self.inodes_count
            )));
        }
        if self.bitmap_block != BLOCK_BMP || self.inode_map_block != INODE_MAP {
            return Err(Lab5Error::Corrupted(
                "allocation tables are not at their fixed locations".to_string(),
            ));
        }
        if self.root_ino == 0 || self.root_ino >= self.inodes_count {
            return Err(Lab5Error::Corrupted(format!(
                "root inode {} out of range",
                self.root_ino
            )));
        }
        Ok(())
    }

    /// Encodes the super block into the head of a block buffer. The rest of the
    /// buffer is left untouched.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        let raw = DiskSuperBlock {
            magic: U32::new(LAB5FS_MAGIC),
            block_size: U32::new(BLOCK_SIZE as u32),
            blocks_count: U32::new(self.blocks_count),
            inodes_count: U32::new(self.inodes_count),
            free_blocks_count: U32::new(self.free_blocks_count),
            free_inodes_count: U32::new(self.free_inodes_count),
            bitmap_block: U32::new(self.bitmap_block),
            inode_map_block: U32::new(self.inode_map_block),
            root_ino: U32::new(self.root_ino),
        };
        buf[..DISK_SUPER_BLOCK_SIZE].copy_from_slice(raw.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_encode_and_decode_superblocks() {
        let mut sb = SuperBlock::new(64, 32, 1);
        sb.free_blocks_count = 40;
        let mut encoded = vec![0; BLOCK_SIZE];
        sb.serialize_into(&mut encoded);

        let parsed = SuperBlock::parse(&encoded).unwrap();

        assert_eq!(parsed, sb);
    }

    #[test]
    fn fields_are_little_endian() {
        let sb = SuperBlock::new(64, 32, 1);
        let mut encoded = vec![0; BLOCK_SIZE];
        sb.serialize_into(&mut encoded);

        assert_eq!(&encoded[0..4], b"LFS5");
        assert_eq!(&encoded[8..12], &[64, 0, 0, 0]);
    }

    #[test]
    fn parsing_buffer_with_invalid_magic_fails() {
        let zero_buffer_with_right_size = vec![0; BLOCK_SIZE];
        match SuperBlock::parse(&zero_buffer_with_right_size) {
            Err(Lab5Error::Corrupted(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn parsing_short_buffer_fails() {
        assert!(SuperBlock::parse(&[0; 8]).is_err());
    }

    #[test]
    fn parsing_out_of_range_geometry_fails() {
        let sb = SuperBlock::new(MAX_BLOCKS + 1, 32, 1);
        let mut encoded = vec![0; BLOCK_SIZE];
        sb.serialize_into(&mut encoded);
        assert!(SuperBlock::parse(&encoded).is_err());
    }
}

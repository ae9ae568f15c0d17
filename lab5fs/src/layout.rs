//! Fixed geometry of the on-disk format.
//!
//! # Layout
//! ===========================================================================
//! | SuperBlock | Bitmap (all blocks) | Inode map | Metadata/Index/Data ...  |
//! ===========================================================================
//!
//! Every file system object owns one metadata block (holding its inode record
//! at offset 0) and one index block (a table of data block pointers). Only the
//! first slot of the index block is ever populated, so a file or directory
//! owns at most one data block.

/// Identifies a block on the device. Block 0 holds the super block and doubles
/// as the "no block" sentinel everywhere a block pointer is stored.
pub type BlockNumber = u32;

/// Identifies a file system object. Inode number 0 means "not found".
pub type InodeNumber = u32;

pub const BLOCK_SIZE: usize = 1024;
pub const BLOCK_BITS: u32 = 10;

/// "LFS5" when read as little endian bytes.
pub const LAB5FS_MAGIC: u32 = 0x3553_464C;

/// Known locations.
pub const SUPERBLOCK_INDEX: BlockNumber = 0;
pub const BLOCK_BMP: BlockNumber = 1;
pub const INODE_MAP: BlockNumber = 2;
/// First block handed out by the block allocator. Everything below it is
/// permanently reserved.
pub const FIRST_FREE_BLOCK: BlockNumber = 3;

pub const NO_BLOCK: BlockNumber = 0;
pub const NO_INODE: InodeNumber = 0;
pub const ROOT_INO: InodeNumber = 1;

/// One bitmap block tracks this many blocks.
pub const MAX_BLOCKS: u32 = (BLOCK_SIZE * 8) as u32;
/// The inode map stores one 4 byte metadata block pointer per inode number.
pub const MAX_INODES: u32 = (BLOCK_SIZE / 4) as u32;
/// Pointer slots in a data-index block.
pub const INDEX_SLOTS: usize = BLOCK_SIZE / 4;

/// Longest name a directory record can hold.
pub const MAX_NAME_LEN: usize = 251;

/// File type bits of the mode field.
pub const S_IFMT: u16 = 0o170_000;
pub const S_IFDIR: u16 = 0o040_000;
pub const S_IFREG: u16 = 0o100_000;

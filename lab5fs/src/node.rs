use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::Result;
use crate::io::{BlockCache, BlockStorage};
use crate::layout::BlockNumber;

/// Byte offset of the inode record inside its metadata block.
pub const INODE_OFFSET: usize = 0;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone)]
/// The inode record exactly as stored on disk. All integers are little endian
/// and the struct has no padding.
struct DiskInode {
    /// The file mode, type bits included (e.g. drwxr-xr-x).
    mode: U16<LittleEndian>,
    /// The number of directory entries referring to this file.
    link_count: U16<LittleEndian>,
    /// The total size of the file in bytes.
    size: U32<LittleEndian>,
    /// Data blocks owned by the file.
    num_blocks: U32<LittleEndian>,
    /// The id of the owning user.
    uid: U32<LittleEndian>,
    /// The id of the owning group.
    gid: U32<LittleEndian>,
    /// Seconds since epoch.
    atime: U32<LittleEndian>,
    mtime: U32<LittleEndian>,
    ctime: U32<LittleEndian>,
    /// Block holding this inode's table of data block pointers.
    index_block: U32<LittleEndian>,
}

pub const DISK_INODE_SIZE: usize = std::mem::size_of::<DiskInode>();

/// Decoded inode fields in native representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InodeFields {
    pub mode: u16,
    pub link_count: u16,
    pub size: u32,
    pub num_blocks: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub index_block: BlockNumber,
}

impl InodeFields {
    fn from_raw(raw: DiskInode) -> Self {
        Self {
            mode: raw.mode.get(),
            link_count: raw.link_count.get(),
            size: raw.size.get(),
            num_blocks: raw.num_blocks.get(),
            uid: raw.uid.get(),
            gid: raw.gid.get(),
            atime: raw.atime.get(),
            mtime: raw.mtime.get(),
            ctime: raw.ctime.get(),
            index_block: raw.index_block.get(),
        }
    }

    fn to_raw(&self) -> DiskInode {
        DiskInode {
            mode: U16::new(self.mode),
            link_count: U16::new(self.link_count),
            size: U32::new(self.size),
            num_blocks: U32::new(self.num_blocks),
            uid: U32::new(self.uid),
            gid: U32::new(self.gid),
            atime: U32::new(self.atime),
            mtime: U32::new(self.mtime),
            ctime: U32::new(self.ctime),
            index_block: U32::new(self.index_block),
        }
    }

    pub fn decode(buf: &[u8]) -> Self {
        // The record always fits: DISK_INODE_SIZE is far below a block.
        let mut raw = DiskInode::new_zeroed();
        raw.as_bytes_mut()
            .copy_from_slice(&buf[INODE_OFFSET..INODE_OFFSET + DISK_INODE_SIZE]);
        Self::from_raw(raw)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        let raw = self.to_raw();
        buf[INODE_OFFSET..INODE_OFFSET + DISK_INODE_SIZE].copy_from_slice(raw.as_bytes());
    }
}

/// Loads the inode record stored in `metadata_block`. No range checks are
/// applied to the decoded values.
pub fn read_inode<T: BlockStorage>(
    cache: &mut BlockCache<T>,
    metadata_block: BlockNumber,
) -> Result<InodeFields> {
    Ok(cache.read(metadata_block, |block| InodeFields::decode(&block[..]))?)
}

/// Stores `fields` into `metadata_block` and marks the block dirty.
pub fn write_inode<T: BlockStorage>(
    cache: &mut BlockCache<T>,
    metadata_block: BlockNumber,
    fields: &InodeFields,
) -> Result<()> {
    Ok(cache.modify(metadata_block, |block| fields.encode(&mut block[..]))?)
}

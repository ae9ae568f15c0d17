use crate::inode::Credentials;
use crate::layout::{S_IFDIR, MAX_INODES};

const DEFAULT_INODES: u32 = 64;
const DEFAULT_CACHE_SLOTS: usize = 128;
const DEFAULT_CACHE_BUFFERS: usize = 64;

/// Parameters used when laying a new file system onto a device.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Blocks to use. Defaults to the whole device.
    pub blocks: Option<u32>,
    /// Inode numbers to provision, number 0 included.
    pub inodes: u32,
    pub root_owner: Credentials,
    pub root_mode: u16,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            blocks: None,
            inodes: DEFAULT_INODES,
            root_owner: Credentials::root(),
            root_mode: S_IFDIR | 0o755,
        }
    }
}

impl FormatOptions {
    pub fn with_blocks(mut self, blocks: u32) -> Self {
        self.blocks = Some(blocks);
        self
    }

    /// Clamped to the number of slots an inode map block holds.
    pub fn with_inodes(mut self, inodes: u32) -> Self {
        self.inodes = inodes.min(MAX_INODES);
        self
    }

    pub fn with_root_owner(mut self, owner: Credentials) -> Self {
        self.root_owner = owner;
        self
    }

    /// Permission bits of the root directory. The directory type bit is
    /// always added.
    pub fn with_root_permissions(mut self, permissions: u16) -> Self {
        self.root_mode = S_IFDIR | (permissions & 0o7777);
        self
    }
}

/// Parameters of a mounted instance.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Number of inodes the inode cache can hold at once.
    pub cache_slots: usize,
    /// Number of clean block buffers kept around between operations.
    pub cache_buffers: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cache_slots: DEFAULT_CACHE_SLOTS,
            cache_buffers: DEFAULT_CACHE_BUFFERS,
        }
    }
}

impl MountOptions {
    pub fn with_cache_slots(mut self, slots: usize) -> Self {
        self.cache_slots = slots;
        self
    }

    pub fn with_cache_buffers(mut self, buffers: usize) -> Self {
        self.cache_buffers = buffers;
        self
    }
}

//! In-memory inodes and the cache that owns them.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{Lab5Error, Resource, Result};
use crate::layout::{BlockNumber, InodeNumber, S_IFDIR, S_IFMT, S_IFREG};
use crate::node::InodeFields;

/// The type of file object an inode describes. Picked once from the stored
/// mode when an inode is loaded or created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    RegularFile,
    Directory,
}

/// Operations a host can dispatch to an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Lookup,
    Readdir,
    Read,
    Write,
    Open,
    Seek,
    Map,
}

const DIRECTORY_OPS: &[Operation] = &[Operation::Lookup, Operation::Readdir];
/// Served by the host's generic buffered I/O, which reaches the disk through
/// [`Lab5Fs::bmap`](crate::Lab5Fs::bmap).
const FILE_OPS: &[Operation] = &[
    Operation::Read,
    Operation::Write,
    Operation::Open,
    Operation::Seek,
    Operation::Map,
];

impl InodeKind {
    pub fn from_mode(mode: u16) -> Result<Self> {
        match mode & S_IFMT {
            S_IFDIR => Ok(InodeKind::Directory),
            // New inodes created with bare permission bits are regular files.
            0 | S_IFREG => Ok(InodeKind::RegularFile),
            other => Err(Lab5Error::InvalidArgument(format!(
                "unsupported file type {:o}",
                other
            ))),
        }
    }

    pub fn operations(self) -> &'static [Operation] {
        match self {
            InodeKind::Directory => DIRECTORY_OPS,
            InodeKind::RegularFile => FILE_OPS,
        }
    }

    pub fn supports(self, op: Operation) -> bool {
        self.operations().contains(&op)
    }
}

/// The two block numbers needed to find an inode's record and pointer table
/// on disk again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub metadata_block: BlockNumber,
    pub index_block: BlockNumber,
}

/// Owner identity stamped on new inodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub fn root() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

/// A loaded inode. Only a fully initialized inode is ever placed in the
/// [`InodeCache`].
#[derive(Debug, Clone)]
pub struct Inode {
    ino: InodeNumber,
    kind: InodeKind,
    pub mode: u16,
    pub link_count: u16,
    pub size: u32,
    pub num_blocks: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    /// Cleared exactly once, when the inode leaves the cache.
    entry: Option<CacheEntry>,
}

impl Inode {
    /// Builds a live inode from a decoded on-disk record.
    pub fn from_disk(ino: InodeNumber, metadata_block: BlockNumber, fields: &InodeFields) -> Result<Self> {
        Ok(Self {
            ino,
            kind: InodeKind::from_mode(fields.mode)?,
            mode: fields.mode,
            link_count: fields.link_count,
            size: fields.size,
            num_blocks: fields.num_blocks,
            uid: fields.uid,
            gid: fields.gid,
            atime: fields.atime,
            mtime: fields.mtime,
            ctime: fields.ctime,
            entry: Some(CacheEntry {
                metadata_block,
                index_block: fields.index_block,
            }),
        })
    }

    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// The record to write back for this inode.
    pub fn fields(&self) -> Option<(BlockNumber, InodeFields)> {
        self.entry.map(|entry| {
            (
                entry.metadata_block,
                InodeFields {
                    mode: self.mode,
                    link_count: self.link_count,
                    size: self.size,
                    num_blocks: self.num_blocks,
                    uid: self.uid,
                    gid: self.gid,
                    atime: self.atime,
                    mtime: self.mtime,
                    ctime: self.ctime,
                    index_block: entry.index_block,
                },
            )
        })
    }

    /// Detaches and releases the cache entry. Calling this on an inode that
    /// was already cleared, or never got an entry, does nothing.
    pub fn clear(&mut self) -> Option<CacheEntry> {
        let entry = self.entry.take();
        if entry.is_some() {
            debug!("Cleared cache entry of inode {}.", self.ino);
        }
        entry
    }
}

struct Slot {
    inode: Inode,
    dirty: bool,
}

/// Inodes currently held in memory, keyed by inode number. The cache has a
/// fixed number of slots; running out is reported as exhaustion.
pub struct InodeCache {
    slots: BTreeMap<InodeNumber, Slot>,
    capacity: usize,
}

impl InodeCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            capacity,
        }
    }

    /// Fails when no slot is left for another inode.
    pub fn reserve(&self) -> Result<()> {
        if self.slots.len() >= self.capacity {
            return Err(Lab5Error::Exhausted(Resource::CacheSlot));
        }
        Ok(())
    }

    pub fn insert(&mut self, inode: Inode, dirty: bool) -> Result<()> {
        if self.slots.contains_key(&inode.ino) {
            return Err(Lab5Error::AlreadyExists);
        }
        self.reserve()?;
        self.slots.insert(inode.ino, Slot { inode, dirty });
        Ok(())
    }

    pub fn get(&self, ino: InodeNumber) -> Option<&Inode> {
        self.slots.get(&ino).map(|slot| &slot.inode)
    }

    pub fn get_mut(&mut self, ino: InodeNumber) -> Option<&mut Inode> {
        self.slots.get_mut(&ino).map(|slot| &mut slot.inode)
    }

    pub fn contains(&self, ino: InodeNumber) -> bool {
        self.slots.contains_key(&ino)
    }

    /// Flags an inode for write-back. Returns false when it is not cached.
    pub fn mark_dirty(&mut self, ino: InodeNumber) -> bool {
        match self.slots.get_mut(&ino) {
            Some(slot) => {
                slot.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn is_dirty(&self, ino: InodeNumber) -> bool {
        self.slots.get(&ino).map(|slot| slot.dirty).unwrap_or(false)
    }

    pub fn mark_clean(&mut self, ino: InodeNumber) {
        if let Some(slot) = self.slots.get_mut(&ino) {
            slot.dirty = false;
        }
    }

    pub fn inos(&self) -> Vec<InodeNumber> {
        self.slots.keys().copied().collect()
    }

    pub fn dirty_inodes(&self) -> Vec<InodeNumber> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(&ino, _)| ino)
            .collect()
    }

    /// Takes an inode out of the cache, clearing its entry.
    pub fn remove(&mut self, ino: InodeNumber) -> Option<Inode> {
        self.slots.remove(&ino).map(|slot| {
            let mut inode = slot.inode;
            inode.clear();
            inode
        })
    }

    /// A cached inode with nothing to write back, the one to give up when a
    /// slot is needed.
    pub fn clean_inode(&self) -> Option<InodeNumber> {
        self.slots
            .iter()
            .find(|(_, slot)| !slot.dirty)
            .map(|(&ino, _)| ino)
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};

use crate::alloc::{Bitmap, BlockAllocator, State};
use crate::config::{FormatOptions, MountOptions};
use crate::dir::{self, DirEntry, DirHandle, DirRecord, ReadDir, DIR_RECORD_SIZE};
use crate::error::{Lab5Error, Result};
use crate::index;
use crate::inode::{CacheEntry, Credentials, Inode, InodeCache, InodeKind, Operation};
use crate::inomap::{InodeMap, InodeNumberAllocator};
use crate::io::{BlockCache, BlockStorage};
use crate::layout::{
    BlockNumber, InodeNumber, BLOCK_BMP, BLOCK_SIZE, FIRST_FREE_BLOCK, INODE_MAP, MAX_BLOCKS,
    MAX_INODES, NO_BLOCK, ROOT_INO, SUPERBLOCK_INDEX, S_IFDIR, S_IFMT,
};
use crate::node::{self, InodeFields};
use crate::sb::SuperBlock;

/// Usage figures reported by [`Lab5Fs::statfs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub inodes: usize,
    pub free_inodes: usize,
}

/// Seconds since epoch, truncated to the on-disk width.
fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

/// What inode creation has acquired so far, in acquisition order.
#[derive(Default)]
struct Acquired {
    metadata_block: Option<BlockNumber>,
    index_block: Option<BlockNumber>,
    ino: Option<InodeNumber>,
}

/// A mounted file system.
///
/// Every operation takes `&mut self`; callers serialize access (the host's
/// file system wide lock). Nothing in here locks on its own.
pub struct Lab5Fs<T: BlockStorage> {
    cache: BlockCache<T>,
    super_block: SuperBlock,
    blocks: BlockAllocator,
    inums: InodeNumberAllocator,
    inodes: InodeCache,
}

impl<T: BlockStorage> Lab5Fs<T> {
    /// Initializes the file system onto owned block storage and mounts it with
    /// default options.
    pub fn format(dev: T, options: FormatOptions) -> Result<Self> {
        Self::format_with(dev, options, MountOptions::default())
    }

    pub fn format_with(dev: T, options: FormatOptions, mount: MountOptions) -> Result<Self> {
        let device_blocks = dev.block_count().min(MAX_BLOCKS as usize) as u32;
        let blocks = options.blocks.unwrap_or(device_blocks);
        if blocks > device_blocks {
            return Err(Lab5Error::InvalidArgument(format!(
                "{} blocks requested but the device holds {}",
                blocks, device_blocks
            )));
        }
        // The root directory needs a metadata block and an index block.
        if blocks < FIRST_FREE_BLOCK + 2 {
            return Err(Lab5Error::InvalidArgument(format!(
                "{} blocks are too few for a file system",
                blocks
            )));
        }
        if options.inodes <= ROOT_INO {
            return Err(Lab5Error::InvalidArgument(format!(
                "{} inode numbers are too few for a file system",
                options.inodes
            )));
        }
        if options.inodes > MAX_INODES {
            return Err(Lab5Error::InvalidArgument(format!(
                "{} inode numbers do not fit the inode map, at most {} do",
                options.inodes, MAX_INODES
            )));
        }
        if InodeKind::from_mode(options.root_mode)? != InodeKind::Directory {
            return Err(Lab5Error::InvalidArgument(
                "the root inode must be a directory".to_string(),
            ));
        }

        let mut fs = Self {
            cache: BlockCache::with_capacity(dev, mount.cache_buffers),
            super_block: SuperBlock::new(blocks, options.inodes, ROOT_INO),
            blocks: BlockAllocator::format(blocks as usize),
            inums: InodeNumberAllocator::format(options.inodes as usize),
            inodes: InodeCache::with_capacity(mount.cache_slots),
        };

        let root = fs.new_inode(options.root_mode, options.root_owner)?;
        if root != ROOT_INO {
            return Err(Lab5Error::Corrupted(format!(
                "root directory was created as inode {}",
                root
            )));
        }
        // "." and the entry in its (own) parent.
        fs.iget_mut(root)?.link_count = 2;
        fs.sync()?;

        info!(
            "Formatted file system with {} blocks and {} inodes.",
            blocks, options.inodes
        );
        Ok(fs)
    }

    /// Opens a formatted device, loading both allocators from disk.
    pub fn mount(dev: T, options: MountOptions) -> Result<Self> {
        let mut cache = BlockCache::with_capacity(dev, options.cache_buffers);

        let super_block = cache.read(SUPERBLOCK_INDEX, |block| SuperBlock::parse(&block[..]))??;
        if super_block.blocks_count as usize > cache.block_count() {
            return Err(Lab5Error::Corrupted(format!(
                "file system spans {} blocks but the device holds {}",
                super_block.blocks_count,
                cache.block_count()
            )));
        }

        let bitmap = cache
            .read(BLOCK_BMP, |block| Bitmap::parse(&block[..]))?
            .ok_or_else(|| Lab5Error::Corrupted("unreadable block bitmap".to_string()))?;
        if (0..FIRST_FREE_BLOCK as usize).any(|blocknr| bitmap.get(blocknr) == State::Free) {
            return Err(Lab5Error::Corrupted(
                "reserved blocks are marked free".to_string(),
            ));
        }
        let map = cache
            .read(INODE_MAP, |block| InodeMap::parse(&block[..]))?
            .ok_or_else(|| Lab5Error::Corrupted("unreadable inode map".to_string()))?;

        let blocks = BlockAllocator::new(bitmap, super_block.blocks_count as usize);
        let inums = InodeNumberAllocator::new(map, super_block.inodes_count as usize);
        if inums.metadata_block(super_block.root_ino).is_none() {
            return Err(Lab5Error::Corrupted("root inode is not allocated".to_string()));
        }
        if blocks.free_blocks() != super_block.free_blocks_count as usize
            || inums.free_inodes() != super_block.free_inodes_count as usize
        {
            warn!("Super block free counts are stale; using the allocation tables.");
        }

        info!(
            "Mounted file system: {} of {} blocks and {} of {} inodes free.",
            blocks.free_blocks(),
            blocks.total_blocks(),
            inums.free_inodes(),
            inums.total_inodes()
        );
        Ok(Self {
            cache,
            super_block,
            blocks,
            inums,
            inodes: InodeCache::with_capacity(options.cache_slots),
        })
    }

    /// Writes everything back and hands the device to the caller.
    pub fn unmount(mut self) -> Result<T> {
        self.sync()?;
        for ino in self.inodes.inos() {
            self.inodes.remove(ino);
        }
        Ok(self.cache.into_inner())
    }

    pub fn root_ino(&self) -> InodeNumber {
        self.super_block.root_ino
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: BLOCK_SIZE,
            blocks: self.blocks.total_blocks(),
            free_blocks: self.blocks.free_blocks(),
            inodes: self.inums.total_inodes(),
            free_inodes: self.inums.free_inodes(),
        }
    }

    pub fn block_allocator(&self) -> &BlockAllocator {
        &self.blocks
    }

    pub fn inode_allocator(&self) -> &InodeNumberAllocator {
        &self.inums
    }

    pub fn cached_inodes(&self) -> Vec<InodeNumber> {
        self.inodes.inos()
    }

    /// Flushes dirty inodes, the allocation tables and the super block, then
    /// writes every dirty buffer back to the device.
    pub fn sync(&mut self) -> Result<()> {
        for ino in self.inodes.dirty_inodes() {
            self.write_inode(ino)?;
        }

        if self.blocks.is_dirty() {
            let bitmap = self.blocks.bitmap();
            self.cache
                .modify(BLOCK_BMP, |block| block.copy_from_slice(bitmap.serialize()))?;
            self.blocks.mark_clean();
        }
        if self.inums.is_dirty() {
            let map = self.inums.map();
            self.cache
                .modify(INODE_MAP, |block| block.copy_from_slice(map.serialize()))?;
            self.inums.mark_clean();
        }

        self.super_block.free_blocks_count = self.blocks.free_blocks() as u32;
        self.super_block.free_inodes_count = self.inums.free_inodes() as u32;
        let super_block = &self.super_block;
        self.cache
            .modify(SUPERBLOCK_INDEX, |block| super_block.serialize_into(&mut block[..]))?;

        self.cache.sync()?;
        debug!("Synced file system.");
        Ok(())
    }

    /// Returns a cached inode, loading it from disk first if needed. Nothing
    /// is cached when the load fails.
    pub fn iget(&mut self, ino: InodeNumber) -> Result<&Inode> {
        if !self.inodes.contains(ino) {
            self.load_inode(ino)?;
        }
        self.inodes.get(ino).ok_or(Lab5Error::NotFound)
    }

    /// [`Lab5Fs::iget`] for modification. Mark the inode dirty after changing
    /// it, or the change may be dropped with the cache slot.
    fn iget_mut(&mut self, ino: InodeNumber) -> Result<&mut Inode> {
        if !self.inodes.contains(ino) {
            self.load_inode(ino)?;
        }
        self.inodes.get_mut(ino).ok_or(Lab5Error::NotFound)
    }

    fn load_inode(&mut self, ino: InodeNumber) -> Result<()> {
        let metadata_block = self.inums.metadata_block(ino).ok_or(Lab5Error::NotFound)?;
        self.make_room()?;

        let fields = node::read_inode(&mut self.cache, metadata_block)?;
        let inode = Inode::from_disk(ino, metadata_block, &fields)?;
        debug!(
            "Loaded inode {}: mode={:o}, links={}, uid={}, gid={}, index block {}.",
            ino, inode.mode, inode.link_count, inode.uid, inode.gid, fields.index_block
        );
        self.inodes.insert(inode, false)
    }

    /// Evicts an inode with nothing to write back when every cache slot is
    /// taken. The cache is exhausted only when all cached inodes are dirty.
    fn make_room(&mut self) -> Result<()> {
        if let Err(err) = self.inodes.reserve() {
            let victim = self.inodes.clean_inode().ok_or(err)?;
            debug!("Evicting inode {} to free a cache slot.", victim);
            self.evict(victim)?;
        }
        Ok(())
    }

    /// A cached inode, without loading.
    pub fn inode(&self, ino: InodeNumber) -> Option<&Inode> {
        self.inodes.get(ino)
    }

    /// A cached inode for modification. Call [`Lab5Fs::mark_dirty`] afterwards
    /// so the change is written back.
    pub fn inode_mut(&mut self, ino: InodeNumber) -> Option<&mut Inode> {
        self.inodes.get_mut(ino)
    }

    pub fn mark_dirty(&mut self, ino: InodeNumber) -> Result<()> {
        if self.inodes.mark_dirty(ino) {
            Ok(())
        } else {
            Err(Lab5Error::NotFound)
        }
    }

    /// Encodes a cached inode back into its metadata block.
    pub fn write_inode(&mut self, ino: InodeNumber) -> Result<()> {
        let (metadata_block, fields) = self
            .inodes
            .get(ino)
            .and_then(Inode::fields)
            .ok_or(Lab5Error::NotFound)?;
        node::write_inode(&mut self.cache, metadata_block, &fields)?;
        self.inodes.mark_clean(ino);
        debug!("Wrote inode {} to block {}.", ino, metadata_block);
        Ok(())
    }

    /// Drops an inode from the cache, writing it back first if it is dirty.
    /// Evicting an inode that is not cached does nothing.
    pub fn evict(&mut self, ino: InodeNumber) -> Result<()> {
        if self.inodes.is_dirty(ino) {
            self.write_inode(ino)?;
        }
        self.inodes.remove(ino);
        Ok(())
    }

    /// Allocates every resource a new inode needs and registers it, dirty, in
    /// the inode cache.
    ///
    /// On failure everything acquired so far is released in reverse order, so
    /// the allocators end up exactly as they were.
    pub fn new_inode(&mut self, mode: u16, owner: Credentials) -> Result<InodeNumber> {
        InodeKind::from_mode(mode)?;

        let mut acquired = Acquired::default();
        match self.build_inode(mode, owner, &mut acquired) {
            Ok(ino) => {
                info!("Created inode {} with mode {:o}.", ino, mode);
                Ok(ino)
            }
            Err(err) => {
                warn!("Inode creation failed, rolling back: {}", err);
                self.roll_back(acquired);
                Err(err)
            }
        }
    }

    fn build_inode(
        &mut self,
        mode: u16,
        owner: Credentials,
        acquired: &mut Acquired,
    ) -> Result<InodeNumber> {
        let metadata_block = self.blocks.allocate()?;
        acquired.metadata_block = Some(metadata_block);

        let index_block = self.blocks.allocate()?;
        acquired.index_block = Some(index_block);

        let ino = self.inums.allocate(metadata_block)?;
        acquired.ino = Some(ino);

        self.make_room()?;
        let time = now();
        let fields = InodeFields {
            mode,
            // The directory entry that will refer to this inode.
            link_count: 1,
            size: 0,
            num_blocks: 0,
            uid: owner.uid,
            gid: owner.gid,
            atime: time,
            mtime: time,
            ctime: time,
            index_block,
        };
        // Dropped, never cached, if a later step fails.
        let inode = Inode::from_disk(ino, metadata_block, &fields)?;

        index::initialize(&mut self.cache, index_block)?;
        node::write_inode(&mut self.cache, metadata_block, &fields)?;
        self.inodes.insert(inode, true)?;
        Ok(ino)
    }

    fn roll_back(&mut self, acquired: Acquired) {
        if let Some(ino) = acquired.ino {
            if let Err(err) = self.inums.release(ino) {
                error!("Rollback could not release inode {}: {}", ino, err);
            }
        }
        for blocknr in acquired.index_block.into_iter().chain(acquired.metadata_block) {
            if let Err(err) = self.blocks.release(blocknr) {
                error!("Rollback could not release block {}: {}", blocknr, err);
            }
        }
    }

    /// Releases an inode's data block, index block, metadata block and number,
    /// and forgets it.
    fn destroy_inode(&mut self, ino: InodeNumber) -> Result<()> {
        let entry = self.cache_entry(ino)?;
        index::ensure_initialized(&self.blocks, ino, entry.index_block)?;
        let data_block = index::first_data_block(&mut self.cache, entry.index_block)?;

        self.inodes.remove(ino);
        if data_block != NO_BLOCK {
            self.blocks.release(data_block)?;
        }
        self.inums.release(ino)?;
        self.blocks.release(entry.index_block)?;
        self.blocks.release(entry.metadata_block)?;
        info!("Destroyed inode {}.", ino);
        Ok(())
    }

    fn cache_entry(&mut self, ino: InodeNumber) -> Result<CacheEntry> {
        self.iget(ino)?.entry().copied().ok_or(Lab5Error::NotFound)
    }

    /// The index block of a directory, checked to be usable.
    fn dir_index(&mut self, dir: InodeNumber) -> Result<BlockNumber> {
        let (kind, entry) = {
            let inode = self.iget(dir)?;
            (inode.kind(), inode.entry().copied())
        };
        if !kind.supports(Operation::Lookup) {
            return Err(Lab5Error::NotADirectory(dir));
        }
        let entry = entry.ok_or(Lab5Error::NotFound)?;
        index::ensure_initialized(&self.blocks, dir, entry.index_block)?;
        Ok(entry.index_block)
    }

    /// Resolves `name` inside directory `dir` to an inode number.
    pub fn lookup(&mut self, dir: InodeNumber, name: &[u8]) -> Result<InodeNumber> {
        let index_block = self.dir_index(dir)?;
        dir::resolve(&mut self.cache, dir, index_block, name)
    }

    /// Like [`Lab5Fs::lookup`] but also loads the inode found.
    pub fn lookup_inode(&mut self, dir: InodeNumber, name: &[u8]) -> Result<&Inode> {
        let ino = self.lookup(dir, name)?;
        self.iget(ino)
    }

    /// Opens a directory for enumeration. `parent` is what ".." refers to.
    pub fn opendir(&mut self, dir: InodeNumber, parent: InodeNumber) -> Result<DirHandle> {
        for ino in [dir, parent].iter() {
            if !self.iget(*ino)?.kind().supports(Operation::Readdir) {
                return Err(Lab5Error::NotADirectory(*ino));
            }
        }
        Ok(DirHandle::new(dir, parent))
    }

    /// Produces the entries left at the handle's position.
    pub fn readdir<'h>(&self, handle: &'h mut DirHandle) -> ReadDir<'h> {
        handle.entries()
    }

    /// Collects the remaining entries of an open directory.
    pub fn read_entries(&self, handle: &mut DirHandle) -> Vec<DirEntry> {
        self.readdir(handle).collect()
    }

    /// Stores `name -> child` as the single record of directory `dir`,
    /// allocating the directory's data block on first use.
    fn add_entry(&mut self, dir: InodeNumber, name: &[u8], child: InodeNumber) -> Result<()> {
        dir::validate_name(name)?;
        let index_block = self.dir_index(dir)?;

        let mut data_block = index::first_data_block(&mut self.cache, index_block)?;
        let fresh = data_block == NO_BLOCK;
        if fresh {
            data_block = self.blocks.allocate()?;
        } else if let Some(existing) = dir::read_record(&mut self.cache, index_block)? {
            return Err(if existing.matches(name) {
                Lab5Error::AlreadyExists
            } else {
                Lab5Error::DirectoryFull(dir)
            });
        }

        let record = DirRecord {
            name: name.to_vec(),
            ino: child,
        };
        let stored = self.store_record(index_block, data_block, fresh, &record);
        if let Err(err) = stored {
            if fresh {
                if let Err(release_err) = self.blocks.release(data_block) {
                    error!("Could not release block {}: {}", data_block, release_err);
                }
            }
            return Err(err);
        }

        let time = now();
        let inode = self.iget_mut(dir)?;
        if fresh {
            inode.num_blocks = 1;
        }
        inode.size = DIR_RECORD_SIZE as u32;
        inode.mtime = time;
        inode.ctime = time;
        self.inodes.mark_dirty(dir);
        debug!(
            "Linked {:?} -> inode {} into directory {}.",
            String::from_utf8_lossy(name),
            child,
            dir
        );
        Ok(())
    }

    fn store_record(
        &mut self,
        index_block: BlockNumber,
        data_block: BlockNumber,
        fresh: bool,
        record: &DirRecord,
    ) -> Result<()> {
        self.cache.modify(data_block, |block| {
            if fresh {
                block.iter_mut().for_each(|b| *b = 0);
            }
            record.encode(&mut block[..])
        })??;
        if fresh {
            index::set_first_data_block(&mut self.cache, index_block, data_block)?;
        }
        Ok(())
    }

    /// Creates a new inode and enters it into directory `dir` under `name`.
    /// If the entry cannot be stored the new inode is destroyed again.
    pub fn create(
        &mut self,
        dir: InodeNumber,
        name: &[u8],
        mode: u16,
        owner: Credentials,
    ) -> Result<InodeNumber> {
        dir::validate_name(name)?;
        let index_block = self.dir_index(dir)?;
        if let Some(existing) = dir::read_record(&mut self.cache, index_block)? {
            return Err(if existing.matches(name) {
                Lab5Error::AlreadyExists
            } else {
                Lab5Error::DirectoryFull(dir)
            });
        }

        let ino = self.new_inode(mode, owner)?;
        if let Err(err) = self.add_entry(dir, name, ino) {
            warn!("Could not enter inode {} into directory {}: {}", ino, dir, err);
            if let Err(destroy_err) = self.destroy_inode(ino) {
                error!("Could not destroy inode {}: {}", ino, destroy_err);
            }
            return Err(err);
        }

        if self.iget(ino)?.is_dir() {
            // "." inside the new directory, and ".." pointing back at `dir`.
            self.iget_mut(ino)?.link_count = 2;
            self.inodes.mark_dirty(ino);
            let parent = self.iget_mut(dir)?;
            parent.link_count = parent.link_count.saturating_add(1);
            self.inodes.mark_dirty(dir);
        }
        Ok(ino)
    }

    /// Creates a directory with the given permission bits.
    pub fn mkdir(
        &mut self,
        dir: InodeNumber,
        name: &[u8],
        permissions: u16,
        owner: Credentials,
    ) -> Result<InodeNumber> {
        self.create(dir, name, S_IFDIR | (permissions & !S_IFMT), owner)
    }

    /// Adds another name for an existing regular file.
    pub fn link(&mut self, dir: InodeNumber, name: &[u8], ino: InodeNumber) -> Result<()> {
        if self.iget(ino)?.is_dir() {
            return Err(Lab5Error::InvalidArgument(
                "directories cannot be hard linked".to_string(),
            ));
        }
        self.add_entry(dir, name, ino)?;

        let time = now();
        let inode = self.iget_mut(ino)?;
        inode.link_count = inode.link_count.saturating_add(1);
        inode.ctime = time;
        self.inodes.mark_dirty(ino);
        Ok(())
    }

    /// Removes `name` from directory `dir`. The inode it named is destroyed
    /// once its last link is gone.
    pub fn unlink(&mut self, dir: InodeNumber, name: &[u8]) -> Result<()> {
        let index_block = self.dir_index(dir)?;
        let child = dir::resolve(&mut self.cache, dir, index_block, name)?;

        let child_is_dir = self.iget(child)?.is_dir();
        if child_is_dir {
            let child_index = self.dir_index(child)?;
            if dir::read_record(&mut self.cache, child_index)?.is_some() {
                return Err(Lab5Error::DirectoryNotEmpty(child));
            }
        }

        let data_block = index::first_data_block(&mut self.cache, index_block)?;
        self.cache
            .modify(data_block, |block| DirRecord::clear(&mut block[..]))?;

        let time = now();
        let inode = self.iget_mut(dir)?;
        inode.size = 0;
        inode.mtime = time;
        inode.ctime = time;
        if child_is_dir {
            inode.link_count = inode.link_count.saturating_sub(1);
        }
        self.inodes.mark_dirty(dir);

        let inode = self.iget_mut(child)?;
        inode.link_count = if child_is_dir {
            0
        } else {
            inode.link_count.saturating_sub(1)
        };
        inode.ctime = time;
        let remaining = inode.link_count;
        self.inodes.mark_dirty(child);
        debug!(
            "Unlinked {:?} from directory {}; inode {} has {} links left.",
            String::from_utf8_lossy(name),
            dir,
            child,
            remaining
        );

        if remaining == 0 {
            self.destroy_inode(child)
        } else {
            Ok(())
        }
    }

    /// Maps block `file_block` of a regular file to a device block, the hook
    /// generic buffered I/O reads and writes through. Only block 0 exists.
    /// With `create`, a missing data block is allocated.
    pub fn bmap(
        &mut self,
        ino: InodeNumber,
        file_block: u32,
        create: bool,
    ) -> Result<Option<BlockNumber>> {
        let (kind, entry) = {
            let inode = self.iget(ino)?;
            (inode.kind(), inode.entry().copied())
        };
        if !kind.supports(Operation::Map) {
            return Err(Lab5Error::InvalidArgument(format!(
                "inode {} has no data blocks to map",
                ino
            )));
        }
        if file_block != 0 {
            return Err(Lab5Error::FileTooLarge(file_block));
        }
        let entry = entry.ok_or(Lab5Error::NotFound)?;
        index::ensure_initialized(&self.blocks, ino, entry.index_block)?;

        let blocknr = index::first_data_block(&mut self.cache, entry.index_block)?;
        if blocknr != NO_BLOCK {
            return Ok(Some(blocknr));
        }
        if !create {
            return Ok(None);
        }

        let blocknr = self.blocks.allocate()?;
        let stored = self
            .cache
            .modify(blocknr, |block| block.iter_mut().for_each(|b| *b = 0))
            .map_err(Lab5Error::from)
            .and_then(|_| index::set_first_data_block(&mut self.cache, entry.index_block, blocknr));
        if let Err(err) = stored {
            if let Err(release_err) = self.blocks.release(blocknr) {
                error!("Could not release block {}: {}", blocknr, release_err);
            }
            return Err(err);
        }

        self.iget_mut(ino)?.num_blocks = 1;
        self.inodes.mark_dirty(ino);
        debug!("Mapped block 0 of inode {} to block {}.", ino, blocknr);
        Ok(Some(blocknr))
    }

    /// Records a new size for a regular file. A file never outgrows its one
    /// data block.
    pub fn set_size(&mut self, ino: InodeNumber, size: u32) -> Result<()> {
        if self.iget(ino)?.is_dir() {
            return Err(Lab5Error::InvalidArgument(format!(
                "inode {} is a directory",
                ino
            )));
        }
        if size as usize > BLOCK_SIZE {
            return Err(Lab5Error::FileTooLarge(size / BLOCK_SIZE as u32));
        }
        let time = now();
        let inode = self.iget_mut(ino)?;
        inode.size = size;
        inode.mtime = time;
        inode.ctime = time;
        self.inodes.mark_dirty(ino);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    fn create_test_device(blocks: usize) -> FileBlockEmulator {
        let dev = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(dev)
            .with_block_size(blocks)
            .build()
            .expect("Could not initialize disk emulator.")
    }

    fn user() -> Credentials {
        Credentials { uid: 1000, gid: 100 }
    }

    #[test]
    fn format_creates_root_directory() {
        let mut fs = Lab5Fs::format(create_test_device(64), FormatOptions::default()).unwrap();
        assert_eq!(fs.root_ino(), ROOT_INO);

        let root = fs.iget(ROOT_INO).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.link_count, 2);
        assert_eq!(root.mode, S_IFDIR | 0o755);

        let stat = fs.statfs();
        assert_eq!(stat.blocks, 64);
        // Root owns a metadata and an index block.
        assert_eq!(stat.free_blocks, 64 - FIRST_FREE_BLOCK as usize - 2);
        assert_eq!(stat.free_inodes, 64 - 2);
    }

    #[test]
    fn format_rejects_tiny_geometries() {
        assert!(Lab5Fs::format(create_test_device(4), FormatOptions::default()).is_err());
        assert!(Lab5Fs::format(
            create_test_device(64),
            FormatOptions::default().with_inodes(1)
        )
        .is_err());
        assert!(Lab5Fs::format(
            create_test_device(16),
            FormatOptions::default().with_blocks(32)
        )
        .is_err());
    }

    #[test]
    fn new_inode_has_one_link_and_no_data() {
        let mut fs = Lab5Fs::format(create_test_device(64), FormatOptions::default()).unwrap();
        let ino = fs.new_inode(0o644, user()).unwrap();

        let inode = fs.inode(ino).unwrap();
        assert_eq!(inode.kind(), InodeKind::RegularFile);
        assert_eq!(inode.mode, 0o644);
        assert_eq!(inode.link_count, 1);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.num_blocks, 0);
        assert_eq!((inode.uid, inode.gid), (1000, 100));
        assert_eq!(inode.atime, inode.ctime);

        let entry = *inode.entry().unwrap();
        assert_eq!(fs.inode_allocator().metadata_block(ino), Some(entry.metadata_block));
        assert!(fs.block_allocator().is_used(entry.index_block));
        assert_eq!(index::first_data_block(&mut fs.cache, entry.index_block).unwrap(), NO_BLOCK);
    }

    #[test]
    fn cache_slot_exhaustion_rolls_back() {
        let mut fs = Lab5Fs::format_with(
            create_test_device(64),
            FormatOptions::default(),
            MountOptions::default().with_cache_slots(1),
        )
        .unwrap();
        // The only slot holds an inode with unwritten changes.
        fs.mark_dirty(ROOT_INO).unwrap();
        let bitmap = *fs.block_allocator().bitmap();
        let free_inodes = fs.inode_allocator().free_inodes();

        match fs.new_inode(0o644, user()) {
            Err(Lab5Error::Exhausted(Resource::CacheSlot)) => (),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        assert!(*fs.block_allocator().bitmap() == bitmap);
        assert_eq!(fs.inode_allocator().free_inodes(), free_inodes);
        assert_eq!(fs.inode_allocator().metadata_block(2), None);
    }

    #[test]
    fn full_cache_gives_up_a_clean_inode() {
        let mut fs = Lab5Fs::format_with(
            create_test_device(64),
            FormatOptions::default(),
            MountOptions::default().with_cache_slots(1),
        )
        .unwrap();

        let ino = fs.new_inode(0o644, user()).unwrap();
        assert_eq!(fs.cached_inodes(), vec![ino]);

        // Root comes back, pushing out the new inode once it is written.
        assert!(matches!(fs.iget(ROOT_INO), Err(Lab5Error::Exhausted(Resource::CacheSlot))));
        fs.sync().unwrap();
        assert!(fs.iget(ROOT_INO).unwrap().is_dir());
        assert_eq!(fs.cached_inodes(), vec![ROOT_INO]);
        assert_eq!(fs.iget(ino).unwrap().link_count, 1);
    }

    #[test]
    fn format_rejects_more_inodes_than_the_map_holds() {
        let mut options = FormatOptions::default();
        options.inodes = MAX_INODES + 1;
        assert!(matches!(
            Lab5Fs::format(create_test_device(64), options),
            Err(Lab5Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn evicted_inode_reloads_from_disk() {
        let mut fs = Lab5Fs::format(create_test_device(64), FormatOptions::default()).unwrap();
        let ino = fs.new_inode(0o600, user()).unwrap();
        fs.set_size(ino, 100).unwrap();

        fs.evict(ino).unwrap();
        assert!(fs.inode(ino).is_none());
        // A second eviction finds nothing to release.
        fs.evict(ino).unwrap();

        let inode = fs.iget(ino).unwrap();
        assert_eq!(inode.size, 100);
        assert_eq!(inode.mode, 0o600);
    }

    #[test]
    fn unknown_inode_numbers_are_not_found() {
        let mut fs = Lab5Fs::format(create_test_device(64), FormatOptions::default()).unwrap();
        assert!(matches!(fs.iget(0), Err(Lab5Error::NotFound)));
        assert!(matches!(fs.iget(5), Err(Lab5Error::NotFound)));
        assert!(matches!(fs.iget(10_000), Err(Lab5Error::NotFound)));
    }

    #[test]
    fn directory_operations_require_a_directory() {
        let mut fs = Lab5Fs::format(create_test_device(64), FormatOptions::default()).unwrap();
        let file = fs.create(ROOT_INO, b"file", 0o644, user()).unwrap();

        assert!(matches!(fs.lookup(file, b"x"), Err(Lab5Error::NotADirectory(_))));
        assert!(matches!(fs.opendir(file, ROOT_INO), Err(Lab5Error::NotADirectory(_))));
        assert!(matches!(
            fs.create(file, b"x", 0o644, user()),
            Err(Lab5Error::NotADirectory(_))
        ));
        assert!(fs.bmap(ROOT_INO, 0, true).is_err());
    }

    #[test]
    fn bmap_allocates_the_single_data_block_on_demand() {
        let mut fs = Lab5Fs::format(create_test_device(64), FormatOptions::default()).unwrap();
        let ino = fs.new_inode(0o644, user()).unwrap();
        let free = fs.statfs().free_blocks;

        assert_eq!(fs.bmap(ino, 0, false).unwrap(), None);
        let blocknr = fs.bmap(ino, 0, true).unwrap().unwrap();
        assert_eq!(fs.bmap(ino, 0, false).unwrap(), Some(blocknr));
        assert_eq!(fs.bmap(ino, 0, true).unwrap(), Some(blocknr));
        assert_eq!(fs.statfs().free_blocks, free - 1);
        assert_eq!(fs.inode(ino).unwrap().num_blocks, 1);

        assert!(matches!(fs.bmap(ino, 1, true), Err(Lab5Error::FileTooLarge(1))));
        assert!(matches!(
            fs.set_size(ino, BLOCK_SIZE as u32 + 1),
            Err(Lab5Error::FileTooLarge(_))
        ));
    }

    #[test]
    fn corrupted_index_pointer_is_a_logic_error() {
        let mut fs = Lab5Fs::format(create_test_device(64), FormatOptions::default()).unwrap();
        let ino = fs.new_inode(0o644, user()).unwrap();
        let metadata_block = fs.inode(ino).unwrap().entry().unwrap().metadata_block;
        fs.evict(ino).unwrap();

        // Point the record at a block nobody allocated.
        let mut fields = node::read_inode(&mut fs.cache, metadata_block).unwrap();
        fields.index_block = 60;
        node::write_inode(&mut fs.cache, metadata_block, &fields).unwrap();

        assert!(fs.bmap(ino, 0, true).unwrap_err().is_logic());
    }
}

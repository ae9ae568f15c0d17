use std::path::Path;

use crate::layout::BlockNumber;

/// Synchronous access to a device made of `BLOCK_SIZE` byte blocks numbered
/// from 0 (the first block) to n - 1 (the last block).
///
/// The file system only ever touches a device through a [`BlockCache`], which
/// decides when dirty blocks are written back.
///
/// [`BlockCache`]: crate::io::BlockCache
pub trait BlockStorage {
    /// Opens a disk at the specified path. This method does not validate the
    /// storage blocks, it is up for clients to ensure disks are appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// The number of blocks available on the device.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}

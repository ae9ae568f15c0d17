use crate::io::BlockStorage;
use crate::layout::{BlockNumber, BLOCK_SIZE};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr as usize >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        let emu = FileBlockEmulator {
            fd: file,
            block_count: nblocks,
        };

        Ok(emu)
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        self.fd
            .seek(SeekFrom::Start(blocknr as u64 * BLOCK_SIZE as u64))?;
        self.fd.read_exact(&mut buf[..BLOCK_SIZE])
    }

    /// This method truncates writes that exceed the total block size.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        self.fd
            .seek(SeekFrom::Start(blocknr as u64 * BLOCK_SIZE as u64))?;

        let max = buf.len().min(BLOCK_SIZE);
        self.fd.write_all(&buf[0..max])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    clear: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_count: 0,
            clear: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_size(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether to zero the medium when building. Turn this off to reopen a
    /// disk that already holds a file system.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// This builder assumed ownership of the file descriptor used and does
    /// destructive things to prepare the file for use. Additionally, ownership
    /// of the file is transfered to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "an emulated disk needs at least one block",
            ));
        }
        if self.clear {
            self.zero_blocks()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive reads.
        for _ in 0..self.block_count {
            bfd.write_all(&[0x00; BLOCK_SIZE])?;
        }
        bfd.flush()
    }
}

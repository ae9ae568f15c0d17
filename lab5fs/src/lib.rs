//! lab5fs: a small block-based file system engine.
//!
//! A device is split into 1K blocks. Block 0 holds the super block, block 1
//! the block bitmap and block 2 the inode map binding inode numbers to the
//! block storing each inode's record. Every inode owns an index block whose
//! first slot points at its single data block. A directory data block holds
//! one record.
//!
//! [`Lab5Fs`] ties the pieces together on top of any [`io::BlockStorage`].

mod alloc;
mod config;
mod dir;
mod error;
mod fs;
mod index;
mod inode;
mod inomap;
pub mod io;
pub mod layout;
mod node;
mod sb;

pub use crate::alloc::{Bitmap, BlockAllocator, State};
pub use crate::config::{FormatOptions, MountOptions};
pub use crate::dir::{DirEntry, DirHandle, ReadDir};
pub use crate::error::{Lab5Error, LogicError, Resource, Result};
pub use crate::fs::{Lab5Fs, StatFs};
pub use crate::inode::{CacheEntry, Credentials, Inode, InodeKind, Operation};
pub use crate::inomap::{InodeMap, InodeNumberAllocator};
pub use crate::layout::{BlockNumber, InodeNumber};

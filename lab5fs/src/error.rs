use std::fmt;

use thiserror::Error;

use crate::layout::{BlockNumber, InodeNumber};

/// The finite resources the file system hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Block,
    InodeNumber,
    /// A slot in the in-memory inode cache.
    CacheSlot,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Block => write!(f, "block"),
            Resource::InodeNumber => write!(f, "inode number"),
            Resource::CacheSlot => write!(f, "inode cache slot"),
        }
    }
}

/// An internal invariant was broken. These are never expected during normal
/// operation and point at a bug elsewhere in the system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogicError {
    #[error("released {resource} {number} which was not allocated")]
    DoubleRelease { resource: Resource, number: u32 },
    #[error("inode {ino} references index block {block} which was never initialized")]
    UninitializedIndex { ino: InodeNumber, block: BlockNumber },
}

#[derive(Error, Debug)]
pub enum Lab5Error {
    #[error("no free {0} available")]
    Exhausted(Resource),
    #[error("device I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("found no such file or inode")]
    NotFound,
    #[error("logic error: {0}")]
    Logic(#[from] LogicError),
    #[error("inode {0} is not a directory")]
    NotADirectory(InodeNumber),
    #[error("directory inode {0} already holds its only entry")]
    DirectoryFull(InodeNumber),
    #[error("entry already exists")]
    AlreadyExists,
    #[error("directory inode {0} is not empty")]
    DirectoryNotEmpty(InodeNumber),
    #[error("name is longer than {0} bytes")]
    NameTooLong(usize),
    #[error("file block {0} is past the single data block of a file")]
    FileTooLarge(u32),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid file system layout: {0}")]
    Corrupted(String),
}

impl Lab5Error {
    /// Reports whether this error is an internal invariant violation rather
    /// than an ordinary operation failure.
    pub fn is_logic(&self) -> bool {
        matches!(self, Lab5Error::Logic(_))
    }
}

pub type Result<T> = std::result::Result<T, Lab5Error>;

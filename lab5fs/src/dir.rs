//! Directory blocks and the two directory operations built on them.
//!
//! A directory block holds exactly one record mapping a name to an inode
//! number, so a directory can hold at most one child. Enumeration only
//! produces the synthetic "." and ".." entries; the stored record is reached
//! through [`resolve`] alone.

use log::debug;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Lab5Error, Result};
use crate::index;
use crate::inode::InodeKind;
use crate::io::{BlockCache, BlockStorage};
use crate::layout::{BlockNumber, InodeNumber, MAX_NAME_LEN, NO_BLOCK, NO_INODE};

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
struct DiskDirRecord {
    name_len: u8,
    name: [u8; MAX_NAME_LEN],
    /// Zero when the record is empty.
    inode: U32<LittleEndian>,
}

pub const DIR_RECORD_SIZE: usize = std::mem::size_of::<DiskDirRecord>();

/// A decoded, occupied directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    pub name: Vec<u8>,
    pub ino: InodeNumber,
}

impl DirRecord {
    /// Decodes the record at the head of a directory block. Returns `None` for
    /// an empty record.
    pub fn decode(block: &[u8]) -> Option<Self> {
        let raw = DiskDirRecord::ref_from(block.get(..DIR_RECORD_SIZE)?)?;
        if raw.inode.get() == NO_INODE {
            return None;
        }
        let len = (raw.name_len as usize).min(MAX_NAME_LEN);
        Some(Self {
            name: raw.name[..len].to_vec(),
            ino: raw.inode.get(),
        })
    }

    /// Writes this record at the head of a directory block.
    pub fn encode(&self, block: &mut [u8]) -> Result<()> {
        validate_name(&self.name)?;
        let mut raw = DiskDirRecord::new_zeroed();
        raw.name_len = self.name.len() as u8;
        raw.name[..self.name.len()].copy_from_slice(&self.name);
        raw.inode = U32::new(self.ino);
        block[..DIR_RECORD_SIZE].copy_from_slice(raw.as_bytes());
        Ok(())
    }

    /// Empties the record at the head of a directory block.
    pub fn clear(block: &mut [u8]) {
        block[..DIR_RECORD_SIZE].copy_from_slice(DiskDirRecord::new_zeroed().as_bytes());
    }

    /// Exact byte length and content match.
    pub fn matches(&self, name: &[u8]) -> bool {
        self.name.as_slice() == name
    }
}

/// Names stored in a directory block must be non-empty, fit the record and
/// not shadow the synthetic entries.
pub fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name == b"." || name == b".." || name.contains(&b'/') {
        return Err(Lab5Error::InvalidArgument(format!(
            "{:?} is not a valid entry name",
            String::from_utf8_lossy(name)
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Lab5Error::NameTooLong(MAX_NAME_LEN));
    }
    Ok(())
}

/// Reads the record stored in a directory's data block, if the directory has
/// a data block and the record is occupied.
pub fn read_record<T: BlockStorage>(
    cache: &mut BlockCache<T>,
    index_block: BlockNumber,
) -> Result<Option<DirRecord>> {
    let data_block = index::first_data_block(cache, index_block)?;
    if data_block == NO_BLOCK {
        return Ok(None);
    }
    Ok(cache.read(data_block, |block| DirRecord::decode(&block[..]))?)
}

/// Looks `name` up in a directory given the directory's index block.
pub fn resolve<T: BlockStorage>(
    cache: &mut BlockCache<T>,
    dir: InodeNumber,
    index_block: BlockNumber,
    name: &[u8],
) -> Result<InodeNumber> {
    debug!(
        "Resolving {:?} in directory {}.",
        String::from_utf8_lossy(name),
        dir
    );
    match read_record(cache, index_block)? {
        Some(record) if record.matches(name) => Ok(record.ino),
        _ => Err(Lab5Error::NotFound),
    }
}

/// An entry produced while enumerating a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: InodeNumber,
    /// Cursor position this entry was produced at.
    pub offset: u64,
    pub kind: InodeKind,
}

/// The caller-held state of an open directory. Its position only moves
/// forward, one step per entry produced.
#[derive(Debug)]
pub struct DirHandle {
    ino: InodeNumber,
    parent: InodeNumber,
    pos: u64,
}

impl DirHandle {
    pub(crate) fn new(ino: InodeNumber, parent: InodeNumber) -> Self {
        Self { ino, parent, pos: 0 }
    }

    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Enumerates the entries remaining at the current position. The handle
    /// is advanced as entries are pulled, so an abandoned iteration resumes
    /// where it stopped and an exhausted one stays exhausted.
    pub fn entries(&mut self) -> ReadDir<'_> {
        ReadDir { handle: self }
    }
}

pub struct ReadDir<'a> {
    handle: &'a mut DirHandle,
}

impl<'a> Iterator for ReadDir<'a> {
    type Item = DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let (name, ino) = match self.handle.pos {
            0 => (".", self.handle.ino),
            1 => ("..", self.handle.parent),
            _ => return None,
        };
        let entry = DirEntry {
            name: name.to_string(),
            ino,
            offset: self.handle.pos,
            kind: InodeKind::Directory,
        };
        self.handle.pos += 1;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileBlockEmulatorBuilder;
    use crate::layout::BLOCK_SIZE;

    fn cache() -> BlockCache<crate::io::FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_size(8)
            .build()
            .unwrap();
        BlockCache::new(dev)
    }

    /// Directory with index block 3 pointing at data block 4.
    fn directory_with(record: Option<DirRecord>) -> BlockCache<crate::io::FileBlockEmulator> {
        let mut cache = cache();
        index::initialize(&mut cache, 3).unwrap();
        index::set_first_data_block(&mut cache, 3, 4).unwrap();
        if let Some(record) = record {
            cache.modify(4, |block| record.encode(&mut block[..])).unwrap().unwrap();
        }
        cache
    }

    #[test]
    fn record_is_a_quarter_block() {
        assert_eq!(DIR_RECORD_SIZE, 256);
        assert_eq!(BLOCK_SIZE % DIR_RECORD_SIZE, 0);
    }

    #[test]
    fn record_layout_is_fixed() {
        let mut block = vec![0; BLOCK_SIZE];
        DirRecord {
            name: b"foo".to_vec(),
            ino: 0x0201,
        }
        .encode(&mut block)
        .unwrap();

        assert_eq!(block[0], 3);
        assert_eq!(&block[1..4], b"foo");
        assert_eq!(&block[252..256], &[1, 2, 0, 0]);
    }

    #[test]
    fn resolves_the_stored_entry() {
        let mut cache = directory_with(Some(DirRecord {
            name: b"foo".to_vec(),
            ino: 5,
        }));
        assert_eq!(resolve(&mut cache, 1, 3, b"foo").unwrap(), 5);
    }

    #[test]
    fn other_names_are_not_found() {
        let mut cache = directory_with(Some(DirRecord {
            name: b"foo".to_vec(),
            ino: 5,
        }));
        for name in [&b"bar"[..], b"fo", b"foo2", b"FOO", b""].iter() {
            match resolve(&mut cache, 1, 3, name) {
                Err(Lab5Error::NotFound) => (),
                other => panic!("unexpected result {:?} for {:?}", other, name),
            }
        }
    }

    #[test]
    fn directories_without_data_or_entry_resolve_nothing() {
        let mut cache = cache();
        index::initialize(&mut cache, 3).unwrap();
        assert!(matches!(resolve(&mut cache, 1, 3, b"foo"), Err(Lab5Error::NotFound)));

        let mut cache = directory_with(None);
        assert!(matches!(resolve(&mut cache, 1, 3, b"foo"), Err(Lab5Error::NotFound)));
    }

    #[test]
    fn cleared_record_decodes_as_empty() {
        let mut block = vec![0; BLOCK_SIZE];
        DirRecord {
            name: b"foo".to_vec(),
            ino: 9,
        }
        .encode(&mut block)
        .unwrap();
        DirRecord::clear(&mut block);
        assert_eq!(DirRecord::decode(&block), None);
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(validate_name(b"").is_err());
        assert!(validate_name(b".").is_err());
        assert!(validate_name(b"..").is_err());
        assert!(validate_name(b"a/b").is_err());
        assert!(matches!(
            validate_name(&[b'x'; MAX_NAME_LEN + 1]),
            Err(Lab5Error::NameTooLong(_))
        ));
        assert!(validate_name(&[b'x'; MAX_NAME_LEN]).is_ok());
    }

    #[test]
    fn readdir_yields_self_then_parent_then_nothing() {
        let mut handle = DirHandle::new(7, 2);

        let entries: Vec<DirEntry> = handle.entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].name.as_str(), entries[0].ino, entries[0].offset), (".", 7, 0));
        assert_eq!((entries[1].name.as_str(), entries[1].ino, entries[1].offset), ("..", 2, 1));
        assert_eq!(handle.position(), 2);

        assert_eq!(handle.entries().next(), None);
        assert_eq!(handle.position(), 2);
    }

    #[test]
    fn readdir_resumes_from_the_cursor() {
        let mut handle = DirHandle::new(7, 2);
        assert_eq!(handle.entries().next().map(|e| e.name), Some(".".to_string()));
        assert_eq!(handle.position(), 1);

        let rest: Vec<DirEntry> = handle.entries().collect();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "..");
    }
}

//! On-disk layout of the file system's metadata structures.
//!
//! This module defines the exact binary layout used by the file system when
//! persisting and loading from disk. Every structure here is little-endian
//! and position-fixed, so a disk image written by one implementation is
//! readable by another.
//!
//! The inode occupies exactly one sector:
//!
//! ```text
//! offset  size  field
//!      0    48  direct[12]        sector ids, 0xFFFF_FFFF = unused
//!     48     4  indirect          sector id of a block of 128 sector ids
//!     52     4  double_indirect   sector id of a block of 128 indirect ids
//!     56     4  is_dir            0 = file, 1 = directory
//!     60     4  parent_dir        sector id of the parent directory
//!     64     4  length            file length in bytes
//!     68     4  magic             0x494E4F44
//!     72   440  padding           zero
//! ```

use minos::dev::SECTOR_SIZE;
use minos::fs::{RAW_UNUSED, Sector};
use num_enum::TryFromPrimitive;
use static_assertions::const_assert;

/// Identifies an inode.
pub const INODE_MAGIC: u32 = 0x494E4F44;

/// Number of direct block pointers in an inode.
pub const DIRECT_BLOCKS: usize = 12;

/// Number of sector ids held by one index block.
pub const PTRS_PER_SECTOR: usize = SECTOR_SIZE / 4;

/// Largest representable file, in bytes.
pub const MAX_FILE_LENGTH: usize =
    (DIRECT_BLOCKS + PTRS_PER_SECTOR + PTRS_PER_SECTOR * PTRS_PER_SECTOR) * SECTOR_SIZE;

const_assert!(PTRS_PER_SECTOR == 128);
const_assert!(MAX_FILE_LENGTH == (12 + 128 + 128 * 128) * 512);

/// What an inode represents.
///
/// The on-disk record keeps `is_dir` and `parent_dir` as separate words for
/// wire compatibility; in memory the two collapse into this sum type.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InodeKind {
    /// A regular file.
    File,
    /// A directory; `parent` is the directory containing it, `None` for the
    /// root.
    Dir {
        /// Inode sector of the containing directory.
        parent: Option<Sector>,
    },
}

#[derive(TryFromPrimitive)]
#[repr(u32)]
enum RawKind {
    File = 0,
    Dir = 1,
}

/// The decoded on-disk image of an inode.
#[derive(Debug, Clone)]
pub struct InodeDisk {
    /// Directly mapped data blocks.
    pub direct: [Option<Sector>; DIRECT_BLOCKS],
    /// Index block holding further data-block ids.
    pub indirect: Option<Sector>,
    /// Index block holding indirect-block ids.
    pub double_indirect: Option<Sector>,
    /// File or directory, with the parent directory for the latter.
    pub kind: InodeKind,
    /// File length in bytes.
    pub length: u32,
}

const OFF_INDIRECT: usize = DIRECT_BLOCKS * 4;
const OFF_DOUBLE: usize = OFF_INDIRECT + 4;
const OFF_IS_DIR: usize = OFF_DOUBLE + 4;
const OFF_PARENT: usize = OFF_IS_DIR + 4;
const OFF_LENGTH: usize = OFF_PARENT + 4;
const OFF_MAGIC: usize = OFF_LENGTH + 4;
const_assert!(OFF_MAGIC + 4 <= SECTOR_SIZE);

fn get_u32(buf: &[u8; SECTOR_SIZE], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn put_u32(buf: &mut [u8; SECTOR_SIZE], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

impl InodeDisk {
    /// Decodes an inode from its sector image.
    ///
    /// A magic mismatch means the sector does not hold an inode, which is a
    /// kernel bug, not a recoverable condition.
    pub fn decode(buf: &[u8; SECTOR_SIZE]) -> Self {
        assert_eq!(get_u32(buf, OFF_MAGIC), INODE_MAGIC, "inode magic mismatch");
        let mut direct = [None; DIRECT_BLOCKS];
        for (i, d) in direct.iter_mut().enumerate() {
            *d = Sector::from_raw(get_u32(buf, i * 4));
        }
        let kind = match RawKind::try_from(get_u32(buf, OFF_IS_DIR)) {
            Ok(RawKind::File) => InodeKind::File,
            Ok(RawKind::Dir) => InodeKind::Dir {
                parent: Sector::from_raw(get_u32(buf, OFF_PARENT)),
            },
            Err(_) => panic!("inode kind field corrupted"),
        };
        Self {
            direct,
            indirect: Sector::from_raw(get_u32(buf, OFF_INDIRECT)),
            double_indirect: Sector::from_raw(get_u32(buf, OFF_DOUBLE)),
            kind,
            length: get_u32(buf, OFF_LENGTH),
        }
    }

    /// Encodes the inode into a sector image.
    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, d) in self.direct.iter().enumerate() {
            put_u32(&mut buf, i * 4, Sector::into_raw(*d));
        }
        put_u32(&mut buf, OFF_INDIRECT, Sector::into_raw(self.indirect));
        put_u32(&mut buf, OFF_DOUBLE, Sector::into_raw(self.double_indirect));
        let (is_dir, parent) = match self.kind {
            InodeKind::File => (RawKind::File as u32, RAW_UNUSED),
            InodeKind::Dir { parent } => (RawKind::Dir as u32, Sector::into_raw(parent)),
        };
        put_u32(&mut buf, OFF_IS_DIR, is_dir);
        put_u32(&mut buf, OFF_PARENT, parent);
        put_u32(&mut buf, OFF_LENGTH, self.length);
        put_u32(&mut buf, OFF_MAGIC, INODE_MAGIC);
        buf
    }
}

/// Size of a single directory entry record.
pub const DIR_ENTRY_SIZE: usize = 32;

/// Longest representable entry name.
pub const NAME_MAX: usize = DIR_ENTRY_SIZE - 5;

const_assert!(SECTOR_SIZE % DIR_ENTRY_SIZE == 0);

/// A single directory entry record.
///
/// ```text
/// offset  size  field
///      0     4  inode sector id, 0xFFFF_FFFF = unused slot
///      4     1  name_len
///      5    27  name bytes, zero-padded
/// ```
#[derive(Debug, Clone)]
pub struct DirEntryDisk {
    /// The inode this entry refers to; `None` marks a reusable slot.
    pub inode: Option<Sector>,
    name_len: u8,
    name: [u8; NAME_MAX],
}

impl DirEntryDisk {
    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            inode: None,
            name_len: 0,
            name: [0; NAME_MAX],
        }
    }

    /// Constructs an entry from an inode sector and a name.
    ///
    /// Returns `None` if the name does not fit in the record.
    pub fn from_sector_name(sector: Sector, name: &str) -> Option<Self> {
        if name.is_empty() || name.len() > NAME_MAX {
            return None;
        }
        let mut out = Self {
            inode: Some(sector),
            name_len: name.len() as u8,
            name: [0; NAME_MAX],
        };
        out.name[..name.len()].copy_from_slice(name.as_bytes());
        Some(out)
    }

    /// The entry name, when the slot is in use and the bytes are valid
    /// UTF-8.
    pub fn name(&self) -> Option<&str> {
        self.inode
            .and_then(|_| core::str::from_utf8(&self.name[..self.name_len as usize]).ok())
    }

    /// Decodes one record.
    pub fn decode(buf: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut name = [0u8; NAME_MAX];
        name.copy_from_slice(&buf[5..]);
        Self {
            inode: Sector::from_raw(u32::from_le_bytes(buf[0..4].try_into().unwrap())),
            name_len: buf[4].min(NAME_MAX as u8),
            name,
        }
    }

    /// Encodes one record.
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&Sector::into_raw(self.inode).to_le_bytes());
        buf[4] = self.name_len;
        buf[5..].copy_from_slice(&self.name);
        buf
    }
}

//! Filesystem abstraction.
//!
//! The concrete file system lives in its own crate; this module defines the
//! sector addressing shared with the block layer, the traits a file system
//! implements, and the reference-counted handles the rest of the kernel
//! passes around. The virtual-memory core holds files only through these
//! handles, so it never links against the file-system crate.

use crate::KernelError;
use alloc::{string::String, sync::Arc, vec::Vec};

/// Sector, the access granularity of the disk.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Sector(pub u32);

/// On-disk sentinel for "no sector allocated".
pub const RAW_UNUSED: u32 = u32::MAX;

impl Sector {
    /// Decodes an on-disk sector id; [`RAW_UNUSED`] becomes `None`.
    #[inline]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == RAW_UNUSED { None } else { Some(Self(raw)) }
    }

    /// Encodes an optional sector id into its on-disk form.
    #[inline]
    pub const fn into_raw(sector: Option<Self>) -> u32 {
        match sector {
            Some(s) => s.0,
            None => RAW_UNUSED,
        }
    }

    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0 as usize
    }
}

impl core::ops::Add<u32> for Sector {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

/// Defines traits for file system operations.
pub mod traits {
    use super::{Directory as DirectoryHandle, File, Sector};
    use crate::KernelError;
    use alloc::{string::String, vec::Vec};

    /// Trait representing a filesystem.
    ///
    /// This trait provides access to the root directory of the filesystem,
    /// allowing operations on files and directories.
    pub trait FileSystem
    where
        Self: Sync + Send,
    {
        /// Retrieves the root directory of the filesystem.
        fn root(&self) -> Option<DirectoryHandle>;
    }

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports positioned read and
    /// write operations; handles are cursorless and offsets are explicit.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// The sector holding this file's inode, which doubles as its inode
        /// number.
        fn ino(&self) -> Sector;

        /// Returns the size of the file in bytes.
        fn len(&self) -> usize;

        /// Reads up to `buf.len()` bytes starting at byte offset `off`.
        ///
        /// Returns the number of bytes read, which is less than requested
        /// at end of file.
        fn read_at(&self, buf: &mut [u8], off: usize) -> Result<usize, KernelError>;

        /// Writes `buf` starting at byte offset `off`, growing the file as
        /// needed.
        ///
        /// Returns the number of bytes written, or `PermissionDenied` while
        /// writes are denied.
        fn write_at(&self, buf: &[u8], off: usize) -> Result<usize, KernelError>;

        /// Disables writes to the file. May be called at most once per
        /// opener.
        fn deny_write(&self);

        /// Re-enables writes. Must be called once for each `deny_write`.
        fn allow_write(&self);
    }

    /// Trait representing a directory in the filesystem.
    ///
    /// A directory contains entries that reference other files or
    /// directories.
    pub trait Directory
    where
        Self: Send + Sync,
    {
        /// The sector holding this directory's inode.
        fn ino(&self) -> Sector;

        /// Opens an entry by name. `.` and `..` resolve to the directory
        /// itself and its parent.
        fn open_entry(&self, entry: &str) -> Result<File, KernelError>;

        /// Creates an entry by name.
        fn create_entry(&self, entry: &str, is_dir: bool, len: usize) -> Result<File, KernelError>;

        /// Removes a directory entry by name, marking the inode for
        /// deferred release.
        fn remove_entry(&self, entry: &str) -> Result<(), KernelError>;

        /// Lists the names of all entries within the directory.
        fn list(&self) -> Result<Vec<String>, KernelError>;
    }
}

/// A handle to a regular file.
///
/// This struct provides a reference-counted handle to a file that supports
/// reading and writing at the kernel level. Cloning the handle reopens the
/// file.
#[derive(Clone)]
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Creates a new [`RegularFile`] handle from a given implementation of
    /// [`traits::RegularFile`].
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Inode sector of the file.
    #[inline]
    pub fn ino(&self) -> Sector {
        self.0.ino()
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the file is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.len() == 0
    }

    /// Reads up to `buf.len()` bytes at byte offset `off`.
    #[inline]
    pub fn read_at(&self, buf: &mut [u8], off: usize) -> Result<usize, KernelError> {
        self.0.read_at(buf, off)
    }

    /// Writes `buf` at byte offset `off`, growing the file as needed.
    #[inline]
    pub fn write_at(&self, buf: &[u8], off: usize) -> Result<usize, KernelError> {
        self.0.write_at(buf, off)
    }

    /// Denies writes to the file for the lifetime of the returned token.
    #[inline]
    pub fn deny_write(&self) -> WriteDenial {
        self.0.deny_write();
        WriteDenial { file: self.clone() }
    }
}

/// A token denying writes to a file.
///
/// Created by [`RegularFile::deny_write`]; writes are allowed again when
/// every outstanding token is dropped.
pub struct WriteDenial {
    file: RegularFile,
}

impl Drop for WriteDenial {
    fn drop(&mut self) {
        self.file.0.allow_write();
    }
}

/// A handle to a directory.
///
/// This struct represents a reference-counted directory that supports file
/// entry management, including opening, creating, and removing entries.
#[derive(Clone)]
pub struct Directory(pub Arc<dyn traits::Directory>);

impl Directory {
    /// Creates a new [`Directory`] handle from a given implementation of
    /// [`traits::Directory`].
    pub fn new(r: impl traits::Directory + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Inode sector of the directory.
    #[inline]
    pub fn ino(&self) -> Sector {
        self.0.ino()
    }

    /// Opens an entry by name.
    #[inline]
    pub fn open_entry(&self, entry: &str) -> Result<File, KernelError> {
        self.0.open_entry(entry)
    }

    /// Lists the names of all entries within the directory.
    #[inline]
    pub fn list(&self) -> Result<Vec<String>, KernelError> {
        self.0.list()
    }
}

/// Represents a file system entry, which can be either a regular file or a
/// directory.
#[derive(Clone)]
pub enum File {
    /// A regular file.
    RegularFile(RegularFile),
    /// A directory.
    Directory(Directory),
}

impl File {
    /// Converts the [`File`] into a [`RegularFile`], if it is one.
    pub fn into_regular_file(self) -> Option<RegularFile> {
        if let File::RegularFile(r) = self { Some(r) } else { None }
    }

    /// Converts the [`File`] into a [`Directory`], if it is one.
    pub fn into_directory(self) -> Option<Directory> {
        if let File::Directory(d) = self { Some(d) } else { None }
    }

    /// Get the inode sector of this [`File`] regardless of its inner type.
    pub fn ino(&self) -> Sector {
        match self {
            File::RegularFile(r) => r.ino(),
            File::Directory(d) => d.ino(),
        }
    }
}

//! File system objects.
//!
//! The objects handed out to the rest of the kernel: regular files and
//! directories over open inodes, implementing the `minos::fs` traits so
//! callers never see the inode layer directly.

use crate::FileSysInner;
use crate::dir::Dir;
use crate::disk_layout::InodeKind;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use minos::fs::{self, Sector};
use minos::KernelError;

/// A handle to a regular file in the filesystem.
pub struct RegularFile {
    pub(crate) inode: crate::inode::InodeHandle,
}

impl RegularFile {
    /// Wraps a file inode. Returns `None` for directory inodes.
    pub(crate) fn new(inode: crate::inode::InodeHandle) -> Option<Self> {
        if inode.is_dir() { None } else { Some(Self { inode }) }
    }
}

impl fs::traits::RegularFile for RegularFile {
    fn ino(&self) -> Sector {
        self.inode.sector()
    }

    fn len(&self) -> usize {
        self.inode.len()
    }

    fn read_at(&self, buf: &mut [u8], off: usize) -> Result<usize, KernelError> {
        Ok(self.inode.read_at(buf, off))
    }

    fn write_at(&self, buf: &[u8], off: usize) -> Result<usize, KernelError> {
        self.inode.write_at(buf, off)
    }

    fn deny_write(&self) {
        self.inode.deny_write();
    }

    fn allow_write(&self) {
        self.inode.allow_write();
    }
}

/// A handle to a directory in the filesystem.
pub struct Directory {
    pub(crate) fs: Weak<FileSysInner>,
    pub(crate) dir: Dir,
}

impl Directory {
    /// Wraps a directory inode. Returns `None` for file inodes.
    pub(crate) fn new(fs: Weak<FileSysInner>, inode: crate::inode::InodeHandle) -> Option<Self> {
        Dir::from_handle(inode).map(|dir| Self { fs, dir })
    }

    fn fs(&self) -> Arc<FileSysInner> {
        self.fs.upgrade().expect("file system is shut down")
    }

    // Wraps an inode into the public `File` enum.
    fn wrap(&self, handle: crate::inode::InodeHandle) -> fs::File {
        if handle.is_dir() {
            fs::File::Directory(fs::Directory::new(
                Directory::new(self.fs.clone(), handle).unwrap(),
            ))
        } else {
            fs::File::RegularFile(fs::RegularFile::new(RegularFile::new(handle).unwrap()))
        }
    }
}

impl fs::traits::Directory for Directory {
    fn ino(&self) -> Sector {
        self.dir.inode.sector()
    }

    fn open_entry(&self, entry: &str) -> Result<fs::File, KernelError> {
        let fs = self.fs();
        match entry {
            "." => {
                let handle = fs.open_inode(self.dir.inode.sector());
                Ok(self.wrap(handle))
            }
            ".." => {
                // The root's parent is the root itself.
                let parent = self.dir.inode.parent().unwrap_or(self.dir.inode.sector());
                let handle = fs.open_inode(parent);
                Ok(self.wrap(handle))
            }
            _ => {
                let sector = self.dir.lookup(entry).ok_or(KernelError::NotFound)?;
                let handle = fs.open_inode(sector);
                Ok(self.wrap(handle))
            }
        }
    }

    fn create_entry(&self, entry: &str, is_dir: bool, len: usize) -> Result<fs::File, KernelError> {
        let fs = self.fs();
        // No new entries inside a directory that is going away.
        if self.dir.inode.inode.is_removed() {
            return Err(KernelError::NotFound);
        }
        if self.dir.lookup(entry).is_some() {
            return Err(KernelError::AlreadyExists);
        }
        let sector = fs.free_map.allocate().ok_or(KernelError::NoSpace)?;
        let kind = if is_dir {
            InodeKind::Dir {
                parent: Some(self.dir.inode.sector()),
            }
        } else {
            InodeKind::File
        };
        if let Err(e) = fs.create_inode(sector, len, kind) {
            fs.release_sector(sector);
            return Err(e);
        }
        if let Err(e) = self.dir.add(entry, sector) {
            let handle = fs.open_inode(sector);
            handle.remove();
            drop(handle);
            return Err(e);
        }
        Ok(self.wrap(fs.open_inode(sector)))
    }

    fn remove_entry(&self, entry: &str) -> Result<(), KernelError> {
        let fs = self.fs();
        let sector = self.dir.lookup(entry).ok_or(KernelError::NotFound)?;
        let handle = fs.open_inode(sector);
        if handle.is_dir() {
            let dir = Dir::from_handle(handle.clone()).unwrap();
            if !dir.is_empty() {
                return Err(KernelError::InvalidArgument);
            }
        }
        self.dir.erase(entry)?;
        handle.remove();
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, KernelError> {
        Ok(self.dir.names())
    }
}

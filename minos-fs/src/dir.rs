//! Directory contents.
//!
//! A directory is an inode whose data is an array of fixed-size entry
//! records mapping names to inode sectors. Entries are manipulated through
//! the ordinary inode read/write path, so directory updates enjoy the same
//! buffer-cache semantics as file data. `.` and `..` are not stored as
//! records; the parent link lives in the inode itself.

use crate::disk_layout::{DIR_ENTRY_SIZE, DirEntryDisk};
use crate::inode::InodeHandle;
use alloc::{string::String, vec::Vec};
use minos::KernelError;
use minos::fs::Sector;

/// Entry-level operations over a directory inode.
pub struct Dir {
    pub(crate) inode: InodeHandle,
}

impl Dir {
    /// Wraps a directory inode. Returns `None` for file inodes.
    pub fn from_handle(inode: InodeHandle) -> Option<Self> {
        if inode.is_dir() { Some(Self { inode }) } else { None }
    }

    fn entry_at(&self, slot: usize) -> Option<DirEntryDisk> {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        let got = self.inode.read_at(&mut raw, slot * DIR_ENTRY_SIZE);
        if got < DIR_ENTRY_SIZE {
            return None;
        }
        Some(DirEntryDisk::decode(&raw))
    }

    fn put_entry(&self, slot: usize, entry: &DirEntryDisk) -> Result<(), KernelError> {
        let raw = entry.encode();
        let n = self.inode.write_at(&raw, slot * DIR_ENTRY_SIZE)?;
        if n != DIR_ENTRY_SIZE {
            return Err(KernelError::NoSpace);
        }
        Ok(())
    }

    fn slots(&self) -> usize {
        self.inode.len() / DIR_ENTRY_SIZE
    }

    /// Looks a name up, returning the inode sector it refers to.
    pub fn lookup(&self, name: &str) -> Option<Sector> {
        for slot in 0..self.slots() {
            let entry = self.entry_at(slot)?;
            if entry.name() == Some(name) {
                return entry.inode;
            }
        }
        None
    }

    /// Adds an entry mapping `name` to `sector`.
    ///
    /// Reuses a free slot when one exists, otherwise appends, growing the
    /// directory file.
    pub fn add(&self, name: &str, sector: Sector) -> Result<(), KernelError> {
        if self.lookup(name).is_some() {
            return Err(KernelError::AlreadyExists);
        }
        let entry =
            DirEntryDisk::from_sector_name(sector, name).ok_or(KernelError::InvalidArgument)?;
        for slot in 0..self.slots() {
            if self.entry_at(slot).is_some_and(|e| e.inode.is_none()) {
                return self.put_entry(slot, &entry);
            }
        }
        self.put_entry(self.slots(), &entry)
    }

    /// Removes the entry for `name`, returning the inode sector it
    /// referred to.
    pub fn erase(&self, name: &str) -> Result<Sector, KernelError> {
        for slot in 0..self.slots() {
            if let Some(entry) = self.entry_at(slot) {
                if entry.name() == Some(name) {
                    let sector = entry.inode.unwrap();
                    self.put_entry(slot, &DirEntryDisk::empty())?;
                    return Ok(sector);
                }
            }
        }
        Err(KernelError::NotFound)
    }

    /// Names of all live entries, in slot order.
    pub fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        for slot in 0..self.slots() {
            if let Some(entry) = self.entry_at(slot) {
                if let Some(name) = entry.name() {
                    out.push(String::from(name));
                }
            }
        }
        out
    }

    /// Whether the directory holds no live entries.
    pub fn is_empty(&self) -> bool {
        for slot in 0..self.slots() {
            if self.entry_at(slot).is_some_and(|e| e.inode.is_some()) {
                return false;
            }
        }
        true
    }
}

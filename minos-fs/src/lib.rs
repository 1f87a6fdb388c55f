//! File system of MinOS.
//!
//! The stack, bottom up:
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ FileSys                       │
//! │ - path resolution façade      │
//! ├───────────────────────────────┤
//! │ fs_objects / dir              │
//! │ - files, directories, entries │
//! ├───────────────────────────────┤
//! │ inode                         │
//! │ - multilevel block index      │
//! ├───────────────────────────────┤
//! │ cache                         │
//! │ - write-back sector cache     │
//! ├───────────────────────────────┤
//! │ minos::dev::Disk              │
//! └───────────────────────────────┘
//! ```
//!
//! On-disk, sector 0 holds the free map's inode and sector 1 the root
//! directory's inode; every other sector is handed out by the free map.
//! Durability is provided by the buffer cache: data reaches the device on
//! periodic flushes and at [`FileSys::shutdown`].

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

#[macro_use]
extern crate minos;

pub mod cache;
pub mod dir;
pub mod disk_layout;
pub mod free_map;
pub mod fs_objects;
pub mod inode;

use alloc::collections::btree_map::{BTreeMap, Entry};
use alloc::sync::{Arc, Weak};
use alloc::vec;
use cache::BufferCache;
use core::sync::atomic::Ordering;
use core::time::Duration;
use disk_layout::InodeKind;
use free_map::{FREE_MAP_SECTOR, FreeMap, ROOT_DIR_SECTOR};
use inode::{Inode, InodeHandle, InodeState};
use minos::KernelError;
use minos::dev::Disk;
use minos::fs::{self, Sector};
use minos::sync::SpinLock;

/// Internal state of a mounted file system.
///
/// Shared by every open handle through an [`Arc`]; handles keep [`Weak`]
/// back-references so closing can run against the live registry.
pub struct FileSysInner {
    /// The write-back cache in front of the file-system disk.
    pub cache: BufferCache,
    /// Allocator of individual disk sectors.
    pub free_map: FreeMap,
    /// Registry of open inodes, keyed by inode sector.
    pub inodes: SpinLock<BTreeMap<u32, Arc<Inode>>>,
    // Serialises path-level operations of the façade.
    lock: SpinLock<()>,
    me: Weak<FileSysInner>,
}

impl FileSysInner {
    /// Releases a sector back to the free map, discarding any cached copy
    /// of its old contents.
    pub(crate) fn release_sector(&self, sector: Sector) {
        self.free_map.release(sector);
        self.cache.evict(sector);
    }

    /// Opens the inode at `sector`, returning the registry-shared object.
    pub fn open_inode(&self, sector: Sector) -> InodeHandle {
        // Read the image outside the registry lock; the registry is a leaf
        // in the lock order. The read is discarded on a racing open.
        let fresh = Inode::from_disk(self, sector);
        let mut registry = self.inodes.lock();
        let inode = match registry.entry(sector.0) {
            Entry::Occupied(en) => {
                en.get().open_count.fetch_add(1, Ordering::SeqCst);
                en.get().clone()
            }
            Entry::Vacant(en) => {
                let inode = Arc::new(fresh);
                inode.open_count.store(1, Ordering::SeqCst);
                en.insert(inode.clone());
                inode
            }
        };
        registry.unlock();
        InodeHandle {
            inode,
            fs: self.me.clone(),
        }
    }

    /// Closes one reference to `inode`. The last close removes it from the
    /// registry, then either releases the inode and its blocks (when
    /// removed) or persists the on-disk copy.
    pub(crate) fn close_inode(&self, inode: &Arc<Inode>) {
        let mut registry = self.inodes.lock();
        if inode.open_count.fetch_sub(1, Ordering::SeqCst) != 1 {
            registry.unlock();
            return;
        }
        registry.remove(&inode.sector().0);
        registry.unlock();

        if inode.is_removed() {
            let state = inode.state.read();
            Inode::release_blocks(self, &state);
            drop(state);
            self.release_sector(inode.sector());
        } else {
            inode.persist(self);
        }
    }

    /// Writes a fresh inode at `sector` with `length` bytes of eagerly
    /// allocated, zeroed data.
    ///
    /// On allocation failure every block allocated so far is released and
    /// the inode is not persisted.
    pub fn create_inode(
        &self,
        sector: Sector,
        length: usize,
        kind: InodeKind,
    ) -> Result<(), KernelError> {
        let mut state = InodeState::new(kind, length);
        for idx in 0..inode::bytes_to_sectors(length) {
            if let Err(e) = Inode::ensure_block(&mut state, self, idx) {
                state.length = idx * minos::dev::SECTOR_SIZE;
                Inode::release_blocks(self, &state);
                return Err(e);
            }
        }
        let image = Inode::new(sector, state);
        image.persist(self);
        Ok(())
    }

    /// Opens the root directory.
    pub fn root_dir(&self) -> fs::Directory {
        let handle = self.open_inode(ROOT_DIR_SECTOR);
        fs::Directory::new(fs_objects::Directory::new(self.me.clone(), handle).unwrap())
    }

    fn start_dir(&self, path: &str, cwd: Option<&fs::Directory>) -> fs::Directory {
        match cwd {
            Some(dir) if !path.starts_with('/') => dir.clone(),
            _ => self.root_dir(),
        }
    }

    // Walks `path` to the object it names.
    fn walk(&self, path: &str, cwd: Option<&fs::Directory>) -> Result<fs::File, KernelError> {
        let mut cur = fs::File::Directory(self.start_dir(path, cwd));
        for part in path.split('/').filter(|s| !s.is_empty()) {
            match cur {
                fs::File::Directory(dir) => cur = dir.open_entry(part)?,
                fs::File::RegularFile(_) => return Err(KernelError::NotDirectory),
            }
        }
        Ok(cur)
    }

    // Walks all but the final component, returning the parent directory
    // and the final name.
    fn resolve_parent<'p>(
        &self,
        path: &'p str,
        cwd: Option<&fs::Directory>,
    ) -> Result<(fs::Directory, &'p str), KernelError> {
        let mut parts: alloc::vec::Vec<&str> =
            path.split('/').filter(|s| !s.is_empty()).collect();
        let last = parts.pop().ok_or(KernelError::InvalidArgument)?;
        let mut dir = self.start_dir(path, cwd);
        for part in parts {
            dir = dir
                .open_entry(part)?
                .into_directory()
                .ok_or(KernelError::NotDirectory)?;
        }
        Ok((dir, last))
    }

    fn store_free_map(&self) {
        let handle = self.open_inode(FREE_MAP_SECTOR);
        let bytes = self.free_map.to_bytes();
        handle
            .write_at(&bytes, 0)
            .expect("free map write must not fail");
    }

    fn load_free_map(&self) {
        let handle = self.open_inode(FREE_MAP_SECTOR);
        let mut bytes = vec![0u8; self.free_map.byte_len()];
        let got = handle.read_at(&mut bytes, 0);
        assert_eq!(got, bytes.len(), "free map file truncated");
        self.free_map.restore(&bytes);
    }

    fn do_format(&self) -> Result<(), KernelError> {
        println!("Formatting file system...");
        self.free_map.mark(FREE_MAP_SECTOR);
        self.free_map.mark(ROOT_DIR_SECTOR);
        self.create_inode(FREE_MAP_SECTOR, self.free_map.byte_len(), InodeKind::File)?;
        self.create_inode(ROOT_DIR_SECTOR, 0, InodeKind::Dir { parent: None })?;
        self.store_free_map();
        println!("done.");
        Ok(())
    }
}

/// A mounted file system.
#[derive(Clone)]
pub struct FileSys(pub Arc<FileSysInner>);

impl FileSys {
    /// Mounts the file system on `disk`, formatting it first when `format`
    /// is set.
    pub fn open_disk(disk: Disk, format: bool) -> Result<Self, KernelError> {
        let sectors = disk.size_in_sectors();
        let inner = Arc::new_cyclic(|me| FileSysInner {
            cache: BufferCache::new(disk),
            free_map: FreeMap::new(sectors),
            inodes: SpinLock::new(BTreeMap::new()),
            lock: SpinLock::new(()),
            me: me.clone(),
        });
        if format {
            inner.do_format()?;
        } else {
            inner.load_free_map();
        }
        info!(
            "[FS] mounted: {} sectors, {} in use",
            sectors,
            inner.free_map.used()
        );
        Ok(Self(inner))
    }

    /// Opens the root directory.
    pub fn root(&self) -> fs::Directory {
        self.0.root_dir()
    }

    /// Opens the object `path` names, relative to `cwd` unless absolute.
    pub fn open(
        &self,
        path: &str,
        cwd: Option<&fs::Directory>,
    ) -> Result<fs::File, KernelError> {
        let guard = self.0.lock.lock();
        let r = self.0.walk(path, cwd);
        guard.unlock();
        r
    }

    /// Creates a regular file of `initial_size` zeroed bytes at `path`.
    pub fn create_file(
        &self,
        path: &str,
        initial_size: usize,
        cwd: Option<&fs::Directory>,
    ) -> Result<fs::File, KernelError> {
        let guard = self.0.lock.lock();
        let r = self
            .0
            .resolve_parent(path, cwd)
            .and_then(|(dir, name)| dir.0.create_entry(name, false, initial_size));
        guard.unlock();
        r
    }

    /// Creates a directory at `path`.
    pub fn create_dir(
        &self,
        path: &str,
        cwd: Option<&fs::Directory>,
    ) -> Result<fs::File, KernelError> {
        let guard = self.0.lock.lock();
        let r = self
            .0
            .resolve_parent(path, cwd)
            .and_then(|(dir, name)| dir.0.create_entry(name, true, 0));
        guard.unlock();
        r
    }

    /// Removes the object `path` names. Directories must be empty. The
    /// inode is released once the last opener closes it.
    pub fn remove(&self, path: &str, cwd: Option<&fs::Directory>) -> Result<(), KernelError> {
        let guard = self.0.lock.lock();
        let r = self
            .0
            .resolve_parent(path, cwd)
            .and_then(|(dir, name)| dir.0.remove_entry(name));
        guard.unlock();
        r
    }

    /// Persists the free map and flushes every unwritten byte to disk.
    ///
    /// After shutdown the file system must not be used.
    pub fn shutdown(&self) {
        self.0.store_free_map();
        self.0.cache.shutdown();
    }

    /// Runs the periodic flush loop until shutdown; see
    /// [`BufferCache::run_flush_daemon`].
    pub fn run_flush_daemon(&self, park: impl FnMut(Duration)) {
        self.0.cache.run_flush_daemon(park);
    }
}

impl fs::traits::FileSystem for FileSys {
    fn root(&self) -> Option<fs::Directory> {
        Some(self.0.root_dir())
    }
}

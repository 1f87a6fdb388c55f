//! Inode layer.
//!
//! An inode maps a file's byte range onto disk sectors through a three-way
//! index: twelve direct pointers, one indirect block of 128 pointers, and
//! one double-indirect block of 128 indirect blocks. Blocks materialise
//! lazily: writing past the end of a file extends its length and allocates
//! whatever intermediate index blocks the new position needs, which is also
//! how file growth works. Reading a hole allocates nothing and returns
//! zeros.
//!
//! Every open inode lives in a registry keyed by its sector, so opening the
//! same inode twice yields the same object. [`InodeHandle`] is the
//! reference-counted view: cloning it reopens the inode, dropping it closes
//! it, and the last close either persists the on-disk copy or, when the
//! inode was removed, releases the inode sector and all of its blocks.
//!
//! All index- and data-block I/O goes through the buffer cache.

use crate::FileSysInner;
use crate::disk_layout::{DIRECT_BLOCKS, InodeDisk, InodeKind, MAX_FILE_LENGTH, PTRS_PER_SECTOR};
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use minos::KernelError;
use minos::dev::SECTOR_SIZE;
use minos::fs::{RAW_UNUSED, Sector};
use minos::sync::RwLock;

/// Returns the number of sectors needed to hold `len` bytes.
#[inline]
pub fn bytes_to_sectors(len: usize) -> usize {
    len.div_ceil(SECTOR_SIZE)
}

/// Mutable part of an in-memory inode, mirroring its on-disk copy.
pub struct InodeState {
    /// File or directory.
    pub kind: InodeKind,
    /// Length in bytes.
    pub length: usize,
    direct: [Option<Sector>; DIRECT_BLOCKS],
    indirect: Option<Sector>,
    double_indirect: Option<Sector>,
}

impl InodeState {
    pub(crate) fn new(kind: InodeKind, length: usize) -> Self {
        Self {
            kind,
            length,
            direct: [None; DIRECT_BLOCKS],
            indirect: None,
            double_indirect: None,
        }
    }

    fn from_disk(image: &InodeDisk) -> Self {
        Self {
            kind: image.kind,
            length: image.length as usize,
            direct: image.direct,
            indirect: image.indirect,
            double_indirect: image.double_indirect,
        }
    }

    fn to_disk(&self) -> InodeDisk {
        InodeDisk {
            direct: self.direct,
            indirect: self.indirect,
            double_indirect: self.double_indirect,
            kind: self.kind,
            length: self.length as u32,
        }
    }
}

/// An in-memory inode.
///
/// At most one of these exists per sector; the registry in
/// [`FileSysInner`] enforces it.
pub struct Inode {
    sector: Sector,
    pub(crate) state: RwLock<InodeState>,
    pub(crate) open_count: AtomicUsize,
    deny_write: AtomicUsize,
    removed: AtomicBool,
}

// Reads one pointer slot out of an index block.
fn read_slot(fs: &FileSysInner, index: Sector, slot: usize) -> Option<Sector> {
    debug_assert!(slot < PTRS_PER_SECTOR);
    let mut raw = [0u8; 4];
    fs.cache.read(index, slot * 4, &mut raw);
    Sector::from_raw(u32::from_le_bytes(raw))
}

// Stores one pointer slot into an index block.
fn write_slot(fs: &FileSysInner, index: Sector, slot: usize, value: Sector) {
    debug_assert!(slot < PTRS_PER_SECTOR);
    fs.cache.write(index, slot * 4, &value.0.to_le_bytes());
}

// Allocates a data block and zeroes it through the cache.
fn allocate_data(fs: &FileSysInner) -> Result<Sector, KernelError> {
    let sector = fs.free_map.allocate().ok_or(KernelError::NoSpace)?;
    fs.cache.write(sector, 0, &[0u8; SECTOR_SIZE]);
    Ok(sector)
}

// Allocates an index block and fills every slot with the unused sentinel.
fn allocate_index(fs: &FileSysInner) -> Result<Sector, KernelError> {
    let sector = fs.free_map.allocate().ok_or(KernelError::NoSpace)?;
    let mut unused = [0u8; SECTOR_SIZE];
    for chunk in unused.chunks_exact_mut(4) {
        chunk.copy_from_slice(&RAW_UNUSED.to_le_bytes());
    }
    fs.cache.write(sector, 0, &unused);
    Ok(sector)
}

impl Inode {
    pub(crate) fn new(sector: Sector, state: InodeState) -> Self {
        Self {
            sector,
            state: RwLock::new(state),
            open_count: AtomicUsize::new(0),
            deny_write: AtomicUsize::new(0),
            removed: AtomicBool::new(false),
        }
    }

    /// Reads the inode image at `sector` through the cache.
    pub(crate) fn from_disk(fs: &FileSysInner, sector: Sector) -> Self {
        let mut buf = [0u8; SECTOR_SIZE];
        fs.cache.read(sector, 0, &mut buf);
        Self::new(sector, InodeState::from_disk(&InodeDisk::decode(&buf)))
    }

    /// The sector holding this inode, which doubles as its inode number.
    #[inline]
    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Marks the inode to be deleted when the last opener closes it.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    /// Whether the inode is marked for deferred deletion.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Disables writes. May be called at most once per opener.
    pub fn deny_write(&self) {
        let denied = self.deny_write.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(denied <= self.open_count.load(Ordering::SeqCst));
    }

    /// Re-enables writes. Must be called once for each `deny_write`.
    pub fn allow_write(&self) {
        let prev = self.deny_write.fetch_sub(1, Ordering::SeqCst);
        assert!(prev >= 1);
    }

    /// Whether writes are currently denied.
    pub fn writes_denied(&self) -> bool {
        self.deny_write.load(Ordering::SeqCst) > 0
    }

    /// Writes the on-disk copy back through the cache.
    pub(crate) fn persist(&self, fs: &FileSysInner) {
        let state = self.state.read();
        let image = state.to_disk().encode();
        drop(state);
        fs.cache.write(self.sector, 0, &image);
    }

    /// Finds the data sector holding logical block `idx`, without
    /// allocating. `None` means the block is a hole.
    pub(crate) fn lookup_block(
        state: &InodeState,
        fs: &FileSysInner,
        idx: usize,
    ) -> Option<Sector> {
        assert!(idx < bytes_to_sectors(MAX_FILE_LENGTH), "block index out of range");
        if idx < DIRECT_BLOCKS {
            state.direct[idx]
        } else if idx < DIRECT_BLOCKS + PTRS_PER_SECTOR {
            let indirect = state.indirect?;
            read_slot(fs, indirect, idx - DIRECT_BLOCKS)
        } else {
            let rel = idx - DIRECT_BLOCKS - PTRS_PER_SECTOR;
            let (ioff, doff) = (rel / PTRS_PER_SECTOR, rel % PTRS_PER_SECTOR);
            let double = state.double_indirect?;
            let indirect = read_slot(fs, double, ioff)?;
            read_slot(fs, indirect, doff)
        }
    }

    /// Returns the data sector holding logical block `idx`, allocating it
    /// and any missing index blocks on the way.
    ///
    /// On allocation failure nothing new remains allocated.
    pub(crate) fn ensure_block(
        state: &mut InodeState,
        fs: &FileSysInner,
        idx: usize,
    ) -> Result<Sector, KernelError> {
        assert!(idx < bytes_to_sectors(MAX_FILE_LENGTH), "block index out of range");
        if idx < DIRECT_BLOCKS {
            if let Some(sector) = state.direct[idx] {
                return Ok(sector);
            }
            let sector = allocate_data(fs)?;
            state.direct[idx] = Some(sector);
            Ok(sector)
        } else if idx < DIRECT_BLOCKS + PTRS_PER_SECTOR {
            let (indirect, fresh) = match state.indirect {
                Some(s) => (s, false),
                None => (allocate_index(fs)?, true),
            };
            let slot = idx - DIRECT_BLOCKS;
            let existing = if fresh { None } else { read_slot(fs, indirect, slot) };
            match existing {
                Some(sector) => Ok(sector),
                None => match allocate_data(fs) {
                    Ok(sector) => {
                        write_slot(fs, indirect, slot, sector);
                        state.indirect = Some(indirect);
                        Ok(sector)
                    }
                    Err(e) => {
                        if fresh {
                            fs.release_sector(indirect);
                        }
                        Err(e)
                    }
                },
            }
        } else {
            let rel = idx - DIRECT_BLOCKS - PTRS_PER_SECTOR;
            let (ioff, doff) = (rel / PTRS_PER_SECTOR, rel % PTRS_PER_SECTOR);
            let (double, double_fresh) = match state.double_indirect {
                Some(s) => (s, false),
                None => (allocate_index(fs)?, true),
            };
            let existing_indirect = if double_fresh {
                None
            } else {
                read_slot(fs, double, ioff)
            };
            let (indirect, indirect_fresh) = match existing_indirect {
                Some(s) => (s, false),
                None => match allocate_index(fs) {
                    Ok(s) => (s, true),
                    Err(e) => {
                        if double_fresh {
                            fs.release_sector(double);
                        }
                        return Err(e);
                    }
                },
            };
            let existing = if indirect_fresh {
                None
            } else {
                read_slot(fs, indirect, doff)
            };
            match existing {
                Some(sector) => Ok(sector),
                None => match allocate_data(fs) {
                    Ok(sector) => {
                        write_slot(fs, indirect, doff, sector);
                        if indirect_fresh {
                            write_slot(fs, double, ioff, indirect);
                        }
                        state.double_indirect = Some(double);
                        Ok(sector)
                    }
                    Err(e) => {
                        if indirect_fresh {
                            fs.release_sector(indirect);
                        }
                        if double_fresh {
                            fs.release_sector(double);
                        }
                        Err(e)
                    }
                },
            }
        }
    }

    /// Reads up to `buf.len()` bytes starting at `off`, bounded by the file
    /// length. Returns the number of bytes read.
    pub fn read_at(&self, fs: &FileSysInner, buf: &mut [u8], off: usize) -> usize {
        let state = self.state.read();
        let mut read = 0;
        let mut off = off;
        while read < buf.len() {
            let inode_left = state.length.saturating_sub(off);
            let sector_ofs = off % SECTOR_SIZE;
            let chunk = (buf.len() - read)
                .min(SECTOR_SIZE - sector_ofs)
                .min(inode_left);
            if chunk == 0 {
                break;
            }
            match Self::lookup_block(&state, fs, off / SECTOR_SIZE) {
                Some(sector) => fs.cache.read(sector, sector_ofs, &mut buf[read..read + chunk]),
                None => buf[read..read + chunk].fill(0),
            }
            read += chunk;
            off += chunk;
        }
        read
    }

    /// Writes `buf` starting at `off`, extending the file as needed.
    ///
    /// Returns the number of bytes written, which is less than requested
    /// only when the disk fills up mid-write. Fails with
    /// `PermissionDenied` while writes are denied.
    pub fn write_at(
        &self,
        fs: &FileSysInner,
        buf: &[u8],
        off: usize,
    ) -> Result<usize, KernelError> {
        if self.writes_denied() {
            return Err(KernelError::PermissionDenied);
        }
        if off + buf.len() > MAX_FILE_LENGTH {
            return Err(KernelError::NoSpace);
        }
        let mut state = self.state.write();
        if state.length < off + buf.len() {
            state.length = off + buf.len();
        }
        let mut written = 0;
        let mut off = off;
        while written < buf.len() {
            let sector_ofs = off % SECTOR_SIZE;
            let chunk = (buf.len() - written).min(SECTOR_SIZE - sector_ofs);
            let sector = match Self::ensure_block(&mut state, fs, off / SECTOR_SIZE) {
                Ok(s) => s,
                Err(_) => break,
            };
            fs.cache.write(sector, sector_ofs, &buf[written..written + chunk]);
            written += chunk;
            off += chunk;
        }
        Ok(written)
    }

    /// Releases every data and index block reachable from `state`, walking
    /// the logical blocks from last to first so each index block is freed
    /// at its lowest referent.
    pub(crate) fn release_blocks(fs: &FileSysInner, state: &InodeState) {
        let sectors = bytes_to_sectors(state.length);
        for pos in (0..sectors).rev() {
            if pos < DIRECT_BLOCKS {
                if let Some(sector) = state.direct[pos] {
                    fs.release_sector(sector);
                }
            } else if pos < DIRECT_BLOCKS + PTRS_PER_SECTOR {
                let doff = pos - DIRECT_BLOCKS;
                if let Some(indirect) = state.indirect {
                    if let Some(sector) = read_slot(fs, indirect, doff) {
                        fs.release_sector(sector);
                    }
                    if doff == 0 {
                        fs.release_sector(indirect);
                    }
                }
            } else {
                let rel = pos - DIRECT_BLOCKS - PTRS_PER_SECTOR;
                let (ioff, doff) = (rel / PTRS_PER_SECTOR, rel % PTRS_PER_SECTOR);
                if let Some(double) = state.double_indirect {
                    if let Some(indirect) = read_slot(fs, double, ioff) {
                        if let Some(sector) = read_slot(fs, indirect, doff) {
                            fs.release_sector(sector);
                        }
                        if doff == 0 {
                            fs.release_sector(indirect);
                        }
                    }
                    if ioff == 0 && doff == 0 {
                        fs.release_sector(double);
                    }
                }
            }
        }
    }
}

/// A reference-counted view of an open inode.
///
/// Cloning reopens the inode; dropping closes it. The handle keeps a weak
/// back-reference to the file system so the last drop can run the close
/// protocol.
pub struct InodeHandle {
    pub(crate) inode: Arc<Inode>,
    pub(crate) fs: Weak<FileSysInner>,
}

impl InodeHandle {
    pub(crate) fn fs(&self) -> Arc<FileSysInner> {
        self.fs.upgrade().expect("file system is shut down")
    }

    /// The inode sector.
    #[inline]
    pub fn sector(&self) -> Sector {
        self.inode.sector()
    }

    /// Current file length in bytes.
    pub fn len(&self) -> usize {
        self.inode.state.read().length
    }

    /// Whether the file holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the inode is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self.inode.state.read().kind, InodeKind::Dir { .. })
    }

    /// Parent directory sector, for directories.
    pub fn parent(&self) -> Option<Sector> {
        match self.inode.state.read().kind {
            InodeKind::Dir { parent } => parent,
            InodeKind::File => None,
        }
    }

    /// See [`Inode::read_at`].
    pub fn read_at(&self, buf: &mut [u8], off: usize) -> usize {
        self.inode.read_at(&self.fs(), buf, off)
    }

    /// See [`Inode::write_at`].
    pub fn write_at(&self, buf: &[u8], off: usize) -> Result<usize, KernelError> {
        self.inode.write_at(&self.fs(), buf, off)
    }

    /// Marks the inode for deletion once every opener has closed it.
    pub fn remove(&self) {
        self.inode.remove();
    }

    /// See [`Inode::deny_write`].
    pub fn deny_write(&self) {
        self.inode.deny_write();
    }

    /// See [`Inode::allow_write`].
    pub fn allow_write(&self) {
        self.inode.allow_write();
    }
}

impl Clone for InodeHandle {
    fn clone(&self) -> Self {
        self.inode.open_count.fetch_add(1, Ordering::SeqCst);
        Self {
            inode: self.inode.clone(),
            fs: self.fs.clone(),
        }
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        if let Some(fs) = self.fs.upgrade() {
            fs.close_inode(&self.inode);
        }
    }
}

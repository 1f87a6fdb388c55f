//! Free-sector map.
//!
//! One bit per disk sector; the map itself is persisted in a file whose
//! inode lives at [`FREE_MAP_SECTOR`]. The façade loads the bits at mount
//! and writes them back at shutdown.

use minos::fs::Sector;
use minos::sync::SpinLock;
use minos::util::Bitmap;

/// Sector of the free map's own inode.
pub const FREE_MAP_SECTOR: Sector = Sector(0);

/// Sector of the root directory's inode.
pub const ROOT_DIR_SECTOR: Sector = Sector(1);

/// Allocator of individual disk sectors.
pub struct FreeMap {
    inner: SpinLock<Bitmap>,
}

impl FreeMap {
    /// Creates a map for a disk of `sectors` sectors, all free.
    pub fn new(sectors: usize) -> Self {
        Self {
            inner: SpinLock::new(Bitmap::new(sectors)),
        }
    }

    /// Allocates one sector, or `None` when the disk is full.
    pub fn allocate(&self) -> Option<Sector> {
        let mut guard = self.inner.lock();
        let got = guard.scan_and_flip();
        guard.unlock();
        got.map(|idx| Sector(idx as u32))
    }

    /// Releases a previously allocated sector.
    pub fn release(&self, sector: Sector) {
        let mut guard = self.inner.lock();
        guard.reset(sector.into_usize());
        guard.unlock();
    }

    /// Marks a sector as allocated without scanning, used while formatting
    /// for the reserved inode sectors.
    pub fn mark(&self, sector: Sector) {
        let mut guard = self.inner.lock();
        guard.mark(sector.into_usize());
        guard.unlock();
    }

    /// Number of allocated sectors.
    pub fn used(&self) -> usize {
        let guard = self.inner.lock();
        let n = guard.count_marked();
        guard.unlock();
        n
    }

    /// Whether `sector` is currently allocated.
    pub fn is_used(&self, sector: Sector) -> bool {
        let guard = self.inner.lock();
        let r = guard.test(sector.into_usize());
        guard.unlock();
        r
    }

    /// Size of the serialized map, in bytes.
    pub fn byte_len(&self) -> usize {
        let guard = self.inner.lock();
        let n = guard.byte_len();
        guard.unlock();
        n
    }

    /// Serializes the map for persistence.
    pub fn to_bytes(&self) -> alloc::vec::Vec<u8> {
        let guard = self.inner.lock();
        let bytes = guard.to_bytes();
        guard.unlock();
        bytes
    }

    /// Restores the map from its persisted form.
    pub fn restore(&self, bytes: &[u8]) {
        let mut guard = self.inner.lock();
        guard.restore(bytes);
        guard.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_release_cycle() {
        let map = FreeMap::new(8);
        map.mark(FREE_MAP_SECTOR);
        map.mark(ROOT_DIR_SECTOR);
        assert_eq!(map.allocate(), Some(Sector(2)));
        assert_eq!(map.allocate(), Some(Sector(3)));
        map.release(Sector(2));
        assert_eq!(map.allocate(), Some(Sector(2)));
        assert_eq!(map.used(), 4);
    }

    #[test]
    fn exhaustion_returns_none() {
        let map = FreeMap::new(2);
        assert!(map.allocate().is_some());
        assert!(map.allocate().is_some());
        assert_eq!(map.allocate(), None);
    }
}

//! Swap area.
//!
//! The swap device is carved into page-sized slots of [`PAGE_SECTORS`]
//! contiguous sectors. A bitmap tracks which slots hold an evicted page;
//! a dedicated lock makes each operation atomic, including its device I/O.

use crate::PAGE_SECTORS;
use minos::addressing::PAGE_SIZE;
use minos::dev::{Disk, SECTOR_SIZE};
use minos::fs::Sector;
use minos::sync::SpinLock;
use minos::util::Bitmap;

/// Page-sized slot allocator over the swap device.
pub struct SwapArea {
    disk: Disk,
    map: SpinLock<Bitmap>,
}

impl SwapArea {
    /// Creates the swap area over `disk`, with one slot per
    /// [`PAGE_SECTORS`] sectors of capacity.
    pub fn new(disk: Disk) -> Self {
        let slots = disk.size_in_sectors() / PAGE_SECTORS;
        Self {
            disk,
            map: SpinLock::new(Bitmap::new(slots)),
        }
    }

    /// Writes a page out to a free slot and returns its starting sector.
    ///
    /// Panics when the swap device is full.
    pub fn swap_out(&self, frame: &[u8; PAGE_SIZE]) -> Sector {
        let mut guard = self.map.lock();
        let slot = match guard.scan_and_flip() {
            Some(slot) => slot,
            None => {
                guard.unlock();
                panic!("swap exhausted");
            }
        };
        let start = slot * PAGE_SECTORS;
        for i in 0..PAGE_SECTORS {
            let chunk: &[u8; SECTOR_SIZE] =
                frame[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].try_into().unwrap();
            self.disk.write(Sector((start + i) as u32), chunk);
        }
        guard.unlock();
        Sector(start as u32)
    }

    /// Reads the page at `start` back into `frame` and frees its slot.
    pub fn swap_in(&self, start: Sector, frame: &mut [u8; PAGE_SIZE]) {
        let mut guard = self.map.lock();
        for i in 0..PAGE_SECTORS {
            let chunk: &mut [u8; SECTOR_SIZE] = (&mut frame
                [i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE])
                .try_into()
                .unwrap();
            self.disk.read(start + i as u32, chunk);
        }
        guard.reset(start.into_usize() / PAGE_SECTORS);
        guard.unlock();
    }

    /// Frees the slot at `start` without reading it, for process teardown.
    pub fn release(&self, start: Sector) {
        let mut guard = self.map.lock();
        guard.reset(start.into_usize() / PAGE_SECTORS);
        guard.unlock();
    }

    /// Number of slots currently holding a page.
    pub fn slots_in_use(&self) -> usize {
        let guard = self.map.lock();
        let n = guard.count_marked();
        guard.unlock();
        n
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        let guard = self.map.lock();
        let n = guard.len();
        guard.unlock();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minos::dev::RamDisk;

    fn page(fill: u8) -> Box<[u8; PAGE_SIZE]> {
        Box::new([fill; PAGE_SIZE])
    }

    #[test]
    fn round_trip_frees_the_slot() {
        let swap = SwapArea::new(Disk::new(RamDisk::new(64)));
        assert_eq!(swap.capacity(), 8);

        let out = page(0x5A);
        let slot = swap.swap_out(&out);
        assert_eq!(slot, Sector(0));
        assert_eq!(swap.slots_in_use(), 1);

        let mut back = page(0);
        swap.swap_in(slot, &mut back);
        assert_eq!(&out[..], &back[..]);
        assert_eq!(swap.slots_in_use(), 0);
    }

    #[test]
    fn slots_are_page_aligned_runs() {
        let swap = SwapArea::new(Disk::new(RamDisk::new(64)));
        let a = swap.swap_out(&page(1));
        let b = swap.swap_out(&page(2));
        assert_eq!(a, Sector(0));
        assert_eq!(b, Sector(PAGE_SECTORS as u32));
        swap.release(a);
        assert_eq!(swap.swap_out(&page(3)), Sector(0));
    }

    #[test]
    #[should_panic(expected = "swap exhausted")]
    fn exhaustion_panics() {
        let swap = SwapArea::new(Disk::new(RamDisk::new(16)));
        assert_eq!(swap.capacity(), 2);
        swap.swap_out(&page(1));
        swap.swap_out(&page(2));
        swap.swap_out(&page(3));
    }
}

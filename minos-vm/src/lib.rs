//! Virtual memory core of MinOS.
//!
//! User processes get a demand-paged address space larger than physical
//! memory. The pieces:
//!
//! - [`frame::FrameTable`]: who owns every physical frame, plus FIFO
//!   victim selection.
//! - [`swap::SwapArea`]: page-sized slots on the swap device.
//! - [`page::SupPageTable`]: per-process record of where each page lives.
//! - the page-fault resolver in [`fault`], covering demand paging, stack
//!   growth, and eviction.
//! - [`process::Process`]: the per-process bindings, from open files and
//!   `esp` to the mmap list and the owning address space.
//!
//! One lock guards the frame table together with every supplementary page
//! table, so eviction can retarget another process's page without juggling
//! locks. While holding it, the resolver may take the swap lock or call
//! into a file handle; the buffer cache and inode registry sit below both.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod fault;
pub mod frame;
pub mod page;
pub mod process;
pub mod swap;

pub use fault::PageFaultReason;
pub use process::{MapId, PID_ERROR, Process};

use alloc::collections::btree_map::BTreeMap;
use frame::FrameTable;
use minos::addressing::PAGE_SIZE;
use minos::dev::{Disk, SECTOR_SIZE};
use minos::mm::FramePool;
use minos::mm::page_table::PageDirectory;
use minos::sync::SpinLock;
use page::{PageState, SupPageTable};
use process::MmapRegion;
use swap::SwapArea;

/// Sectors per page on the swap device.
pub const PAGE_SECTORS: usize = PAGE_SIZE / SECTOR_SIZE;

/// Identifier of a user address space.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AsId(pub u64);

/// One user address space: its hardware translations and the
/// supplementary page table behind them.
pub struct AddressSpace {
    /// The hardware page directory.
    pub pagedir: PageDirectory,
    /// Where each page of the space lives.
    pub pages: SupPageTable,
}

impl AddressSpace {
    fn new() -> Self {
        Self {
            pagedir: PageDirectory::new(),
            pages: SupPageTable::new(),
        }
    }
}

/// State guarded by the frame lock: the frame table and every address
/// space.
pub struct VmState {
    /// The global frame table.
    pub frames: FrameTable,
    /// All live address spaces.
    pub spaces: BTreeMap<AsId, AddressSpace>,
    next_as: u64,
}

/// The virtual-memory context, constructed once at boot.
pub struct Vm {
    state: SpinLock<VmState>,
    pool: FramePool,
    swap: SwapArea,
}

impl Vm {
    /// Creates the VM context with `frames` physical frames and the given
    /// swap device.
    pub fn new(frames: usize, swap_disk: Disk) -> Self {
        Self {
            state: SpinLock::new(VmState {
                frames: FrameTable::new(),
                spaces: BTreeMap::new(),
                next_as: 0,
            }),
            pool: FramePool::new(frames),
            swap: SwapArea::new(swap_disk),
        }
    }

    /// The physical-frame pool.
    #[inline]
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// The swap area.
    #[inline]
    pub fn swap(&self) -> &SwapArea {
        &self.swap
    }

    /// Runs `f` with the frame lock held.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut VmState) -> R) -> R {
        let mut guard = self.state.lock();
        let r = f(&mut guard);
        guard.unlock();
        r
    }

    /// Creates a fresh, empty address space.
    pub fn create_space(&self) -> AsId {
        let mut guard = self.state.lock();
        let id = AsId(guard.next_as);
        guard.next_as += 1;
        guard.spaces.insert(id, AddressSpace::new());
        guard.unlock();
        id
    }

    /// Tears an address space down: swap slots are freed, resident frames
    /// are unregistered and returned to the pool, file-backed entries are
    /// dropped.
    pub fn destroy_space(&self, asid: AsId) {
        let mut guard = self.state.lock();
        if let Some(space) = guard.spaces.remove(&asid) {
            for (_va, state) in space.pages.into_iter() {
                match state {
                    PageState::Frame { pa, .. } => {
                        guard.frames.remove(pa);
                        self.pool.free_page(pa);
                    }
                    PageState::Swap { slot } => self.swap.release(slot),
                    PageState::File { .. } => {}
                }
            }
        }
        guard.unlock();
    }

    // Unmaps one mmap region: resident dirty pages are written back at
    // their recorded offsets, frames and swap slots are released, and the
    // supplementary entries dropped.
    pub(crate) fn unmap_region(&self, asid: AsId, region: &MmapRegion) {
        let mut guard = self.state.lock();
        let VmState { frames, spaces, .. } = &mut *guard;
        let space = spaces.get_mut(&asid).expect("no such address space");
        for i in 0..region.npages {
            let page = region.base + i * PAGE_SIZE;
            match space.pages.remove(page) {
                Some(PageState::Frame { pa, backing }) => {
                    if let Some(b) = backing {
                        if space.pagedir.is_dirty(page) {
                            let mut buf = alloc::boxed::Box::new([0u8; PAGE_SIZE]);
                            self.pool.read_frame(pa, &mut buf);
                            let n = PAGE_SIZE.min(b.file.len().saturating_sub(b.offset));
                            let _ = b.file.write_at(&buf[..n], b.offset);
                        }
                    }
                    space.pagedir.clear_page(page);
                    frames.remove(pa);
                    self.pool.free_page(pa);
                }
                Some(PageState::Swap { slot }) => self.swap.release(slot),
                Some(PageState::File { .. }) | None => {}
            }
        }
        guard.unlock();
    }
}

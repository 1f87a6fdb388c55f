//! Supplementary page table.
//!
//! The hardware page directory only knows about resident pages; this table
//! records where every page of an address space actually lives: in a
//! physical frame, in a swap slot, or in a file segment not yet brought
//! in. Exactly one of the three holds at any time; the variant *is* the
//! state.
//!
//! A resident page remembers the file segment it was mapped from, so that
//! eviction can push it back to the file instead of the swap device and a
//! later fault can find it there again.

use alloc::collections::btree_map::BTreeMap;
use minos::addressing::{Pa, Va};
use minos::fs::{RegularFile, Sector};

/// The file segment backing a memory-mapped page.
#[derive(Clone)]
pub struct FileBacking {
    /// Independent handle to the mapped file.
    pub file: RegularFile,
    /// Byte offset of this page within the file.
    pub offset: usize,
}

/// Where a virtual page currently lives.
#[derive(Clone)]
pub enum PageState {
    /// Resident in a physical frame. `backing` records the mmap origin for
    /// file-backed pages; anonymous and stack pages carry `None`.
    Frame {
        /// The frame backing the page.
        pa: Pa,
        /// The file segment this page writes back to, if any.
        backing: Option<FileBacking>,
    },
    /// Evicted to the swap slot starting at `slot`.
    Swap {
        /// Starting sector of the slot.
        slot: Sector,
    },
    /// Not yet resident; contents come from a file segment on fault.
    File {
        /// The file segment to populate from.
        backing: FileBacking,
    },
}

/// Per-address-space map from user-page base to [`PageState`].
pub struct SupPageTable {
    entries: BTreeMap<Va, PageState>,
}

impl SupPageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Records `page` as resident in `pa`.
    pub fn insert_frame(&mut self, page: Va, pa: Pa, backing: Option<FileBacking>) {
        debug_assert!(page.is_page_aligned());
        self.entries.insert(page, PageState::Frame { pa, backing });
    }

    /// Records `page` as evicted to the swap slot at `slot`.
    pub fn insert_swap(&mut self, page: Va, slot: Sector) {
        debug_assert!(page.is_page_aligned());
        self.entries.insert(page, PageState::Swap { slot });
    }

    /// Records `page` as backed by a file segment, not resident.
    pub fn insert_file(&mut self, page: Va, backing: FileBacking) {
        debug_assert!(page.is_page_aligned());
        self.entries.insert(page, PageState::File { backing });
    }

    /// Looks up the state of `page`.
    pub fn find(&self, page: Va) -> Option<&PageState> {
        self.entries.get(&page)
    }

    /// Whether `page` has any state at all.
    pub fn contains(&self, page: Va) -> bool {
        self.entries.contains_key(&page)
    }

    /// Drops the state of `page`, returning it.
    pub fn remove(&mut self, page: Va) -> Option<PageState> {
        self.entries.remove(&page)
    }

    /// Number of tracked pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pages are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all tracked pages.
    pub fn iter(&self) -> impl Iterator<Item = (&Va, &PageState)> {
        self.entries.iter()
    }

    /// Consumes the table, yielding every tracked page; used on process
    /// teardown.
    pub fn into_iter(self) -> impl Iterator<Item = (Va, PageState)> {
        self.entries.into_iter()
    }
}

impl Default for SupPageTable {
    fn default() -> Self {
        Self::new()
    }
}

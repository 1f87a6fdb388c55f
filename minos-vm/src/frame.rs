//! Frame table.
//!
//! A registry of every physical frame handed out to a user page: which
//! address space owns it and which virtual page it backs. The same frames
//! are also kept in an insertion-order queue, which is what victim
//! selection walks. The policy is deliberately trivial FIFO; the
//! [`FrameTable::select_victim`] seam is where a clock or LRU approximation
//! over the hardware accessed bits would plug in.

use crate::AsId;
use alloc::collections::btree_map::BTreeMap;
use alloc::collections::vec_deque::VecDeque;
use minos::addressing::{Pa, Va};

/// One allocated user frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameEntry {
    /// Address space the frame belongs to.
    pub owner: AsId,
    /// User page the frame backs.
    pub va: Va,
}

/// Registry of allocated physical frames with FIFO victim selection.
pub struct FrameTable {
    entries: BTreeMap<Pa, FrameEntry>,
    queue: VecDeque<Pa>,
}

impl FrameTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Registers `pa` as backing `(owner, va)`.
    ///
    /// Upserts: re-inserting a known frame updates its owner and page but
    /// keeps its position in the eviction queue.
    pub fn insert(&mut self, pa: Pa, owner: AsId, va: Va) {
        if self.entries.insert(pa, FrameEntry { owner, va }).is_none() {
            self.queue.push_back(pa);
        }
    }

    /// Removes the entry for `pa`.
    pub fn remove(&mut self, pa: Pa) -> Option<FrameEntry> {
        let entry = self.entries.remove(&pa);
        if entry.is_some() {
            self.queue.retain(|&p| p != pa);
        }
        entry
    }

    /// Looks up the entry for `pa`.
    pub fn find(&self, pa: Pa) -> Option<&FrameEntry> {
        self.entries.get(&pa)
    }

    /// Picks the eviction victim: the FIFO head, which is immediately
    /// rotated to the tail so a subsequent call sees a different victim.
    pub fn select_victim(&mut self) -> Option<Pa> {
        let pa = self.queue.pop_front()?;
        self.queue.push_back(pa);
        Some(pa)
    }

    /// Number of registered frames.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no frames are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Pa, &FrameEntry)> {
        self.entries.iter()
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(n: usize) -> Pa {
        Pa::new(0x1000_0000 + n * 0x1000)
    }

    #[test]
    fn insert_find_remove() {
        let mut table = FrameTable::new();
        table.insert(pa(0), AsId(1), Va::new(0x8000_0000));
        table.insert(pa(1), AsId(2), Va::new(0x8000_1000));
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(pa(0)).unwrap().owner, AsId(1));

        let gone = table.remove(pa(0)).unwrap();
        assert_eq!(gone.va, Va::new(0x8000_0000));
        assert!(table.find(pa(0)).is_none());
        // The queue no longer yields the removed frame.
        assert_eq!(table.select_victim(), Some(pa(1)));
    }

    #[test]
    fn victims_rotate_fifo() {
        let mut table = FrameTable::new();
        for i in 0..3 {
            table.insert(pa(i), AsId(1), Va::new(0x8000_0000 + i * 0x1000));
        }
        assert_eq!(table.select_victim(), Some(pa(0)));
        assert_eq!(table.select_victim(), Some(pa(1)));
        assert_eq!(table.select_victim(), Some(pa(2)));
        assert_eq!(table.select_victim(), Some(pa(0)));
    }

    #[test]
    fn upsert_keeps_queue_position() {
        let mut table = FrameTable::new();
        table.insert(pa(0), AsId(1), Va::new(0x8000_0000));
        table.insert(pa(1), AsId(1), Va::new(0x8000_1000));
        table.insert(pa(0), AsId(2), Va::new(0x9000_0000));
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(pa(0)).unwrap().owner, AsId(2));
        assert_eq!(table.select_victim(), Some(pa(0)));
    }
}

//! Memory Management.
//!
//! This module provides the physical-frame allocator and the per-process
//! page directory model. The storage and memory core asks [`FramePool`] for
//! `PAGE_SIZE`-aligned frames; when the pool runs dry, the virtual-memory
//! core evicts a victim frame instead.

pub mod page_table;

use crate::addressing::{PAGE_SIZE, Pa};
use crate::sync::SpinLock;
use crate::util::Bitmap;
use alloc::{boxed::Box, vec};
use core::cell::UnsafeCell;

bitflags::bitflags! {
    /// Flags for [`FramePool::get_page`].
    pub struct PallocFlags: u32 {
        /// Allocate from the user pool.
        const USER = 0b01;
        /// Zero the frame before returning it.
        const ZERO = 0b10;
    }
}

/// Base physical address of the frame pool.
///
/// The value itself is arbitrary; frames are identified by their [`Pa`] and
/// accessed through the pool, which stands in for the kernel's
/// physical-memory window.
pub const FRAME_POOL_BASE: usize = 0x1000_0000;

/// A bounded pool of physical frames.
///
/// Frames are `PAGE_SIZE` bytes, identified by page-aligned [`Pa`]s starting
/// at [`FRAME_POOL_BASE`], and tracked by a bitmap. The bound is what forces
/// eviction: once every frame is handed out, [`FramePool::get_page`] returns
/// `None` until a frame is freed.
pub struct FramePool {
    frames: usize,
    slab: UnsafeCell<Box<[u8]>>,
    map: SpinLock<Bitmap>,
}

// Frame contents are shared mutable memory by nature (they back user
// pages); the allocation bitmap is the only state the pool itself guards.
unsafe impl Sync for FramePool {}
unsafe impl Send for FramePool {}

impl FramePool {
    /// Creates a pool of `frames` frames.
    pub fn new(frames: usize) -> Self {
        assert!(frames > 0);
        Self {
            frames,
            slab: UnsafeCell::new(vec![0u8; frames * PAGE_SIZE].into_boxed_slice()),
            map: SpinLock::new(Bitmap::new(frames)),
        }
    }

    /// Obtains a free frame, or `None` when the pool is exhausted.
    pub fn get_page(&self, flags: PallocFlags) -> Option<Pa> {
        let mut guard = self.map.lock();
        let idx = guard.scan_and_flip();
        guard.unlock();
        let idx = idx?;
        let pa = Pa::new(FRAME_POOL_BASE + idx * PAGE_SIZE);
        if flags.contains(PallocFlags::ZERO) {
            self.with_frame(pa, |frame| frame.fill(0));
        }
        Some(pa)
    }

    /// Returns a frame to the pool.
    pub fn free_page(&self, pa: Pa) {
        let idx = self.index(pa);
        let mut guard = self.map.lock();
        assert!(guard.test(idx), "freeing a frame that is not allocated: {pa:?}");
        guard.reset(idx);
        guard.unlock();
    }

    /// Number of frames currently handed out.
    pub fn in_use(&self) -> usize {
        let guard = self.map.lock();
        let n = guard.count_marked();
        guard.unlock();
        n
    }

    /// Total number of frames in the pool.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.frames
    }

    fn index(&self, pa: Pa) -> usize {
        let addr = pa.into_usize();
        assert!(
            addr >= FRAME_POOL_BASE
                && addr < FRAME_POOL_BASE + self.frames * PAGE_SIZE
                && addr % PAGE_SIZE == 0,
            "not a frame address: {pa:?}"
        );
        (addr - FRAME_POOL_BASE) / PAGE_SIZE
    }

    /// Runs `f` over the contents of the frame at `pa`.
    ///
    /// Concurrent access to the *same* frame is the caller's concern, as it
    /// would be for memory shared with user code.
    pub fn with_frame<R>(&self, pa: Pa, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        let idx = self.index(pa);
        let slab = unsafe { &mut *self.slab.get() };
        let bytes: &mut [u8; PAGE_SIZE] = (&mut slab[idx * PAGE_SIZE..(idx + 1) * PAGE_SIZE])
            .try_into()
            .unwrap();
        f(bytes)
    }

    /// Copies the contents of the frame at `pa` into `dst`.
    pub fn read_frame(&self, pa: Pa, dst: &mut [u8; PAGE_SIZE]) {
        self.with_frame(pa, |frame| dst.copy_from_slice(frame));
    }

    /// Overwrites the frame at `pa` with `src`.
    pub fn write_frame(&self, pa: Pa, src: &[u8; PAGE_SIZE]) {
        self.with_frame(pa, |frame| frame.copy_from_slice(src));
    }
}

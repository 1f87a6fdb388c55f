//! Page-fault resolver.
//!
//! The trap plumbing decodes the fault into a [`PageFaultReason`] and hands
//! it here; everything after that (stack growth, swap-in, file-in, and
//! eviction when the frame pool is dry) happens under the frame lock.
//!
//! A fatal fault comes back as `Err(UserFault)`; the caller terminates the
//! process.

use crate::page::{FileBacking, PageState};
use crate::{AsId, Vm, VmState};
use alloc::boxed::Box;
use minos::KernelError;
use minos::addressing::{PAGE_SIZE, Pa, Va};
use minos::mm::PallocFlags;

/// Reach of a stack access below the saved stack pointer that still counts
/// as stack growth (a `PUSHA` writes 32 bytes below `esp`).
pub const STACK_SLACK: usize = 32;

/// Why a page fault occurred.
///
/// Decoded from the hardware error code by the trap handler. `esp` is the
/// user-mode stack pointer captured in the trap frame; for faults taken in
/// kernel mode during a system call, the resolver uses the stack pointer
/// the process saved on trap entry instead.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultReason {
    /// The address whose access faulted.
    pub fault_addr: Va,
    /// The access was a write.
    pub write: bool,
    /// The page was not present (as opposed to a rights violation).
    pub not_present: bool,
    /// The fault was taken in user mode.
    pub user: bool,
    /// User-mode stack pointer from the trap frame.
    pub esp: Va,
}

impl Vm {
    /// Resolves a page fault in address space `asid`.
    ///
    /// `esp` is the stack pointer relevant to the fault: the trap-frame
    /// value for user-mode faults, the process-saved value for
    /// kernel-mode ones.
    ///
    /// Returns `Err(UserFault)` when the access is illegal and the process
    /// must be terminated.
    pub fn handle_fault(
        &self,
        asid: AsId,
        esp: Va,
        reason: &PageFaultReason,
    ) -> Result<(), KernelError> {
        // A fault on a present page is a rights violation (e.g. a write to
        // a read-only page).
        if !reason.not_present {
            return Err(KernelError::UserFault);
        }
        let page = reason.fault_addr.page_down();
        let mut guard = self.state.lock();
        let result = self.resolve(&mut guard, asid, esp, reason, page);
        guard.unlock();
        result
    }

    fn resolve(
        &self,
        st: &mut VmState,
        asid: AsId,
        esp: Va,
        reason: &PageFaultReason,
        page: Va,
    ) -> Result<(), KernelError> {
        let entry = st
            .spaces
            .get(&asid)
            .expect("no such address space")
            .pages
            .find(page)
            .cloned();
        match entry {
            None => {
                // No record of the page: only stack growth is legal.
                if reason.fault_addr.is_user()
                    && reason.fault_addr.into_usize() + STACK_SLACK >= esp.into_usize()
                {
                    let pa = self.obtain_frame(st)?;
                    self.pool.with_frame(pa, |frame| frame.fill(0));
                    self.install(st, asid, page, pa, None);
                    Ok(())
                } else {
                    Err(KernelError::UserFault)
                }
            }
            Some(PageState::Swap { slot }) => {
                let pa = self.obtain_frame(st)?;
                self.pool.with_frame(pa, |frame| self.swap.swap_in(slot, frame));
                self.install(st, asid, page, pa, None);
                Ok(())
            }
            Some(PageState::File { backing }) => {
                let pa = self.obtain_frame(st)?;
                let mut buf = Box::new([0u8; PAGE_SIZE]);
                backing.file.read_at(&mut buf[..], backing.offset)?;
                self.pool.write_frame(pa, &buf);
                self.install(st, asid, page, pa, Some(backing));
                Ok(())
            }
            // Resident yet not present in the page directory: the mapping
            // is stale, treat the access as illegal.
            Some(PageState::Frame { .. }) => Err(KernelError::UserFault),
        }
    }

    // Maps `pa` at `page` and registers it in the frame table and the
    // supplementary page table.
    fn install(
        &self,
        st: &mut VmState,
        asid: AsId,
        page: Va,
        pa: Pa,
        backing: Option<FileBacking>,
    ) {
        let space = st.spaces.get_mut(&asid).unwrap();
        space.pagedir.set_page(page, pa, true);
        space.pages.insert_frame(page, pa, backing);
        st.frames.insert(pa, asid, page);
    }

    // Produces a usable frame: from the pool if one is free, otherwise by
    // evicting the FIFO victim. A file-backed victim goes back to its file
    // (only when dirty); anything else goes to swap. The victim's hardware
    // mapping is cleared and its supplementary entry rewritten before the
    // frame is reused.
    pub(crate) fn obtain_frame(&self, st: &mut VmState) -> Result<Pa, KernelError> {
        if let Some(pa) = self.pool.get_page(PallocFlags::USER) {
            return Ok(pa);
        }
        let victim = st
            .frames
            .select_victim()
            .ok_or(KernelError::OutOfMemory)?;
        let VmState { frames, spaces, .. } = st;
        let entry = *frames.find(victim).expect("victim left the frame table");
        let space = spaces
            .get_mut(&entry.owner)
            .expect("victim owner vanished");
        let Some(PageState::Frame { pa, backing }) = space.pages.find(entry.va).cloned() else {
            panic!("frame-table entry without a resident page");
        };
        debug_assert_eq!(pa, victim);

        match backing {
            Some(b) => {
                if space.pagedir.is_dirty(entry.va) {
                    let mut buf = Box::new([0u8; PAGE_SIZE]);
                    self.pool.read_frame(pa, &mut buf);
                    let n = PAGE_SIZE.min(b.file.len().saturating_sub(b.offset));
                    b.file.write_at(&buf[..n], b.offset)?;
                }
                space.pages.insert_file(entry.va, b);
            }
            None => {
                let mut buf = Box::new([0u8; PAGE_SIZE]);
                self.pool.read_frame(pa, &mut buf);
                let slot = self.swap.swap_out(&buf);
                space.pages.insert_swap(entry.va, slot);
            }
        }
        space.pagedir.clear_page(entry.va);
        frames.remove(victim);
        Ok(victim)
    }
}

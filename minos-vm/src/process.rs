//! Per-process bindings of the virtual-memory core.
//!
//! A [`Process`] owns one address space plus the bookkeeping the memory
//! core consumes: the open-file table (descriptors 0 and 1 are the
//! console), the stack pointer saved on trap entry, the exit status, and
//! the list of memory mappings.
//!
//! [`Process::write_user`] and [`Process::read_user`] play the MMU's part
//! for kernel-side access to user memory: they walk the page directory,
//! fault missing pages in through the real resolver, and set the accessed
//! and dirty bits a hardware walker would set.

use crate::fault::PageFaultReason;
use crate::page::FileBacking;
use crate::{AsId, Vm};
use alloc::sync::Arc;
use alloc::vec::Vec;
use minos::KernelError;
use minos::addressing::{PAGE_SIZE, Pa, USER_TOP, Va};
use minos::fs::{Directory, RegularFile};
use minos::mm::page_table::PteFlags;

/// Exit status of a process terminated by a fatal fault.
pub const PID_ERROR: isize = -1;

/// File descriptors 0 and 1 are the console.
pub const FD_CONSOLE_MAX: usize = 1;

/// Identifier of one memory mapping within a process.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct MapId(pub usize);

/// One live memory mapping.
pub struct MmapRegion {
    /// Mapping id, unique within the process.
    pub id: MapId,
    /// First mapped page.
    pub base: Va,
    /// Number of mapped pages.
    pub npages: usize,
    /// Independent handle to the mapped file.
    pub file: RegularFile,
}

/// The per-process state the storage and memory core consumes.
pub struct Process {
    vm: Arc<Vm>,
    asid: AsId,
    files: Vec<Option<RegularFile>>,
    mmaps: Vec<MmapRegion>,
    next_mapid: usize,
    /// Current directory, used by the file-system façade to resolve
    /// relative paths; `None` means the root.
    pub cwd: Option<Directory>,
    /// Stack pointer saved when the process last entered the kernel.
    pub esp: Va,
    /// Exit status, set on termination.
    pub exit_status: Option<isize>,
}

impl Process {
    /// Creates a process with a fresh address space.
    pub fn new(vm: Arc<Vm>) -> Self {
        let asid = vm.create_space();
        let mut files = Vec::new();
        // Console descriptors; their behavior is fixed elsewhere.
        files.push(None);
        files.push(None);
        Self {
            vm,
            asid,
            files,
            mmaps: Vec::new(),
            next_mapid: 0,
            cwd: None,
            esp: Va::new(USER_TOP),
            exit_status: None,
        }
    }

    /// The process's address space.
    #[inline]
    pub fn asid(&self) -> AsId {
        self.asid
    }

    /// Installs `file` into the lowest free descriptor slot.
    pub fn install_file(&mut self, file: RegularFile) -> usize {
        for (fd, slot) in self.files.iter_mut().enumerate().skip(FD_CONSOLE_MAX + 1) {
            if slot.is_none() {
                *slot = Some(file);
                return fd;
            }
        }
        self.files.push(Some(file));
        self.files.len() - 1
    }

    /// The file at descriptor `fd`, if any.
    pub fn file(&self, fd: usize) -> Option<&RegularFile> {
        self.files.get(fd).and_then(|slot| slot.as_ref())
    }

    /// Closes descriptor `fd`.
    pub fn close_file(&mut self, fd: usize) {
        if fd > FD_CONSOLE_MAX {
            if let Some(slot) = self.files.get_mut(fd) {
                *slot = None;
            }
        }
    }

    /// Maps the file open at `fd` into the address space starting at
    /// `base`, one supplementary entry per page and no frames up front.
    ///
    /// Rejects console descriptors, empty files, a null or unaligned
    /// `base`, and ranges that overlap any existing page.
    pub fn mmap(&mut self, fd: usize, base: Va) -> Result<MapId, KernelError> {
        if fd <= FD_CONSOLE_MAX {
            return Err(KernelError::BadFileDescriptor);
        }
        let file = self.file(fd).ok_or(KernelError::BadFileDescriptor)?.clone();
        let len = file.len();
        if len == 0 || base.into_usize() == 0 || !base.is_page_aligned() {
            return Err(KernelError::InvalidArgument);
        }
        let npages = len.div_ceil(PAGE_SIZE);
        if base.into_usize() + npages * PAGE_SIZE > USER_TOP {
            return Err(KernelError::InvalidArgument);
        }
        let asid = self.asid;
        self.vm.with_state(|st| {
            let space = st.spaces.get_mut(&asid).expect("no such address space");
            for i in 0..npages {
                if space.pages.contains(base + i * PAGE_SIZE) {
                    return Err(KernelError::InvalidArgument);
                }
            }
            for i in 0..npages {
                space.pages.insert_file(
                    base + i * PAGE_SIZE,
                    FileBacking {
                        file: file.clone(),
                        offset: i * PAGE_SIZE,
                    },
                );
            }
            Ok(())
        })?;
        let id = MapId(self.next_mapid);
        self.next_mapid += 1;
        self.mmaps.push(MmapRegion {
            id,
            base,
            npages,
            file,
        });
        Ok(id)
    }

    /// Unmaps the mapping `id`: resident dirty pages are written back at
    /// their offsets, the supplementary entries dropped, and the file
    /// handle closed.
    pub fn munmap(&mut self, id: MapId) -> Result<(), KernelError> {
        let idx = self
            .mmaps
            .iter()
            .position(|m| m.id == id)
            .ok_or(KernelError::InvalidArgument)?;
        let region = self.mmaps.remove(idx);
        self.vm.unmap_region(self.asid, &region);
        Ok(())
    }

    /// Resolves a page fault against this process.
    ///
    /// On a fatal fault the exit status is set to [`PID_ERROR`] and the
    /// error returned; the trap plumbing then makes the thread exit.
    pub fn page_fault(&mut self, reason: &PageFaultReason) -> Result<(), KernelError> {
        let esp = if reason.user { reason.esp } else { self.esp };
        let result = self.vm.handle_fault(self.asid, esp, reason);
        if result.is_err() {
            self.exit_status = Some(PID_ERROR);
        }
        result
    }

    // Translates `va` for an access, faulting the page in when needed and
    // updating the accessed/dirty bits as the MMU would.
    fn user_page(&mut self, va: Va, write: bool) -> Result<Pa, KernelError> {
        loop {
            let asid = self.asid;
            let translated = self.vm.with_state(|st| {
                let space = st.spaces.get_mut(&asid).expect("no such address space");
                match space.pagedir.lookup(va) {
                    Some(pte) if write && !pte.flags.contains(PteFlags::W) => Some(None),
                    Some(pte) => {
                        if write {
                            space.pagedir.set_dirty(va);
                        } else {
                            space.pagedir.set_accessed(va);
                        }
                        Some(Some(pte.pa))
                    }
                    None => None,
                }
            });
            let reason = PageFaultReason {
                fault_addr: va,
                write,
                not_present: translated.is_none(),
                user: true,
                esp: self.esp,
            };
            match translated {
                Some(Some(pa)) => return Ok(pa),
                // Present but read-only, or unmapped: raise the fault.
                Some(None) | None => self.page_fault(&reason)?,
            }
        }
    }

    /// Copies `bytes` into user memory at `va`, faulting pages in along
    /// the way.
    pub fn write_user(&mut self, va: Va, bytes: &[u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < bytes.len() {
            let cur = va + done;
            let page_off = cur.into_usize() & (PAGE_SIZE - 1);
            let chunk = (bytes.len() - done).min(PAGE_SIZE - page_off);
            let pa = self.user_page(cur, true)?;
            self.vm.pool().with_frame(pa, |frame| {
                frame[page_off..page_off + chunk].copy_from_slice(&bytes[done..done + chunk]);
            });
            done += chunk;
        }
        Ok(())
    }

    /// Copies user memory at `va` into `buf`, faulting pages in along the
    /// way.
    pub fn read_user(&mut self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = va + done;
            let page_off = cur.into_usize() & (PAGE_SIZE - 1);
            let chunk = (buf.len() - done).min(PAGE_SIZE - page_off);
            let pa = self.user_page(cur, false)?;
            self.vm.pool().with_frame(pa, |frame| {
                buf[done..done + chunk].copy_from_slice(&frame[page_off..page_off + chunk]);
            });
            done += chunk;
        }
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.vm.destroy_space(self.asid);
    }
}

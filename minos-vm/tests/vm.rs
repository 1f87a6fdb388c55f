//! End-to-end virtual-memory scenarios: demand paging, stack growth,
//! eviction to swap and to files, and memory-mapped file round trips.

use minos::KernelError;
use minos::addressing::{PAGE_SIZE, USER_TOP, Va};
use minos::dev::{Disk, RamDisk};
use minos_fs::FileSys;
use minos_vm::page::PageState;
use minos_vm::{MapId, PID_ERROR, PageFaultReason, Process, Vm};
use std::sync::Arc;

const STACK_TOP: usize = 0xBFFF_F000;
const ANON_BASE: usize = 0x8000_0000;
const MMAP_BASE: usize = 0x1000_0000;

fn vm_with(frames: usize, swap_sectors: usize) -> Arc<Vm> {
    Arc::new(Vm::new(frames, Disk::new(RamDisk::new(swap_sectors))))
}

// A process whose entire upper address range counts as stack, so plain
// write_user calls demand-allocate anonymous pages.
fn anon_process(vm: &Arc<Vm>) -> Process {
    let mut p = Process::new(vm.clone());
    p.esp = Va::new(ANON_BASE);
    p
}

fn fs_with_file(content: &[u8]) -> (FileSys, minos::fs::RegularFile) {
    let fs = FileSys::open_disk(Disk::new(RamDisk::new(4096)), true).unwrap();
    let file = fs
        .create_file("mapped", 0, None)
        .unwrap()
        .into_regular_file()
        .unwrap();
    file.write_at(content, 0).unwrap();
    (fs, file)
}

fn fault(addr: usize, esp: usize) -> PageFaultReason {
    PageFaultReason {
        fault_addr: Va::new(addr),
        write: true,
        not_present: true,
        user: true,
        esp: Va::new(esp),
    }
}

// Checks that every frame-table entry points at a supplementary entry that
// is resident in exactly that frame.
fn check_frame_invariant(vm: &Vm) {
    vm.with_state(|st| {
        let mut pairs = Vec::new();
        for (pa, entry) in st.frames.iter() {
            pairs.push((*pa, entry.owner, entry.va));
        }
        for (pa, owner, va) in pairs {
            let space = st.spaces.get(&owner).expect("frame owned by dead space");
            match space.pages.find(va) {
                Some(PageState::Frame { pa: resident, .. }) => assert_eq!(*resident, pa),
                _ => panic!("frame-table entry without resident page state"),
            }
        }
    });
}

#[test]
fn stack_growth_within_slack() {
    let vm = vm_with(8, 64);
    let mut p = Process::new(vm.clone());
    p.esp = Va::new(STACK_TOP);

    // 32 bytes below esp is legal stack growth.
    p.write_user(Va::new(STACK_TOP - 32), &[0xAB]).unwrap();
    vm.with_state(|st| {
        let space = &st.spaces[&p.asid()];
        assert!(space.pagedir.lookup(Va::new(0xBFFF_E000)).is_some());
    });
    let frames = vm.pool().in_use();

    // A second access to the same page does not fault a new frame in.
    let mut byte = [0u8];
    p.read_user(Va::new(STACK_TOP - 32), &mut byte).unwrap();
    assert_eq!(byte[0], 0xAB);
    assert_eq!(vm.pool().in_use(), frames);
    check_frame_invariant(&vm);
}

#[test]
fn stack_growth_beyond_slack_kills() {
    let vm = vm_with(8, 64);
    let mut p = Process::new(vm.clone());
    p.esp = Va::new(STACK_TOP);

    let r = p.page_fault(&fault(STACK_TOP - 33, STACK_TOP));
    assert_eq!(r, Err(KernelError::UserFault));
    assert_eq!(p.exit_status, Some(PID_ERROR));
}

#[test]
fn kernel_addresses_kill() {
    let vm = vm_with(8, 64);
    let mut p = Process::new(vm.clone());
    p.esp = Va::new(STACK_TOP);

    let r = p.page_fault(&fault(USER_TOP + 0x1000, STACK_TOP));
    assert_eq!(r, Err(KernelError::UserFault));
    assert_eq!(p.exit_status, Some(PID_ERROR));
}

#[test]
fn write_to_present_page_rights_violation_kills() {
    let vm = vm_with(8, 64);
    let mut p = anon_process(&vm);
    p.write_user(Va::new(ANON_BASE), &[1]).unwrap();

    let reason = PageFaultReason {
        fault_addr: Va::new(ANON_BASE),
        write: true,
        not_present: false,
        user: true,
        esp: p.esp,
    };
    assert_eq!(p.page_fault(&reason), Err(KernelError::UserFault));
    assert_eq!(p.exit_status, Some(PID_ERROR));
}

#[test]
fn eviction_round_trip_through_swap() {
    let vm = vm_with(2, 64);
    let mut p = anon_process(&vm);

    let pages: Vec<Va> = (0..3).map(|i| Va::new(ANON_BASE + i * PAGE_SIZE)).collect();
    for (i, &page) in pages.iter().enumerate() {
        p.write_user(page, &[i as u8 + 1; 64]).unwrap();
    }
    // Two frames cannot hold three pages: the oldest went to swap.
    assert_eq!(vm.pool().in_use(), 2);
    assert_eq!(vm.swap().slots_in_use(), 1);
    vm.with_state(|st| {
        let space = &st.spaces[&p.asid()];
        assert!(matches!(
            space.pages.find(pages[0]),
            Some(PageState::Swap { .. })
        ));
        assert!(space.pagedir.lookup(pages[0]).is_none());
    });
    check_frame_invariant(&vm);

    // Touching the evicted page swaps it back in with its contents.
    let mut out = [0u8; 64];
    p.read_user(pages[0], &mut out).unwrap();
    assert_eq!(out, [1u8; 64]);
    check_frame_invariant(&vm);

    // Its slot was released on swap-in; some other page was evicted.
    assert_eq!(vm.swap().slots_in_use(), 1);
}

#[test]
fn fifo_picks_the_oldest_frame() {
    let vm = vm_with(2, 64);
    let mut p = anon_process(&vm);

    let a = Va::new(ANON_BASE);
    let b = Va::new(ANON_BASE + PAGE_SIZE);
    let c = Va::new(ANON_BASE + 2 * PAGE_SIZE);
    p.write_user(a, &[1]).unwrap();
    p.write_user(b, &[2]).unwrap();
    p.write_user(c, &[3]).unwrap();

    vm.with_state(|st| {
        let space = &st.spaces[&p.asid()];
        assert!(matches!(space.pages.find(a), Some(PageState::Swap { .. })));
        assert!(matches!(space.pages.find(b), Some(PageState::Frame { .. })));
        assert!(matches!(space.pages.find(c), Some(PageState::Frame { .. })));
    });
}

#[test]
fn swap_slots_are_reused_after_teardown() {
    let vm = vm_with(2, 64);
    {
        let mut p = anon_process(&vm);
        for i in 0..6 {
            p.write_user(Va::new(ANON_BASE + i * PAGE_SIZE), &[i as u8]).unwrap();
        }
        assert_eq!(vm.swap().slots_in_use(), 4);
    }
    // Process drop released every frame and slot.
    assert_eq!(vm.pool().in_use(), 0);
    assert_eq!(vm.swap().slots_in_use(), 0);
    vm.with_state(|st| assert!(st.frames.is_empty()));
}

#[test]
fn mmap_validations() {
    let vm = vm_with(8, 64);
    let (_fs, file) = fs_with_file(&[9u8; 100]);
    let mut p = anon_process(&vm);
    let fd = p.install_file(file);

    // Console descriptors are not mappable.
    assert_eq!(p.mmap(0, Va::new(MMAP_BASE)), Err(KernelError::BadFileDescriptor));
    assert_eq!(p.mmap(1, Va::new(MMAP_BASE)), Err(KernelError::BadFileDescriptor));
    assert_eq!(p.mmap(99, Va::new(MMAP_BASE)), Err(KernelError::BadFileDescriptor));
    // Misaligned or null base.
    assert_eq!(p.mmap(fd, Va::new(MMAP_BASE + 1)), Err(KernelError::InvalidArgument));
    assert_eq!(p.mmap(fd, Va::new(0)), Err(KernelError::InvalidArgument));

    let id = p.mmap(fd, Va::new(MMAP_BASE)).unwrap();
    assert_eq!(id, MapId(0));
    // Overlapping an existing mapping is rejected.
    assert_eq!(p.mmap(fd, Va::new(MMAP_BASE)), Err(KernelError::InvalidArgument));
    // No frames were taken eagerly.
    assert_eq!(vm.pool().in_use(), 0);

    // Ids increase monotonically.
    let id2 = p.mmap(fd, Va::new(MMAP_BASE + 0x10_0000)).unwrap();
    assert_eq!(id2, MapId(1));

    // Unknown ids are rejected.
    assert_eq!(p.munmap(MapId(7)), Err(KernelError::InvalidArgument));
}

#[test]
fn mmap_of_empty_file_is_rejected() {
    let vm = vm_with(8, 64);
    let fs = FileSys::open_disk(Disk::new(RamDisk::new(1024)), true).unwrap();
    let empty = fs
        .create_file("empty", 0, None)
        .unwrap()
        .into_regular_file()
        .unwrap();
    let mut p = anon_process(&vm);
    let fd = p.install_file(empty);
    assert_eq!(p.mmap(fd, Va::new(MMAP_BASE)), Err(KernelError::InvalidArgument));
}

#[test]
fn mmap_reads_file_contents_on_demand() {
    let vm = vm_with(8, 64);
    let mut content = vec![0u8; PAGE_SIZE + 700];
    for (i, b) in content.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let (_fs, file) = fs_with_file(&content);

    let mut p = anon_process(&vm);
    let fd = p.install_file(file);
    p.mmap(fd, Va::new(MMAP_BASE)).unwrap();

    // Reading through user memory faults the pages in from the file.
    let mut out = vec![0u8; content.len()];
    p.read_user(Va::new(MMAP_BASE), &mut out).unwrap();
    assert_eq!(out, content);

    // The tail of the final page, past EOF, reads as zeros.
    let mut tail = [0xFFu8; 16];
    p.read_user(Va::new(MMAP_BASE + PAGE_SIZE + 700), &mut tail).unwrap();
    assert!(tail.iter().all(|&b| b == 0));
    check_frame_invariant(&vm);
}

#[test]
fn mmap_dirty_munmap_persists() {
    let vm = vm_with(8, 64);
    let content = vec![0x11u8; 2 * PAGE_SIZE];
    let (fs, file) = fs_with_file(&content);

    let mut p = anon_process(&vm);
    let fd = p.install_file(file);
    let id = p.mmap(fd, Va::new(MMAP_BASE)).unwrap();

    p.write_user(Va::new(MMAP_BASE + 100), b"patched!").unwrap();
    p.munmap(id).unwrap();
    assert_eq!(vm.pool().in_use(), 0);

    let reread = fs
        .open("mapped", None)
        .unwrap()
        .into_regular_file()
        .unwrap();
    let mut out = [0u8; 8];
    reread.read_at(&mut out, 100).unwrap();
    assert_eq!(&out, b"patched!");
    // Untouched bytes kept their old value.
    let mut rest = [0u8; 4];
    reread.read_at(&mut rest, 200).unwrap();
    assert_eq!(rest, [0x11; 4]);
}

#[test]
fn file_backed_pages_evict_to_their_file() {
    // One frame of physical memory forces an eviction on every new page.
    let vm = vm_with(1, 64);
    let content = vec![0x22u8; PAGE_SIZE];
    let (fs, file) = fs_with_file(&content);

    let mut p = anon_process(&vm);
    let fd = p.install_file(file);
    p.mmap(fd, Va::new(MMAP_BASE)).unwrap();

    // Dirty the mapped page, then displace it with an anonymous page.
    p.write_user(Va::new(MMAP_BASE), b"dirty page").unwrap();
    p.write_user(Va::new(ANON_BASE), &[1]).unwrap();

    vm.with_state(|st| {
        let space = &st.spaces[&p.asid()];
        // The file-backed victim went back to its file, not to swap.
        assert!(matches!(
            space.pages.find(Va::new(MMAP_BASE)),
            Some(PageState::File { .. })
        ));
    });
    assert_eq!(vm.swap().slots_in_use(), 0);

    // The dirty contents reached the file during eviction.
    let reread = fs
        .open("mapped", None)
        .unwrap()
        .into_regular_file()
        .unwrap();
    let mut out = [0u8; 10];
    reread.read_at(&mut out, 0).unwrap();
    assert_eq!(&out, b"dirty page");

    // Faulting the page back in restores the same bytes.
    let mut back = [0u8; 10];
    p.read_user(Va::new(MMAP_BASE), &mut back).unwrap();
    assert_eq!(&back, b"dirty page");
    check_frame_invariant(&vm);
}

#[test]
fn clean_file_backed_eviction_skips_the_write() {
    let vm = vm_with(1, 64);
    let content = vec![0x33u8; PAGE_SIZE];
    let (fs, file) = fs_with_file(&content);

    let mut p = anon_process(&vm);
    let fd = p.install_file(file);
    p.mmap(fd, Va::new(MMAP_BASE)).unwrap();

    // Fault the page in read-only traffic, then displace it.
    let mut byte = [0u8];
    p.read_user(Va::new(MMAP_BASE), &mut byte).unwrap();
    assert_eq!(byte[0], 0x33);
    p.write_user(Va::new(ANON_BASE), &[1]).unwrap();

    vm.with_state(|st| {
        let space = &st.spaces[&p.asid()];
        assert!(matches!(
            space.pages.find(Va::new(MMAP_BASE)),
            Some(PageState::File { .. })
        ));
    });
    // Nothing went to swap and the file still reads back unchanged.
    assert_eq!(vm.swap().slots_in_use(), 0);
    let reread = fs
        .open("mapped", None)
        .unwrap()
        .into_regular_file()
        .unwrap();
    let mut out = [0u8; 4];
    reread.read_at(&mut out, 0).unwrap();
    assert_eq!(out, [0x33; 4]);
}

#[test]
fn munmap_without_touching_writes_nothing() {
    let vm = vm_with(8, 64);
    let content = vec![0x44u8; PAGE_SIZE];
    let (fs, file) = fs_with_file(&content);

    let mut p = anon_process(&vm);
    let fd = p.install_file(file);
    let id = p.mmap(fd, Va::new(MMAP_BASE)).unwrap();
    p.munmap(id).unwrap();

    let reread = fs
        .open("mapped", None)
        .unwrap()
        .into_regular_file()
        .unwrap();
    assert_eq!(reread.len(), PAGE_SIZE);
    let mut out = [0u8; 4];
    reread.read_at(&mut out, 0).unwrap();
    assert_eq!(out, [0x44; 4]);
}

#[test]
fn many_pages_survive_heavy_eviction() {
    use rand::{Rng, SeedableRng, seq::SliceRandom};

    let vm = vm_with(3, 8 * 64);
    let mut p = anon_process(&vm);
    let mut rng = rand::rngs::StdRng::seed_from_u64(5);

    const PAGES: usize = 16;
    let mut mirror = vec![[0u8; 32]; PAGES];
    for (i, fill) in mirror.iter_mut().enumerate() {
        rng.fill(&mut fill[..]);
        p.write_user(Va::new(ANON_BASE + i * PAGE_SIZE), fill).unwrap();
    }
    assert!(vm.pool().in_use() <= 3);

    let mut order: Vec<usize> = (0..PAGES).collect();
    order.shuffle(&mut rng);
    for i in order {
        let mut out = [0u8; 32];
        p.read_user(Va::new(ANON_BASE + i * PAGE_SIZE), &mut out).unwrap();
        assert_eq!(out, mirror[i]);
    }
    check_frame_invariant(&vm);
}

//! 4-level paging engine (C3, spec §4.2).
//!
//! All walks split a 48-bit canonical virtual address into four 9-bit
//! indices (PML4/PDPT/PD/PT) plus a 12-bit page offset. Absent intermediate
//! tables are allocated through [`crate::mm::frame_allocator`], zeroed
//! through the HHDM, and linked with `present | write | (user if
//! virt < KERNEL_BASE)` when `autocreate` is set.

use core::ops::{Index, IndexMut};

use crate::errno::{Errno, KernelResult};
use crate::mm::{frame_allocator, hhdm, PageFlags, PhysAddr, VirtAddr, FRAME_SIZE, KERNEL_BASE};

const ENTRIES: usize = 512;
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Index of the first PML4 entry covering `KERNEL_BASE` (0xFFFF_8000_...).
/// Entries below this are process-private; entries at or above it are the
/// shared kernel upper half every [`crate::mm::vas::AddressSpace`] copies in.
pub const KERNEL_PML4_START: usize = 256;

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    const fn empty() -> Self {
        Self(0)
    }

    pub fn is_present(&self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    pub fn addr(&self) -> PhysAddr {
        PhysAddr::new(self.0 & ADDR_MASK)
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & !ADDR_MASK)
    }

    fn set(&mut self, addr: PhysAddr, flags: PageFlags) {
        self.0 = (addr.as_u64() & ADDR_MASK) | flags.bits();
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES],
}

impl PageTable {
    fn zero(&mut self) {
        for e in self.entries.iter_mut() {
            e.clear();
        }
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, i: usize) -> &PageTableEntry {
        &self.entries[i]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut PageTableEntry {
        &mut self.entries[i]
    }
}

struct Indices {
    l4: usize,
    l3: usize,
    l2: usize,
    l1: usize,
}

fn split(virt: VirtAddr) -> Indices {
    let a = virt.as_u64();
    Indices {
        l4: ((a >> 39) & 0x1FF) as usize,
        l3: ((a >> 30) & 0x1FF) as usize,
        l2: ((a >> 21) & 0x1FF) as usize,
        l1: ((a >> 12) & 0x1FF) as usize,
    }
}

fn table_at(phys: PhysAddr) -> &'static mut PageTable {
    let virt = hhdm::phys_to_kernel(phys);
    // SAFETY: every physical address stored in a page-table entry by this
    // module was itself allocated as a zeroed page table through this same
    // module, so the HHDM alias is a valid, exclusively-owned `PageTable`.
    unsafe { &mut *virt.as_mut_ptr::<PageTable>() }
}

/// Allocate and zero a fresh intermediate table, returning its physical
/// address.
fn alloc_table() -> KernelResult<PhysAddr> {
    let phys = frame_allocator::alloc_frame()?;
    table_at(phys).zero();
    Ok(phys)
}

/// Opaque handle to an address space's PML4 physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableRoot(pub PhysAddr);

impl PageTableRoot {
    /// Allocate a fresh, zeroed root table (no upper-half kernel mappings
    /// copied in yet — see `vas::AddressSpace::new` for that).
    pub fn new_blank() -> KernelResult<Self> {
        Ok(Self(alloc_table()?))
    }
}

/// `find_page(virt, autocreate, root) -> leaf | null`: walk the hierarchy,
/// optionally creating absent intermediate tables, and return a pointer to
/// the level-1 (leaf) entry for `virt`.
fn find_page(virt: VirtAddr, autocreate: bool, root: PageTableRoot) -> KernelResult<Option<&'static mut PageTableEntry>> {
    let idx = split(virt);
    let intermediate_flags = PageFlags::PRESENT
        | PageFlags::WRITABLE
        | if virt.as_u64() < KERNEL_BASE {
            PageFlags::USER
        } else {
            PageFlags::empty()
        };

    let l4 = table_at(root.0);
    if !l4[idx.l4].is_present() {
        if !autocreate {
            return Ok(None);
        }
        let frame = alloc_table()?;
        l4[idx.l4].set(frame, intermediate_flags);
    }
    let l3 = table_at(l4[idx.l4].addr());

    if !l3[idx.l3].is_present() {
        if !autocreate {
            return Ok(None);
        }
        let frame = alloc_table()?;
        l3[idx.l3].set(frame, intermediate_flags);
    }
    let l2 = table_at(l3[idx.l3].addr());

    if !l2[idx.l2].is_present() {
        if !autocreate {
            return Ok(None);
        }
        let frame = alloc_table()?;
        l2[idx.l2].set(frame, intermediate_flags);
    }
    let l1 = table_at(l2[idx.l2].addr());

    Ok(Some(&mut l1[idx.l1]))
}

/// `map(phys, virt, len, flags, root)`: map `len` bytes (rounded up to whole
/// pages) starting at `virt` to `phys`, autocreating intermediate tables.
pub fn map(phys: PhysAddr, virt: VirtAddr, len: u64, flags: PageFlags, root: PageTableRoot) -> KernelResult<()> {
    let pages = len.div_ceil(FRAME_SIZE);
    for i in 0..pages {
        let v = VirtAddr::new(virt.as_u64() + i * FRAME_SIZE);
        let p = PhysAddr::new(phys.as_u64() + i * FRAME_SIZE);
        let leaf = find_page(v, true, root)?.ok_or(Errno::ENOMEM)?;
        leaf.set(p, flags | PageFlags::PRESENT);
    }
    if pages == 1 {
        flush_tlb_one(virt);
    } else {
        flush_tlb_all();
    }
    Ok(())
}

/// `unmap(virt, len, root)`: clear the leaf entries covering `len` bytes
/// from `virt`. Absent pages are silently skipped.
pub fn unmap(virt: VirtAddr, len: u64, root: PageTableRoot) -> KernelResult<()> {
    let pages = len.div_ceil(FRAME_SIZE);
    for i in 0..pages {
        let v = VirtAddr::new(virt.as_u64() + i * FRAME_SIZE);
        if let Some(leaf) = find_page(v, false, root)? {
            leaf.clear();
        }
    }
    flush_tlb_all();
    Ok(())
}

/// `translate(virt, root) -> phys | null`.
pub fn translate(virt: VirtAddr, root: PageTableRoot) -> Option<PhysAddr> {
    let leaf = find_page(virt, false, root).ok()??;
    if leaf.is_present() {
        Some(PhysAddr::new(leaf.addr().as_u64() | (virt.as_u64() & 0xFFF)))
    } else {
        None
    }
}

/// Fetch (without creating) the leaf entry's flags, used by the syscall
/// dispatcher to validate user-buffer pages before copying.
pub fn leaf_flags(virt: VirtAddr, root: PageTableRoot) -> Option<PageFlags> {
    find_page(virt, false, root).ok()?.map(|e| e.flags())
}

/// Update the flags of an already-mapped leaf in place (used by
/// `memprotect`, which may only ever remove rights per spec §4.9).
pub fn set_flags(virt: VirtAddr, flags: PageFlags, root: PageTableRoot) -> KernelResult<()> {
    let leaf = find_page(virt, false, root)?.ok_or(Errno::EFAULT)?;
    if !leaf.is_present() {
        return Err(Errno::EFAULT);
    }
    let addr = leaf.addr();
    leaf.set(addr, flags | PageFlags::PRESENT);
    flush_tlb_one(virt);
    Ok(())
}

/// `flush_tlb_one(virt)`: single-page invalidation via `invlpg`.
#[cfg(target_arch = "x86_64")]
pub fn flush_tlb_one(virt: VirtAddr) {
    use x86_64::{instructions::tlb, VirtAddr as X86VirtAddr};
    tlb::flush(X86VirtAddr::new(virt.as_u64()));
}

#[cfg(not(target_arch = "x86_64"))]
pub fn flush_tlb_one(_virt: VirtAddr) {}

/// `flush_tlb_all()`: full CR3 reload, used after remaps that alter
/// higher-level tables.
#[cfg(target_arch = "x86_64")]
pub fn flush_tlb_all() {
    use x86_64::registers::control::Cr3;
    let (frame, flags) = Cr3::read();
    // SAFETY: reloading CR3 with the frame/flags just read back is a no-op
    // translation-wise and only serves to flush the TLB.
    unsafe {
        Cr3::write(frame, flags);
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn flush_tlb_all() {}

/// Activate `root` as the running CPU's address space.
#[cfg(target_arch = "x86_64")]
pub fn activate(root: PageTableRoot) {
    use x86_64::{
        registers::control::{Cr3, Cr3Flags},
        structures::paging::PhysFrame,
        PhysAddr as X86PhysAddr,
    };
    let frame = PhysFrame::containing_address(X86PhysAddr::new(root.0.as_u64()));
    // SAFETY: `root` was built by `PageTableRoot::new_blank`/`vas` and
    // contains at minimum the kernel's upper-half mappings, so switching to
    // it cannot unmap code currently executing.
    unsafe {
        Cr3::write(frame, Cr3Flags::empty());
    }
}

#[cfg(target_arch = "x86_64")]
pub fn current_root() -> PageTableRoot {
    use x86_64::registers::control::Cr3;
    let (frame, _) = Cr3::read();
    PageTableRoot(PhysAddr::new(frame.start_address().as_u64()))
}

/// Recursively free every intermediate page-table frame reachable from
/// `root`'s lower half (the process-private range below `KERNEL_BASE`),
/// plus `root` itself. Called once, last, during `AddressSpace` teardown
/// (spec §4.7 `exit`: "the address space is reclaimed last").
///
/// Never touches `root`'s upper-half (`KERNEL_PML4_START..512`) entries:
/// those are copies of the canonical kernel root's own tables, shared by
/// every address space, and must outlive any single process's exit.
///
/// Leaf (data) frames mapped by this address space are left alone -- they
/// are owned by whatever `map`'d them (`memmap`, the framebuffer, the
/// shared keyboard ring), some of which may still be referenced elsewhere,
/// and reclaiming them is that caller's responsibility, not the page
/// table's.
pub fn free_address_space(root: PageTableRoot) {
    let l4 = table_at(root.0);
    for l4_idx in 0..KERNEL_PML4_START {
        if !l4[l4_idx].is_present() {
            continue;
        }
        let l3_phys = l4[l4_idx].addr();
        let l3 = table_at(l3_phys);
        for l3_idx in 0..ENTRIES {
            if !l3[l3_idx].is_present() {
                continue;
            }
            let l2_phys = l3[l3_idx].addr();
            let l2 = table_at(l2_phys);
            for l2_idx in 0..ENTRIES {
                if l2[l2_idx].is_present() {
                    frame_allocator::free_frame(l2[l2_idx].addr());
                }
            }
            frame_allocator::free_frame(l2_phys);
        }
        frame_allocator::free_frame(l3_phys);
    }
    frame_allocator::free_frame(root.0);
}

use crate::sync::GlobalState;

/// The canonical kernel root: whatever page table Limine left active at
/// entry. Its upper-half entries are copied into every new process root at
/// creation (spec §3).
static KERNEL_ROOT: GlobalState<PageTableRoot> = GlobalState::new();

/// Record the bootloader-provided page table as the canonical kernel root.
/// Must run once, early in `mm::init`, before any process address space is
/// created.
pub fn init() {
    let _ = KERNEL_ROOT.init(current_root());
}

pub fn kernel_root() -> PageTableRoot {
    KERNEL_ROOT
        .with(|r| *r)
        .expect("page_table::init not called")
}

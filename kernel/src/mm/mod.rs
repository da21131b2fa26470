//! Memory management (C2-C4): physical frame allocator, 4-level paging
//! engine, kernel heap, HHDM, and per-process address spaces.

#![allow(dead_code)]

extern crate alloc;

pub mod frame_allocator;
pub mod heap;
pub mod hhdm;
pub mod page_table;
pub mod vas;

pub use frame_allocator::FRAME_SIZE;
pub use hhdm::{kernel_to_phys, phys_to_kernel};

/// Classification of a boot-time memory region, independent of the `limine`
/// crate's own `EntryType` so this module (compiled on both the bare-metal
/// and host test targets) never needs to depend on `crate::boot` (which only
/// exists on the bare-metal target). [`crate::boot`] converts Limine's own
/// `EntryType` into this via a `From` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    BootloaderReclaimable,
    KernelAndModules,
    Framebuffer,
}

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn frame_number(&self) -> u64 {
        self.0 / FRAME_SIZE
    }

    pub const fn is_frame_aligned(&self) -> bool {
        self.0 % FRAME_SIZE == 0
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    pub const fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    pub const fn align_down(self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    pub const fn align_up(self, align: u64) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }
}

bitflags::bitflags! {
    /// Leaf page-table entry flags, per spec §3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
        const NO_EXECUTE    = 1 << 63;
    }
}

/// Canonical split between user and kernel address ranges. Any syscall-layer
/// pointer at or above this boundary is rejected with `EFAULT` (spec §4.2).
pub const KERNEL_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Initialize C2 (frame allocator), C3 (kernel root page table) and C4
/// (kernel heap) from the Limine boot handoff. Must run before any other
/// subsystem touches memory beyond the bootloader's own identity/HHDM maps.
pub fn init(hhdm_offset: u64, regions: &[(u64, u64, MemoryRegionKind)]) {
    hhdm::set_offset(hhdm_offset);

    // Find the largest USABLE region to host the frame descriptor array,
    // per spec §4.1 ("placed in the largest usable boot region").
    let mut best: Option<(u64, u64)> = None;
    let mut highest_usable_end = 0u64;
    for &(base, len, kind) in regions {
        if kind == MemoryRegionKind::Usable {
            highest_usable_end = highest_usable_end.max(base + len);
            if best.map(|(_, l)| len > l).unwrap_or(true) {
                best = Some((base, len));
            }
        }
    }
    let (desc_region_base, _desc_region_len) = best.expect("no usable memory regions at boot");

    let total_frames = highest_usable_end.div_ceil(FRAME_SIZE);
    let desc_bytes = total_frames as usize * core::mem::size_of::<frame_allocator::FrameDescriptor>();
    let desc_frames = (desc_bytes as u64).div_ceil(FRAME_SIZE);

    let desc_phys = PhysAddr::new(desc_region_base);
    let desc_virt = hhdm::phys_to_kernel(desc_phys);
    // SAFETY: `desc_virt` is HHDM-mapped by the bootloader and the region is
    // reserved from the free list immediately below, so nothing else can
    // alias it for the remainder of boot.
    unsafe {
        core::ptr::write_bytes(desc_virt.as_mut_ptr::<u8>(), 0, desc_bytes);
        frame_allocator::init(
            desc_virt.as_mut_ptr::<frame_allocator::FrameDescriptor>(),
            total_frames,
        );
    }

    for &(base, len, kind) in regions {
        if kind == MemoryRegionKind::Usable {
            frame_allocator::add_region(PhysAddr::new(base), PhysAddr::new(base + len));
        }
    }

    // Reclaim the descriptor array's own backing frames.
    frame_allocator::mark_reserved(desc_phys, PhysAddr::new(desc_phys.as_u64() + desc_frames * FRAME_SIZE));

    page_table::init();
    heap::init();
}

//! Limine boot protocol consumption (spec §1, §4.1, §4.8).
//!
//! This is the kernel's entry point: Limine loads the ELF, jumps to
//! [`kernel_main`], and leaves every request struct below populated in
//! `.requests` for us to read. Everything downstream (C2's frame allocator,
//! C3's kernel page table, the framebuffer/ACPI info exposed to syscalls)
//! is derived from these responses rather than probing hardware directly.

use limine::memory_map::EntryType;
use limine::request::{
    FramebufferRequest, HhdmRequest, MemoryMapRequest, RequestsEndMarker, RequestsStartMarker,
    RsdpRequest,
};
#[cfg(feature = "smp")]
use limine::request::SmpRequest;
use limine::BaseRevision;

use crate::mm::MemoryRegionKind;
use crate::sync::GlobalState;

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static MEMMAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static RSDP_REQUEST: RsdpRequest = RsdpRequest::new();

#[used]
#[link_section = ".requests"]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

#[cfg(feature = "smp")]
#[used]
#[link_section = ".requests"]
static SMP_REQUEST: SmpRequest = SmpRequest::new();

#[used]
#[link_section = ".requests_start_marker"]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();
#[used]
#[link_section = ".requests_end_marker"]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();

impl From<EntryType> for MemoryRegionKind {
    fn from(kind: EntryType) -> Self {
        match kind {
            EntryType::USABLE => MemoryRegionKind::Usable,
            EntryType::ACPI_RECLAIMABLE => MemoryRegionKind::AcpiReclaimable,
            EntryType::ACPI_NVS => MemoryRegionKind::AcpiNvs,
            EntryType::BAD_MEMORY => MemoryRegionKind::BadMemory,
            EntryType::BOOTLOADER_RECLAIMABLE => MemoryRegionKind::BootloaderReclaimable,
            EntryType::KERNEL_AND_MODULES => MemoryRegionKind::KernelAndModules,
            EntryType::FRAMEBUFFER => MemoryRegionKind::Framebuffer,
            _ => MemoryRegionKind::Reserved,
        }
    }
}

/// Framebuffer geometry handed back by the `GET_FB` syscall (spec §6).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FbInfo {
    pub pointer: u64,
    pub scanline: u64,
    pub width: u64,
    pub height: u64,
    pub bpp: u16,
}

static FB_INFO: GlobalState<FbInfo> = GlobalState::new();
static RSDP_PHYS: GlobalState<u64> = GlobalState::new();

pub fn framebuffer_info() -> Option<FbInfo> {
    FB_INFO.with(|fb| *fb)
}

pub fn rsdp_phys_addr() -> Option<u64> {
    RSDP_PHYS.with(|addr| *addr)
}

/// Verify the Limine base revision marker above is one the bootloader
/// understands. Every Limine-booted binary this kernel produces -- the
/// real kernel image and the data-structure-level integration tests under
/// `kernel/tests/` alike -- must check this before touching any other
/// Limine response.
pub fn assert_base_revision_supported() {
    assert!(BASE_REVISION.is_supported(), "unsupported Limine base revision");
}

/// Consume the HHDM offset and memory map responses and bring up C2-C4
/// (`mm::init`). Split out of [`kernel_entry`] so integration tests that
/// need a working heap/page table but not the rest of boot (LAPIC/IOAPIC,
/// process bootstrap) can call just this much.
///
/// # Safety
/// Must be called at most once, before anything touches `crate::mm`.
pub unsafe fn init_memory_for_tests() -> u64 {
    assert_base_revision_supported();

    let hhdm_offset = HHDM_REQUEST
        .get_response()
        .expect("Limine did not answer the HHDM request")
        .offset();

    let memmap = MEMMAP_REQUEST
        .get_response()
        .expect("Limine did not answer the memory map request");

    let regions: alloc::vec::Vec<(u64, u64, MemoryRegionKind)> = memmap
        .entries()
        .iter()
        .map(|e| (e.base, e.length, MemoryRegionKind::from(e.entry_type)))
        .collect();

    crate::mm::init(hhdm_offset, &regions);
    hhdm_offset
}

/// Entry point invoked by `main.rs`'s `_start`. Limine transfers control to
/// `_start` on the bootstrap processor with paging already enabled and an
/// identity map plus the HHDM active; everything past this point assumes
/// that environment (spec §1).
///
/// # Safety
/// Must be called exactly once, as the very first thing `_start` does.
pub unsafe fn kernel_entry() -> ! {
    crate::logger::init();

    init_memory_for_tests();

    crate::arch::x86_64::init();

    if let Some(rsdp) = RSDP_REQUEST.get_response() {
        let _ = RSDP_PHYS.init(rsdp.address() as u64);
    }

    if let Some(fb) = FRAMEBUFFER_REQUEST.get_response().and_then(|r| r.framebuffers().next()) {
        let _ = FB_INFO.init(FbInfo {
            pointer: fb.addr() as u64,
            scanline: fb.pitch(),
            width: fb.width(),
            height: fb.height(),
            bpp: fb.bpp(),
        });
    }

    crate::bootstrap::kernel_init();
}

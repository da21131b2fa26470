//! Higher-half direct map (spec §3, §9): a single constant virtual offset at
//! which every physical frame is reachable from kernel mode. `phys_to_kernel`
//! and `kernel_to_phys` are the only sanctioned ways to cross the boundary.

use core::sync::atomic::{AtomicU64, Ordering};

use super::{PhysAddr, VirtAddr};

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the HHDM offset supplied by the Limine boot handoff. Must be
/// called exactly once, before any call to `phys_to_kernel`/`kernel_to_phys`.
pub fn set_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

pub fn offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// `phys_to_kernel(p)`: the kernel-virtual address at which physical frame
/// `p` is mapped via the direct map.
pub fn phys_to_kernel(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u64() + offset())
}

/// `kernel_to_phys(v)`: the physical address backing an HHDM kernel-virtual
/// address. Callers must only pass addresses obtained from
/// `phys_to_kernel`.
pub fn kernel_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new(virt.as_u64() - offset())
}

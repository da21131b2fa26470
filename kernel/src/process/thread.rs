//! Thread control block and register frame (C8, spec §3/§4.7).
//!
//! A thread's entire execution state lives in one 240-byte [`RegisterFrame`]:
//! every general-purpose register, the four non-`iretq` segment registers,
//! `cr3`, the per-thread FS/GS base shadow MSRs, and the `iretq` frame
//! (`rip`, `cs`, `rflags`, `rsp`, `ss`) the ring-3 entry/exit path consumes
//! directly. `assign_thread_to_cpu` (in [`super::table`]) loads this frame
//! onto the kernel stack and `iretq`s into it.

extern crate alloc;

use alloc::string::String;

use crate::errno::KernelResult;
use crate::mm::vas::AddressSpace;
use crate::mm::{PageFlags, VirtAddr, FRAME_SIZE};

pub type Tid = u64;

/// Thread execution state (spec §3 "Thread").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Asleep,
    Dead,
}

/// The full saved CPU state of a non-running thread (spec §3: "240-byte
/// register snapshot (all GP regs, segment regs, control regs, iretq
/// frame)"). Exactly 30 `u64` fields = 240 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RegisterFrame {
    // General-purpose registers (rsp lives in the iretq frame below).
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    // Trap bookkeeping pushed by the common ISR/syscall trampoline.
    pub vector: u64,
    pub error_code: u64,
    // The `iretq` frame, popped by the CPU on return to the interrupted
    // privilege level.
    pub iretq_rip: u64,
    pub iretq_cs: u64,
    pub iretq_rflags: u64,
    pub iretq_rsp: u64,
    pub iretq_ss: u64,
    // Segment registers not covered by the iretq frame.
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
    // Control/MSR state restored on context switch.
    pub cr3: u64,
    pub cr2: u64,
    pub fs_base: u64,
    pub gs_base: u64,
}

const _: () = assert!(core::mem::size_of::<RegisterFrame>() == 240);

impl RegisterFrame {
    pub const fn zeroed() -> Self {
        // SAFETY-free: an all-zero bit pattern is a valid `RegisterFrame`
        // (every field is a plain `u64`).
        unsafe { core::mem::zeroed() }
    }
}

/// Default size of a user-mode thread stack, including its guard page.
pub const USER_STACK_SIZE: u64 = 16 * FRAME_SIZE;
/// Default size of a thread's ring-0 stack (used on ring-3 -> ring-0
/// transitions via the TSS `RSP0` / per-thread kernel stack).
pub const KERNEL_STACK_SIZE: u64 = 4 * FRAME_SIZE;

/// Fixed virtual region new user stacks are carved out of; real allocation
/// policy (ASLR, per-process bump pointer) is left to callers that reuse
/// [`Thread::new`] with an explicit `stack_top`.
pub const DEFAULT_USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_F000;

pub struct Thread {
    pub tid: Tid,
    /// Position of this thread within its parent's thread list (spec §3
    /// "index-in-parent"), used by per-core scratch slots.
    pub index_in_parent: usize,
    pub name: String,
    pub state: ThreadState,
    pub parent_pid: u64,
    /// Top (highest address) of the user stack this thread was given.
    pub stack_top: VirtAddr,
    /// Top of the thread's kernel stack, loaded into the TSS `RSP0` field
    /// whenever this thread is dispatched (spec §3 "per-CPU scratch
    /// pointer" realized as the TSS stack-pointer slot).
    pub kernel_stack_top: VirtAddr,
    pub frame: RegisterFrame,
}

impl Thread {
    /// Allocate a guarded user stack in `space` and build the initial
    /// register frame (spec §4.7 `create_thread`): `iretq_cs = USER_CS`,
    /// `iretq_ss = USER_DS`, `iretq_rflags = 0x202` (interrupts enabled),
    /// `iretq_rip = entry`, `rdi = arg`, `cr3 = phys(address-space-root)`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tid: Tid,
        index_in_parent: usize,
        parent_pid: u64,
        name: String,
        entry: u64,
        arg: u64,
        stack_top: u64,
        space: &AddressSpace,
        user_cs: u64,
        user_ss: u64,
    ) -> KernelResult<Self> {
        let guard_page = VirtAddr::new(stack_top - USER_STACK_SIZE);
        let stack_base = VirtAddr::new(guard_page.as_u64() + FRAME_SIZE);
        let stack_pages = USER_STACK_SIZE / FRAME_SIZE - 1;

        for i in 0..stack_pages {
            let phys = crate::mm::frame_allocator::alloc_frame()?;
            let virt = VirtAddr::new(stack_base.as_u64() + i * FRAME_SIZE);
            crate::mm::page_table::map(
                phys,
                virt,
                FRAME_SIZE,
                PageFlags::WRITABLE | PageFlags::USER | PageFlags::NO_EXECUTE,
                space.root,
            )?;
        }
        // The guard page (lowest page of the region) is deliberately left
        // unmapped, so a stack overflow faults instead of corrupting the
        // next allocation.

        let kernel_stack_top = alloc_kernel_stack()?;

        let mut frame = RegisterFrame::zeroed();
        frame.iretq_cs = user_cs;
        frame.iretq_ss = user_ss;
        frame.iretq_rflags = 0x202;
        frame.iretq_rip = entry;
        frame.iretq_rsp = stack_top;
        frame.rdi = arg;
        frame.cr3 = space.root_phys().as_u64();

        Ok(Self {
            tid,
            index_in_parent,
            name,
            state: ThreadState::Ready,
            parent_pid,
            stack_top: VirtAddr::new(stack_top),
            kernel_stack_top,
            frame,
        })
    }
}

/// Fixed kernel-virtual window ring-0 stacks are bump-allocated from, one
/// guard page apart, mirroring the fixed window [`crate::mm::heap`] uses for
/// the kernel heap. Frames backing each stack need not be physically
/// contiguous -- they are mapped page by page through C3.
const KSTACK_BASE: u64 = 0xFFFF_9100_0000_0000;
static KSTACK_NEXT: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(KSTACK_BASE);

/// Carve out the next `KERNEL_STACK_SIZE` slot (plus a one-page gap acting
/// as a guard page) and map it present|writable in the kernel root. Returns
/// the top (highest address) of the mapped stack.
fn alloc_kernel_stack() -> KernelResult<VirtAddr> {
    use core::sync::atomic::Ordering;

    let slot = KSTACK_NEXT.fetch_add(KERNEL_STACK_SIZE + FRAME_SIZE, Ordering::Relaxed);
    let base = VirtAddr::new(slot);
    let pages = KERNEL_STACK_SIZE / FRAME_SIZE;
    let kernel_root = crate::mm::page_table::kernel_root();
    for i in 0..pages {
        let phys = crate::mm::frame_allocator::alloc_frame()?;
        let virt = VirtAddr::new(base.as_u64() + i * FRAME_SIZE);
        crate::mm::page_table::map(phys, virt, FRAME_SIZE, PageFlags::WRITABLE, kernel_root)?;
    }
    Ok(VirtAddr::new(base.as_u64() + KERNEL_STACK_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_frame_is_240_bytes() {
        assert_eq!(core::mem::size_of::<RegisterFrame>(), 240);
    }

    #[test]
    fn zeroed_frame_has_zero_rip() {
        let f = RegisterFrame::zeroed();
        assert_eq!(f.iretq_rip, 0);
    }
}

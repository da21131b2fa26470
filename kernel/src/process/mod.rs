//! Process and thread model (C8, spec §3/§4.7/§5).
//!
//! Three pieces: [`thread`] (the 240-byte [`thread::RegisterFrame`] and
//! per-thread stacks), [`pcb`] (the process control block: address space,
//! fd table, cwd, thread list), and [`table`] (the global process table and
//! cooperative ready queue). The actual `iretq` resume sits in
//! [`crate::arch::x86_64::context::resume`] since it's inherently
//! architecture-specific; everything in this module operates on the
//! architecture-neutral [`thread::RegisterFrame`] it consumes.

pub mod pcb;
pub mod table;
pub mod thread;

pub use pcb::{Pid, Process, ProcessState, MAX_FDS};
pub use table::{
    all_pids, create_proc, create_thread, current, exists, exit, requeue_current, with_process,
};
pub use thread::{RegisterFrame, Thread, ThreadState, Tid};

/// User code segment selector (GDT index 6, RPL 3) -- see
/// [`crate::arch::x86_64::gdt`]'s `0x30 (+ RPL 3 = 0x33)` user code entry.
pub const USER_CS: u64 = 0x33;
/// User data segment selector (GDT index 5, RPL 3) -- `0x28 (+ RPL 3 =
/// 0x2B)` user data entry.
pub const USER_SS: u64 = 0x2B;

/// Name and uid of the first process (spec §4.7 "the kernel starts exactly
/// one process at boot").
const INIT_NAME: &str = "init";
const INIT_UID: u32 = 0;

/// Create PID 1 with no parent, running at `entry` with `arg` in `rdi`.
/// Called once from the boot sequence after C2-C7 are up; the caller then
/// hands control to the scheduler via [`dispatch`].
pub fn init(entry: u64, arg: u64) -> crate::errno::KernelResult<Pid> {
    let pid = create_proc(INIT_NAME, None, INIT_UID)?;
    create_thread(pid, INIT_NAME, entry, arg)?;
    Ok(pid)
}

/// Pop the next ready thread and resume it. Never returns if one was
/// found; returns `false` only when the ready queue is empty (callers
/// typically `hlt` and retry on the next tick in that case).
pub fn dispatch() -> bool {
    match table::assign_thread_to_cpu() {
        Some((_, _, frame)) => {
            crate::arch::x86_64::gdt::set_kernel_stack(
                current_kernel_stack_top().unwrap_or(frame.iretq_rsp),
            );
            // SAFETY: `assign_thread_to_cpu` only returns frames built by
            // `Thread::new` or saved by a previous trap; both uphold
            // `resume`'s invariants.
            unsafe { crate::arch::x86_64::context::resume(&frame) };
        }
        None => false,
    }
}

/// The kernel stack top of the thread `dispatch` is about to resume, so the
/// TSS `RSP0` is correct before the first `iretq`-path trap happens on it.
fn current_kernel_stack_top() -> Option<u64> {
    let (pid, tid) = current()?;
    with_process(pid, |p| p.thread(tid).map(|t| t.kernel_stack_top.as_u64()))?
}

/// Cooperative yield: save `frame` as the calling thread's state, put it
/// back on the ready queue, and dispatch whatever runs next. Called from
/// the syscall return path (e.g. a blocking read, or an explicit yield
/// syscall) -- spec §5's cooperative preemption model has no timer-driven
/// involuntary switch.
pub fn yield_current(frame: RegisterFrame) -> ! {
    requeue_current(frame);
    loop {
        if !dispatch() {
            crate::arch::x86_64::halt();
        }
    }
}

/// Tear down the calling process and dispatch the next ready thread.
/// Matches spec §4.7 `exit`: never returns to the caller.
pub fn exit_current(pid: Pid) -> ! {
    exit(pid);
    loop {
        if !dispatch() {
            crate::arch::x86_64::halt();
        }
    }
}

//! Thread context switch primitive (C8, spec §4.7/§5).
//!
//! [`resume`] is the single place that turns a saved
//! [`RegisterFrame`](crate::process::thread::RegisterFrame) back into a
//! running CPU state: it loads `cr3`, restores every general-purpose and
//! segment register, and `iretq`s into the saved `rip`/`cs`/`rflags`/`rsp`/
//! `ss`. It is used both the first time a thread runs (a freshly built
//! frame with a zeroed register file) and to resume a thread that yielded
//! or was preempted -- there is no separate "first entry" path, unlike the
//! old `enter_usermode`-only design this replaces.

use core::arch::asm;

use crate::process::thread::RegisterFrame;

/// Load `frame` onto the current CPU and never return. The caller is
/// responsible for having already stashed whatever state belongs to the
/// previously running thread (see [`crate::process::table::requeue_current`]).
///
/// # Safety
/// `frame.cr3` must be a valid page-table root mapping the GDT/IDT/current
/// kernel code, `frame.iretq_rip`/`frame.iretq_rsp` must point at valid,
/// appropriately-permissioned memory for the target privilege level, and
/// the TSS `RSP0` must already reflect this thread's kernel stack (spec
/// §4.7 per-thread kernel stack).
pub unsafe fn resume(frame: &RegisterFrame) -> ! {
    // SAFETY: caller-documented invariants; every field read here was
    // either supplied by `Thread::new` or saved by a previous `iretq`-path
    // trap, so the frame's layout always matches what this asm expects.
    unsafe {
        asm!(
            "mov cr3, {cr3}",
            "mov ds, {ds:x}",
            "mov es, {es:x}",
            "mov fs, {fs:x}",
            "mov gs, {gs:x}",
            "push {ss}",
            "push {rsp}",
            "push {rflags}",
            "push {cs}",
            "push {rip}",
            "mov r15, {r15}",
            "mov r14, {r14}",
            "mov r13, {r13}",
            "mov r12, {r12}",
            "mov r11, {r11}",
            "mov r10, {r10}",
            "mov r9, {r9}",
            "mov r8, {r8}",
            "mov rbp, {rbp}",
            "mov rdi, {rdi}",
            "mov rsi, {rsi}",
            "mov rdx, {rdx}",
            "mov rcx, {rcx}",
            "mov rbx, {rbx}",
            "mov rax, {rax}",
            "iretq",
            cr3 = in(reg) frame.cr3,
            ds = in(reg) frame.ds,
            es = in(reg) frame.es,
            fs = in(reg) frame.fs,
            gs = in(reg) frame.gs,
            ss = in(reg) frame.iretq_ss,
            rsp = in(reg) frame.iretq_rsp,
            rflags = in(reg) frame.iretq_rflags,
            cs = in(reg) frame.iretq_cs,
            rip = in(reg) frame.iretq_rip,
            r15 = in(reg) frame.r15,
            r14 = in(reg) frame.r14,
            r13 = in(reg) frame.r13,
            r12 = in(reg) frame.r12,
            r11 = in(reg) frame.r11,
            r10 = in(reg) frame.r10,
            r9 = in(reg) frame.r9,
            r8 = in(reg) frame.r8,
            rbp = in(reg) frame.rbp,
            rdi = in(reg) frame.rdi,
            rsi = in(reg) frame.rsi,
            rdx = in(reg) frame.rdx,
            rcx = in(reg) frame.rcx,
            rbx = in(reg) frame.rbx,
            rax = in(reg) frame.rax,
            options(noreturn)
        );
    }
}

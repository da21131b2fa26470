//! Syscall dispatcher (C10, spec §4.9, §6).
//!
//! Ring-3 entry is `int 0x80` (spec §6): call number in `rax`, up to five
//! arguments in `rbx`, `rcx`, `rdx`, `rsi`, `rdi`, return in `rax` as a
//! signed value (negative = `-errno`). [`arch::x86_64::idt::syscall_gate`]
//! is the naked-asm trampoline that reshuffles those registers into the
//! System V argument registers and calls [`dispatch_from_gate`], which never
//! runs with a borrowed kernel stack frame the way the `extern "x86-interrupt"`
//! ISR stubs do -- the call table below is the only place call numbers are
//! interpreted.
//!
//! Grounded in `original_source/src/syscall/syscall.c`'s `syscall_handler`:
//! argument classification happens per-call (each helper validates and
//! copies exactly the pointers its own signature needs) rather than via a
//! generic declared-shape table, since Rust's type system already pins each
//! syscall's argument types at its call site.

pub mod filesystem;
pub mod memory;
pub mod userspace;

use crate::errno::{Errno, KernelResult};

/// Syscall call numbers (spec §6).
#[allow(dead_code)]
pub mod nr {
    pub const READ: u64 = 0;
    pub const WRITE: u64 = 1;
    pub const OPEN: u64 = 2;
    pub const CLOSE: u64 = 3;
    pub const STAT: u64 = 4;
    pub const FSTAT: u64 = 5;
    pub const LSTAT: u64 = 6;
    pub const LSEEK: u64 = 8;
    pub const GETDENTS: u64 = 9;
    pub const MKDIR: u64 = 10;
    pub const CHDIR: u64 = 18;
    pub const FCHDIR: u64 = 19;
    pub const GETCWD: u64 = 20;
    pub const MEMMAP: u64 = 0x40;
    pub const MEMMAP_FROM_BUFFER: u64 = 0x41;
    pub const MEMMAP_FILE: u64 = 0x42;
    pub const MEMPROTECT: u64 = 0x43;
    pub const ALLOC_PAGE: u64 = 0x44;
    pub const GET_FB: u64 = 0x45;
    pub const GET_KB: u64 = 0x46;
    pub const PRINT: u64 = 0x47;
    pub const PRINT_PTR: u64 = 0x48;
    pub const KB_READ: u64 = 0x49;
    pub const SLEEP: u64 = 0x4A;
}

/// Route one syscall to its handler. Kept separate from
/// [`dispatch_from_gate`] so host-target unit tests can drive it without
/// the naked-asm gate (which only exists on the bare-metal target).
fn dispatch(call: u64, a0: u64, a1: u64, a2: u64, a3: u64, a4: u64) -> KernelResult<i64> {
    use filesystem::*;
    use memory::*;
    use nr::*;

    match call {
        READ => sys_read(a0, a1, a2),
        WRITE => sys_write(a0, a1, a2),
        OPEN => sys_open(a0, a1, a2),
        CLOSE => sys_close(a0),
        STAT => sys_stat(a0, a1),
        FSTAT => sys_fstat(a0, a1),
        LSTAT => sys_lstat(a0, a1),
        LSEEK => sys_lseek(a0, a1, a2),
        GETDENTS => sys_getdents(a0, a1, a2),
        MKDIR => sys_mkdir(a0, a1),
        CHDIR => sys_chdir(a0),
        FCHDIR => sys_fchdir(a0),
        GETCWD => sys_getcwd(a0, a1),
        MEMMAP => sys_memmap(a0, a1, a2),
        MEMMAP_FROM_BUFFER => sys_memmap_from_buffer(a0, a1, a2, a3, a4),
        MEMMAP_FILE => sys_memmap_file(a0, a1, a2, a3, a4),
        MEMPROTECT => sys_memprotect(a0, a1, a2),
        ALLOC_PAGE => sys_alloc_page(a0),
        GET_FB => sys_get_fb(a0, a1),
        GET_KB => sys_get_kb(a0),
        PRINT => sys_print(a0),
        PRINT_PTR => sys_print_ptr(a0),
        KB_READ => sys_kb_read(),
        SLEEP => sys_sleep(a0),
        _ => Err(Errno::ENOSYS),
    }
}

/// Entry point called from [`arch::x86_64::idt::syscall_gate`]'s naked asm
/// (spec §6 ABI: call number first, then up to five arguments). Collapses
/// any [`Errno`] to `-errno` in the return value, matching spec §7's "the
/// syscall dispatcher converts any kernel-level sentinel to a negative
/// errno in rax; no partial effect is visible on `EFAULT` paths" -- every
/// handler above either fully succeeds or returns before mutating anything
/// observable by the caller.
///
/// Not itself gated to the bare-metal target: [`arch::x86_64::idt`]'s naked
/// `syscall_gate` trampoline references this symbol unconditionally (it
/// compiles on the host test target too, just never executes there).
pub extern "C" fn dispatch_from_gate(call: u64, a0: u64, a1: u64, a2: u64, a3: u64, a4: u64) -> i64 {
    match dispatch(call, a0, a1, a2, a3, a4) {
        Ok(ret) => ret,
        Err(errno) => -errno.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_call_number_is_enosys() {
        assert_eq!(dispatch(0xFFFF, 0, 0, 0, 0, 0), Err(Errno::ENOSYS));
    }
}

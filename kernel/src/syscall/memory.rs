//! Memory and misc syscalls (spec §4.9, §6): `MEMMAP`, `MEMMAP_FROM_BUFFER`,
//! `MEMMAP_FILE`, `MEMPROTECT`, `ALLOC_PAGE`, `GET_FB`, `GET_KB`, `PRINT`,
//! `PRINT_PTR`, `KB_READ`, `SLEEP`.
//!
//! Grounded in `original_source/src/syscall/mm/*.c`: every mapping syscall
//! round-trips through the *caller's* address space (never the kernel's),
//! and `memprotect` is checked against the permissions recorded at mapping
//! time (`crate::mm::vas::AddressSpace::mapping_created_flags`), not against
//! whatever the live page table entry says, so a prior narrowing can't be
//! "widened back" by calling it twice.

extern crate alloc;

use crate::errno::{Errno, KernelResult};
use crate::mm::page_table::{self, PageTableRoot};
use crate::mm::{frame_allocator, hhdm, PageFlags, VirtAddr, FRAME_SIZE, KERNEL_BASE};
use crate::{kbd, process, timer};

use super::userspace::{copy_string_from_user, copy_to_kernel, copy_to_user};

bitflags::bitflags! {
    /// `memmap`/`memprotect` flag bits (spec §6: "WR=1, EX=2").
    struct MemFlags: u64 {
        const WR = 1;
        const EX = 2;
    }
}

fn page_flags_for(bits: u64) -> PageFlags {
    let mem = MemFlags::from_bits_truncate(bits);
    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if mem.contains(MemFlags::WR) {
        flags |= PageFlags::WRITABLE;
    }
    if !mem.contains(MemFlags::EX) {
        flags |= PageFlags::NO_EXECUTE;
    }
    flags
}

fn current_root_and_pid() -> KernelResult<(process::Pid, PageTableRoot)> {
    let (pid, _tid) = process::current().ok_or(Errno::EFAULT)?;
    let root = process::with_process(pid, |p| p.space.root).ok_or(Errno::EFAULT)?;
    Ok((pid, root))
}

/// Reject any request that would map/protect into kernel space, whether or
/// not the caller also passed `flags::USER` -- this is the syscall-layer
/// enforcement of the fixed canonical boundary (spec §4.2).
fn reject_kernel_range(addr: u64, len: u64) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = addr.checked_add(len).ok_or(Errno::EINVAL)?;
    if addr >= KERNEL_BASE || end > KERNEL_BASE {
        return Err(Errno::EFAULT);
    }
    Ok(())
}

/// `memmap(addr, len, flags)` (syscall 0x40): anonymous mapping, frames
/// allocated fresh from C2 and zeroed through the HHDM before being linked
/// into the caller's address space.
pub fn sys_memmap(addr: u64, len: u64, flags: u64) -> KernelResult<i64> {
    reject_kernel_range(addr, len)?;
    let (pid, root) = current_root_and_pid()?;
    let page_flags = page_flags_for(flags);

    let pages = len.div_ceil(FRAME_SIZE);
    for i in 0..pages {
        let phys = frame_allocator::alloc_frame()?;
        let virt = hhdm::phys_to_kernel(phys);
        // SAFETY: freshly allocated frame, not yet aliased anywhere else.
        unsafe { core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, FRAME_SIZE as usize) };
        page_table::map(phys, VirtAddr::new(addr + i * FRAME_SIZE), FRAME_SIZE, page_flags, root)?;
    }

    process::with_process(pid, |p| p.space.record_mapping(addr, pages * FRAME_SIZE, page_flags))
        .ok_or(Errno::EFAULT)?;
    Ok(0)
}

/// `memmap_from_buffer(addr, len, flags, ubuf, ubuflen)` (syscall 0x41): like
/// `memmap`, then seeds the new pages with up to `min(len, ubuflen)` bytes
/// copied from the caller's own buffer.
pub fn sys_memmap_from_buffer(addr: u64, len: u64, flags: u64, ubuf: u64, ubuflen: u64) -> KernelResult<i64> {
    sys_memmap(addr, len, flags)?;
    let n = len.min(ubuflen) as usize;
    if n == 0 {
        return Ok(0);
    }
    let mut tmp = alloc::vec![0u8; n];
    copy_to_kernel(&mut tmp, ubuf)?;
    copy_to_user(addr, &tmp)?;
    Ok(0)
}

/// `memmap_file(addr, len, flags, fd, file_off)` (syscall 0x42): `memmap`,
/// then fill the new pages by reading from `fd` at `file_off`. Grounded in
/// `original_source/src/syscall/mm/memmap_file.c`, which reads through the
/// same `vfs_handle_read` the `read()` syscall uses rather than any
/// page-cache-backed fault path -- this kernel has no lazy-fault page cache
/// (spec Non-goals), so the whole mapping is populated eagerly, up front.
pub fn sys_memmap_file(addr: u64, len: u64, flags: u64, fd: u64, file_off: u64) -> KernelResult<i64> {
    sys_memmap(addr, len, flags)?;

    let pid = process::current().ok_or(Errno::EFAULT)?.0;
    let n = process::with_process(pid, |p| -> KernelResult<usize> {
        let slot = p.fds.get_mut(fd as usize).ok_or(Errno::EBADF)?;
        let handle = slot.as_mut().ok_or(Errno::EBADF)?;
        handle.seek(file_off as i64, crate::fs::SeekWhence::Set)?;
        let mut buf = alloc::vec![0u8; len as usize];
        let n = handle.read(&mut buf)?;
        copy_to_user(addr, &buf[..n])?;
        Ok(n)
    })
    .ok_or(Errno::EFAULT)??;
    Ok(n as i64)
}

/// `memprotect(addr, len, flags)` (syscall 0x43, spec B3): MUST NOT add any
/// permission the mapping lacked at creation.
pub fn sys_memprotect(addr: u64, len: u64, flags: u64) -> KernelResult<i64> {
    reject_kernel_range(addr, len)?;
    let (pid, root) = current_root_and_pid()?;
    let requested = page_flags_for(flags);

    let created = process::with_process(pid, |p| p.space.mapping_created_flags(addr))
        .ok_or(Errno::EFAULT)?
        .ok_or(Errno::EINVAL)?;

    // A bit is "added" if it's set in `requested` but was clear at creation.
    // `NO_EXECUTE` is inverted (its presence *removes* a right), so compare
    // rights, not raw bits: WRITABLE and "executable" (`!NO_EXECUTE`).
    let adds_write = requested.contains(PageFlags::WRITABLE) && !created.contains(PageFlags::WRITABLE);
    let adds_exec = !requested.contains(PageFlags::NO_EXECUTE) && created.contains(PageFlags::NO_EXECUTE);
    if adds_write || adds_exec {
        return Err(Errno::EINVAL);
    }

    let pages = len.div_ceil(FRAME_SIZE);
    for i in 0..pages {
        page_table::set_flags(VirtAddr::new(addr + i * FRAME_SIZE), requested, root)?;
    }
    Ok(0)
}

/// `alloc_page()` (syscall 0x44): a single anonymous page at whatever
/// address the caller already recorded as free -- the original leaves
/// address selection to a userland allocator that tracks its own heap
/// break, so the kernel side is just `memmap` of one page with RW, no EX.
pub fn sys_alloc_page(addr: u64) -> KernelResult<i64> {
    sys_memmap(addr, FRAME_SIZE, 1)
}

/// `get_fb(addr, info_ubuf)` (syscall 0x45): map the framebuffer physical
/// memory at `addr` in the caller's address space and fill an `fb_info`
/// struct (spec §6) at `info_ubuf` describing it from the caller's point of
/// view (`pointer` is the *user* address, not the kernel HHDM one).
///
/// Only buildable on the bare-metal target: `crate::boot` (the Limine
/// response wrappers) doesn't exist on the host test target, same reason
/// [`sys_get_kb`] is gated below.
#[cfg(target_os = "none")]
pub fn sys_get_fb(addr: u64, info_ubuf: u64) -> KernelResult<i64> {
    let fb = crate::boot::framebuffer_info().ok_or(Errno::ENOSYS)?;
    reject_kernel_range(addr, fb.scanline * fb.height)?;

    let (pid, root) = current_root_and_pid()?;
    let fb_phys = hhdm::kernel_to_phys(VirtAddr::new(fb.pointer));
    let len = (fb.scanline * fb.height).div_ceil(FRAME_SIZE) * FRAME_SIZE;
    let page_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::NO_EXECUTE;
    page_table::map(fb_phys, VirtAddr::new(addr), len, page_flags, root)?;
    process::with_process(pid, |p| p.space.record_mapping(addr, len, page_flags)).ok_or(Errno::EFAULT)?;

    let info = crate::boot::FbInfo { pointer: addr, ..fb };
    let bytes = unsafe {
        core::slice::from_raw_parts(
            &info as *const crate::boot::FbInfo as *const u8,
            core::mem::size_of::<crate::boot::FbInfo>(),
        )
    };
    copy_to_user(info_ubuf, bytes)?;
    Ok(0)
}

#[cfg(not(target_os = "none"))]
pub fn sys_get_fb(_addr: u64, _info_ubuf: u64) -> KernelResult<i64> {
    Err(Errno::ENOSYS)
}

/// `get_kb(addr)` (syscall 0x46): map the shared keyboard-event ring
/// (spec §6) read-only at `addr` in the caller's address space.
#[cfg(target_os = "none")]
pub fn sys_get_kb(addr: u64) -> KernelResult<i64> {
    reject_kernel_range(addr, FRAME_SIZE)?;
    let (pid, root) = current_root_and_pid()?;
    let phys = kbd::shared_frame()?;
    let page_flags = PageFlags::PRESENT | PageFlags::USER | PageFlags::NO_EXECUTE;
    page_table::map(phys, VirtAddr::new(addr), FRAME_SIZE, page_flags, root)?;
    process::with_process(pid, |p| p.space.record_mapping(addr, FRAME_SIZE, page_flags)).ok_or(Errno::EFAULT)?;
    Ok(0)
}

#[cfg(not(target_os = "none"))]
pub fn sys_get_kb(_addr: u64) -> KernelResult<i64> {
    Err(Errno::ENOSYS)
}

/// `print(ustr)` (syscall 0x47): debug print of a NUL-terminated user
/// string (spec §7: "debug console prints one-line diagnostics").
pub fn sys_print(ustr: u64) -> KernelResult<i64> {
    let s = copy_string_from_user(ustr, crate::fs::PATH_MAX)?;
    crate::println!("[user] {s}");
    Ok(0)
}

/// `print_ptr(value)` (syscall 0x48): debug print of a raw 64-bit value.
pub fn sys_print_ptr(value: u64) -> KernelResult<i64> {
    crate::println!("[user] 0x{value:016x}");
    Ok(0)
}

/// `kb_read()` (syscall 0x49): blocking single-byte read. This core has no
/// blocking-queue primitive (spec §5: cooperative only), so it busy-polls
/// the ring, same as `sleep_ms` busy-waits the PIT.
pub fn sys_kb_read() -> KernelResult<i64> {
    loop {
        if let Some(ev) = kbd::read() {
            return Ok(ev.code as i64);
        }
        core::hint::spin_loop();
    }
}

/// `sleep(ms)` (syscall 0x4A).
pub fn sys_sleep(ms: u64) -> KernelResult<i64> {
    timer::sleep_ms(ms);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_flags_wr_adds_writable() {
        let f = page_flags_for(MemFlags::WR.bits());
        assert!(f.contains(PageFlags::WRITABLE));
        assert!(f.contains(PageFlags::NO_EXECUTE));
    }

    #[test]
    fn page_flags_ex_clears_no_execute() {
        let f = page_flags_for(MemFlags::EX.bits());
        assert!(!f.contains(PageFlags::NO_EXECUTE));
        assert!(!f.contains(PageFlags::WRITABLE));
    }

    #[test]
    fn reject_kernel_range_catches_boundary_crossing() {
        assert!(reject_kernel_range(KERNEL_BASE - 0x1000, 0x2000).is_err());
        assert!(reject_kernel_range(0x1000, 0x1000).is_ok());
    }
}

//! User-memory access from the syscall dispatcher (spec §4.9).
//!
//! Grounded in `original_source/src/syscall/syscall.c`'s
//! `_syscall_helper_check_str_ptr_perms`: every pointer handed across the
//! `int 0x80` boundary is validated against the *calling process's* page
//! tables before it is touched, one page at a time, and any failure aborts
//! with `EFAULT` before partial effect. Unlike the original, which prints a
//! diagnostic and presses on, this returns the error straight to the
//! dispatcher.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::errno::{Errno, KernelResult};
use crate::mm::page_table::{self, PageTableRoot};
use crate::mm::{hhdm, PageFlags, VirtAddr, FRAME_SIZE};
use crate::process;

/// The page table root of whichever process is currently executing the
/// syscall. Every copy helper in this module walks this root, never the
/// kernel's own.
fn current_root() -> KernelResult<PageTableRoot> {
    let (pid, _tid) = process::current().ok_or(Errno::EFAULT)?;
    process::with_process(pid, |p| p.space.root).ok_or(Errno::EFAULT)
}

/// Validate that every page covering `[addr, addr + len)` is present and
/// user-accessible in `root`, and additionally writable if `write` is set.
/// Used both standalone (`memprotect`'s target range) and as the first pass
/// of the copy helpers below, so a copy never writes a partial result before
/// discovering a later page is unmapped.
fn validate_range(addr: u64, len: u64, write: bool, root: PageTableRoot) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    let mut page = addr & !(FRAME_SIZE - 1);
    let end = addr + len;
    while page < end {
        let flags = page_table::leaf_flags(VirtAddr::new(page), root).ok_or(Errno::EFAULT)?;
        if !flags.contains(PageFlags::PRESENT) || !flags.contains(PageFlags::USER) {
            return Err(Errno::EFAULT);
        }
        if write && !flags.contains(PageFlags::WRITABLE) {
            return Err(Errno::EFAULT);
        }
        page += FRAME_SIZE;
    }
    Ok(())
}

/// `copy_to_kernel(dst, user_src, n)` (spec §4.9): validate, then memcpy
/// page by page through the HHDM alias of each translated frame.
pub fn copy_to_kernel(dst: &mut [u8], user_src: u64) -> KernelResult<()> {
    let root = current_root()?;
    validate_range(user_src, dst.len() as u64, false, root)?;

    let mut copied = 0usize;
    while copied < dst.len() {
        let addr = user_src + copied as u64;
        let page_base = addr & !(FRAME_SIZE - 1);
        let offset = (addr - page_base) as usize;
        let phys_base = page_table::translate(VirtAddr::new(page_base), root).ok_or(Errno::EFAULT)?;
        let kernel_base = hhdm::phys_to_kernel(phys_base);
        let n = (FRAME_SIZE as usize - offset).min(dst.len() - copied);
        // SAFETY: `validate_range` confirmed this page is present and
        // user-readable; the HHDM alias of its frame is always mapped.
        unsafe {
            core::ptr::copy_nonoverlapping(
                kernel_base.as_ptr::<u8>().add(offset),
                dst[copied..].as_mut_ptr(),
                n,
            );
        }
        copied += n;
    }
    Ok(())
}

/// `copy_to_user(user_dst, src, n)` (spec §4.9): the write-side counterpart
/// of [`copy_to_kernel`], requiring the destination pages be writable too.
pub fn copy_to_user(user_dst: u64, src: &[u8]) -> KernelResult<()> {
    let root = current_root()?;
    validate_range(user_dst, src.len() as u64, true, root)?;

    let mut copied = 0usize;
    while copied < src.len() {
        let addr = user_dst + copied as u64;
        let page_base = addr & !(FRAME_SIZE - 1);
        let offset = (addr - page_base) as usize;
        let phys_base = page_table::translate(VirtAddr::new(page_base), root).ok_or(Errno::EFAULT)?;
        let kernel_base = hhdm::phys_to_kernel(phys_base);
        let n = (FRAME_SIZE as usize - offset).min(src.len() - copied);
        // SAFETY: see `copy_to_kernel`; `validate_range` additionally
        // required `PageFlags::WRITABLE` on every page in range.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src[copied..].as_ptr(),
                kernel_base.as_mut_ptr::<u8>().add(offset),
                n,
            );
        }
        copied += n;
    }
    Ok(())
}

/// Scan a NUL-terminated user string one page at a time, validating each
/// page before reading past it, bounded by `max_len` (spec §4.9/B4:
/// "unterminated user string > PATH_MAX -> ENAMETOOLONG").
pub fn copy_string_from_user(user_ptr: u64, max_len: usize) -> KernelResult<String> {
    let root = current_root()?;
    let mut out: Vec<u8> = Vec::new();
    let mut addr = user_ptr;

    loop {
        let page_base = addr & !(FRAME_SIZE - 1);
        let flags = page_table::leaf_flags(VirtAddr::new(page_base), root).ok_or(Errno::EFAULT)?;
        if !flags.contains(PageFlags::PRESENT) || !flags.contains(PageFlags::USER) {
            return Err(Errno::EFAULT);
        }
        let phys_base = page_table::translate(VirtAddr::new(page_base), root).ok_or(Errno::EFAULT)?;
        let kernel_base = hhdm::phys_to_kernel(phys_base);
        let page_end = page_base + FRAME_SIZE;

        while addr < page_end {
            let offset = (addr - page_base) as usize;
            // SAFETY: this page was just validated present and user-readable.
            let byte = unsafe { *kernel_base.as_ptr::<u8>().add(offset) };
            if byte == 0 {
                return String::from_utf8(out).map_err(|_| Errno::EINVAL);
            }
            if out.len() >= max_len {
                return Err(Errno::ENAMETOOLONG);
            }
            out.push(byte);
            addr += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_range_rejects_zero_length_trivially() {
        // A zero-length range never walks the page tables, so it can't
        // spuriously fault on an unmapped `addr`.
        let root = PageTableRoot(crate::mm::PhysAddr::new(0));
        assert!(validate_range(0x1000, 0, false, root).is_ok());
    }
}

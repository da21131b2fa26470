//! Per-process address space (spec §3): a root table whose upper half is
//! always a copy of the canonical kernel root's entries, so every process
//! shares the kernel mapping without needing a CR3 switch to run kernel
//! code.

extern crate alloc;

use alloc::vec::Vec;

use crate::errno::KernelResult;
use crate::mm::page_table::{self, PageTableRoot};
use crate::mm::{hhdm, PageFlags, PhysAddr};

use page_table::KERNEL_PML4_START;
const PML4_ENTRY_BYTES: usize = 8;

/// A user mapping as it was created, before any later `memprotect` narrowed
/// it. `sys_memprotect` (spec §4.9 B3: "MUST NOT add permissions that the
/// mapping lacked at creation") checks new flags against this record rather
/// than against whatever the page table currently holds, since the table
/// itself is mutated down to the narrower rights on every successful call.
#[derive(Clone, Copy)]
pub struct Mapping {
    pub base: u64,
    pub len: u64,
    pub created_flags: PageFlags,
}

pub struct AddressSpace {
    pub root: PageTableRoot,
    mappings: Vec<Mapping>,
}

impl AddressSpace {
    /// Allocate a fresh root table and copy the kernel root's upper-half
    /// PML4 entries into it (spec §3: "initially aliasing the kernel root's
    /// upper half").
    pub fn new() -> KernelResult<Self> {
        let root = PageTableRoot::new_blank()?;
        let kernel_root = page_table::kernel_root();

        let kernel_virt = hhdm::phys_to_kernel(kernel_root.0);
        let new_virt = hhdm::phys_to_kernel(root.0);
        let kernel_upper = kernel_virt.as_u64() as usize + KERNEL_PML4_START * PML4_ENTRY_BYTES;
        let new_upper = new_virt.as_u64() as usize + KERNEL_PML4_START * PML4_ENTRY_BYTES;
        let copy_len = (512 - KERNEL_PML4_START) * PML4_ENTRY_BYTES;
        // SAFETY: both ranges are whole, HHDM-mapped 4 KiB page tables; the
        // slice covers only the upper 256 PML4 entries of each.
        unsafe {
            core::ptr::copy_nonoverlapping(
                kernel_upper as *const u8,
                new_upper as *mut u8,
                copy_len,
            );
        }

        Ok(Self { root, mappings: Vec::new() })
    }

    pub fn activate(&self) {
        page_table::activate(self.root);
    }

    pub fn root_phys(&self) -> PhysAddr {
        self.root.0
    }

    /// Record the permissions a fresh mapping was created with, so a later
    /// `memprotect` against any sub-range of it can be checked for
    /// privilege escalation (spec §4.9 B3).
    pub fn record_mapping(&mut self, base: u64, len: u64, created_flags: PageFlags) {
        self.mappings.push(Mapping { base, len, created_flags });
    }

    /// The creation-time flags of whichever recorded mapping covers `addr`,
    /// searched most-recently-added first so a mapping that itself replaced
    /// an overlapping one wins.
    pub fn mapping_created_flags(&self, addr: u64) -> Option<PageFlags> {
        self.mappings
            .iter()
            .rev()
            .find(|m| addr >= m.base && addr < m.base + m.len)
            .map(|m| m.created_flags)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        // Process teardown (spec §4.7 `exit`) reclaims the address space
        // last, after every thread and fd has already been torn down.
        page_table::free_address_space(self.root);
    }
}

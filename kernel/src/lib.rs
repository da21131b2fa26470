//! hobbes kernel library.
//!
//! Exposes every subsystem as a library crate so the bare-metal binary
//! ([`main.rs`](../src/main.rs)) stays a thin entry-point shim and so the
//! host-target test harness can exercise C2-C11 without a bootloader.

#![no_std]
#![feature(abi_x86_interrupt)]
#![feature(naked_functions)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: the segregated-fit heap in `mm::heap` backs `alloc`.
// Host target (cargo test on the dev machine): delegate to the system
// allocator so ordinary `#[test]` functions can use `Vec`/`String`/`Box`.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

#[macro_use]
pub mod print;

pub mod arch;
#[cfg(target_os = "none")]
pub mod boot;
pub mod bootstrap;
pub mod errno;
pub mod fs;
pub mod irq;
pub mod kbd;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod timer;

// Used by the `harness = false` integration binaries under `kernel/tests/`,
// each of which supplies its own `_start`/`#[panic_handler]` and links
// against this module for serial-backed assertions and QEMU exit codes.
pub mod test_framework;
pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode};

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {info}");
    arch::x86_64::halt();
}

/// Heap allocation error handler. Panic is intentional: heap exhaustion in
/// a no_std kernel has no recovery path.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {layout:?}");
}

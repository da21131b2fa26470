//! Integration test for the physical frame allocator (C2, spec §4.1).
//!
//! Runs the allocator directly against a static descriptor array rather
//! than through a full Limine boot, the same way `memory_tests` in the
//! teacher kernel exercises `mm::FRAME_ALLOCATOR` without bringing up a
//! real memory map. No kernel heap is initialized here, so this binary
//! tracks "seen" frames in a static array instead of reaching for `alloc`.
//!
//! Spec §8 scenario 6 (two threads draining 10 000 frames each with no
//! double allocation) is approximated serially: 20 000 sequential
//! allocations must together have cardinality 20 000.

#![no_std]
#![no_main]

use hobbes_kernel::mm::frame_allocator::{self, FrameDescriptor, FRAME_SIZE};
use hobbes_kernel::mm::PhysAddr;
use hobbes_kernel::{exit_qemu, serial_println, QemuExitCode};

const FRAME_COUNT: u64 = 20_000;

static mut DESCRIPTORS: [FrameDescriptor; FRAME_COUNT as usize] =
    [FrameDescriptor::empty(); FRAME_COUNT as usize];

static mut SEEN: [bool; FRAME_COUNT as usize] = [false; FRAME_COUNT as usize];

#[no_mangle]
pub extern "C" fn _start() -> ! {
    hobbes_kernel::boot::assert_base_revision_supported();
    serial_println!("frame_allocator_tests: starting");

    // SAFETY: this test binary is the only thing running, `DESCRIPTORS` is
    // zeroed static storage sized for `FRAME_COUNT` entries, and `init` is
    // called exactly once before any other access.
    unsafe {
        frame_allocator::init(DESCRIPTORS.as_mut_ptr(), FRAME_COUNT);
    }
    frame_allocator::add_region(PhysAddr::new(0), PhysAddr::new(FRAME_COUNT * FRAME_SIZE));

    alloc_then_free_reuses_frame();
    scenario_no_double_allocation_across_full_drain();
    mark_reserved_shrinks_free_count();

    serial_println!("frame_allocator_tests: [ok]");
    exit_qemu(QemuExitCode::Success)
}

fn alloc_then_free_reuses_frame() {
    let before = frame_allocator::free_count();
    let f = frame_allocator::alloc_frame().expect("alloc_frame");
    assert_eq!(frame_allocator::free_count(), before - 1);
    assert!(f.is_frame_aligned());
    frame_allocator::free_frame(f);
    assert_eq!(frame_allocator::free_count(), before);
    serial_println!("  alloc_then_free_reuses_frame: [ok]");
}

fn scenario_no_double_allocation_across_full_drain() {
    // SAFETY: single-threaded test binary; no concurrent access to `SEEN`.
    let seen = unsafe { &mut SEEN };
    for slot in seen.iter_mut() {
        *slot = false;
    }

    let mut drained = 0u64;
    while let Ok(f) = frame_allocator::alloc_frame() {
        let idx = (f.as_u64() / FRAME_SIZE) as usize;
        assert!(!seen[idx], "frame {:#x} allocated twice", f.as_u64());
        seen[idx] = true;
        drained += 1;
    }
    assert_eq!(drained, FRAME_COUNT);
    assert!(seen.iter().all(|&s| s), "every frame must have been handed out");

    for idx in 0..FRAME_COUNT {
        frame_allocator::free_frame(PhysAddr::new(idx * FRAME_SIZE));
    }
    assert_eq!(frame_allocator::free_count(), FRAME_COUNT);
    serial_println!("  scenario_no_double_allocation_across_full_drain: [ok]");
}

fn mark_reserved_shrinks_free_count() {
    let before = frame_allocator::free_count();
    frame_allocator::mark_reserved(PhysAddr::new(0), PhysAddr::new(4 * FRAME_SIZE));
    assert_eq!(frame_allocator::free_count(), before - 4);
    serial_println!("  mark_reserved_shrinks_free_count: [ok]");
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    hobbes_kernel::test_panic_handler(info)
}

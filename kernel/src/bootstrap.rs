//! Boot sequencing (spec §1, §4.7): wires C2-C9 into a runnable kernel.
//!
//! `boot::kernel_entry` brings up the frame allocator, paging, and the
//! architecture layer (C2-C4, C6-C7) before calling [`kernel_init`], which
//! mounts the root filesystem, registers the two IRQ sources this core
//! drives, seals the IRQ table, creates the first process, and hands
//! control to the cooperative scheduler.

use crate::errno::KernelResult;
use crate::mm::page_table::PageTableRoot;
use crate::mm::{page_table, PageFlags, VirtAddr, FRAME_SIZE};
use crate::{arch, fs, irq, kbd, process, timer};

// A minimal first-process body: prints a line through the `PRINT` syscall,
// then loops sleeping via `SLEEP`. There is no ELF loader in this core
// (spec §1 treats userland as an external collaborator), so PID 1's code is
// this small embedded payload rather than anything loaded from disk.
core::arch::global_asm!(
    r#"
.section .rodata.init_payload, "a"
.global init_payload_start
.global init_payload_end
init_payload_start:
    lea rdi, [rip + init_msg]
    mov rsi, init_msg_len
    mov rax, 0x47
    int 0x80
2:
    mov rax, 0x4a
    mov rdi, 1000
    int 0x80
    jmp 2b
init_msg:
    .ascii "hobbes: init process alive\n"
init_msg_len = . - init_msg
init_payload_end:
"#
);

extern "C" {
    static init_payload_start: u8;
    static init_payload_end: u8;
}

/// Userspace address PID 1's payload is mapped to and the entry point its
/// initial register frame resumes into.
const INIT_USER_ENTRY: u64 = 0x0000_4000_0000_0000;

/// Copy the embedded init payload into a fresh frame and map it read+exec
/// into `space_root`. Must run before the owning thread's register frame is
/// built, since `Thread::new` captures `space_root` as the frame's `cr3`.
fn load_init_payload(space_root: PageTableRoot) -> KernelResult<()> {
    // SAFETY: these symbols bound the `.rodata` blob emitted by the
    // `global_asm!` block above; taking their addresses is safe, and the
    // copy below stays within `[start, end)`.
    let (start, end) = unsafe {
        (
            &init_payload_start as *const u8 as u64,
            &init_payload_end as *const u8 as u64,
        )
    };
    let len = end - start;
    assert!(len <= FRAME_SIZE, "init payload larger than one page");

    let phys = crate::mm::frame_allocator::alloc_frame()?;
    let dst = crate::mm::phys_to_kernel(phys);
    // SAFETY: `phys` was just allocated and is reachable through the HHDM;
    // `start` is the payload above and `len` fits within one frame.
    unsafe {
        core::ptr::copy_nonoverlapping(start as *const u8, dst.as_u64() as *mut u8, len as usize);
    }

    page_table::map(
        phys,
        VirtAddr::new(INIT_USER_ENTRY),
        FRAME_SIZE,
        PageFlags::PRESENT | PageFlags::USER,
        space_root,
    )
}

/// IRQ0 (PIT): advance the tick counter and fire any due timeouts.
fn timer_irq(_vector: u8) {
    timer::on_tick();
    timer::poll();
}

/// IRQ1 (PS/2 keyboard): read the pending scancode and push it onto the
/// ring. Scancode-to-event decoding here is deliberately minimal -- a real
/// driver belongs outside this core (spec §1) -- so only the make/break bit
/// and the raw 7-bit code are recovered.
fn keyboard_irq(_vector: u8) {
    // SAFETY: port 0x60 is the PS/2 controller's data port; reading it also
    // acknowledges the pending IRQ1 to the controller.
    let scancode = unsafe { arch::x86_64::inb(0x60) };
    let state = if scancode & 0x80 != 0 { 0 } else { 1 };
    kbd::push((scancode & 0x7F) as u16, state);
}

const IRQ_VECTOR_PIT: u8 = 32;
const IRQ_VECTOR_KEYBOARD: u8 = 33;

/// Route IRQ `line` through the I/O APIC to `vector` and unmask it.
fn route_irq(line: u8, vector: u8) {
    let Some(apic_id) = arch::x86_64::apic::read_id() else {
        log::warn!("no local APIC id available; IRQ{line} left unrouted");
        return;
    };
    arch::x86_64::apic::set_irq_route(line, vector, apic_id)
        .unwrap_or_else(|e| panic!("failed to route IRQ{line}: {e}"));
    arch::x86_64::apic::unmask_irq(line).unwrap_or_else(|e| panic!("failed to unmask IRQ{line}: {e}"));
}

/// Bring every remaining subsystem up and hand off to the scheduler.
/// Called once from `boot::kernel_entry`; never returns.
pub fn kernel_init() -> ! {
    fs::fscache::init();
    #[cfg(feature = "kernelfs")]
    {
        fs::kernelfs::mount_root();
        let _ = fs::kernelfs::mount_dev();
    }

    irq::register(IRQ_VECTOR_PIT, timer_irq).expect("PIT IRQ already routed");
    irq::register(IRQ_VECTOR_KEYBOARD, keyboard_irq).expect("keyboard IRQ already routed");
    route_irq(0, IRQ_VECTOR_PIT);
    route_irq(1, IRQ_VECTOR_KEYBOARD);
    irq::seal();

    let pid = process::create_proc("init", None, 0).expect("failed to create init process");
    process::with_process(pid, |p| load_init_payload(p.space.root_phys()))
        .expect("init process vanished before it could be populated")
        .expect("failed to map init payload");
    process::create_thread(pid, "init", INIT_USER_ENTRY, 0).expect("failed to create init thread");

    arch::x86_64::enable_interrupts();

    loop {
        if !process::dispatch() {
            arch::x86_64::idle();
        }
    }
}

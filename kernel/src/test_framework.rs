//! No-std test harness: `harness = false` integration tests under
//! `kernel/tests/` each provide their own `_start`, call into this module
//! for serial-backed assertions, and exit QEMU with a debug-port status
//! code instead of returning (there is no process to return to at ring 0).

use core::panic::PanicInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    crate::serial_println!("[failed]\n");
    crate::serial_println!("Error: {info}\n");
    exit_qemu(QemuExitCode::Failed)
}

/// Exit QEMU via the `isa-debug-exit` device at port `0xf4`.
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    // SAFETY: port 0xf4 is QEMU's debug-exit device when the image is run
    // with `-device isa-debug-exit,iobase=0xf4,iosize=0x04`; writing any
    // value there halts the VM with that value reflected in the exit code.
    unsafe {
        use x86_64::instructions::port::Port;
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
    loop {
        core::hint::spin_loop();
    }
}

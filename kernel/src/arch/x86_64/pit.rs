//! Programmable Interval Timer (C7, spec §4.6): the kernel's single periodic
//! tick source, reprogrammed to fire at 2 kHz and wired to IRQ0.

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const TARGET_HZ: u32 = 2000;

/// `mode 2` (rate generator), access lo/hi byte, channel 0.
const PIT_CMD_CHANNEL0_RATE_GENERATOR: u8 = 0b0011_0100;

/// Reprogram channel 0 to fire at [`TARGET_HZ`] and return the IRQ line it
/// is wired to (always 0 on this architecture; routed through the I/O APIC
/// by the caller).
pub fn init() {
    let divisor = (PIT_FREQUENCY_HZ / TARGET_HZ) as u16;
    // SAFETY: ports 0x40/0x43 are the PIT's well-known channel-0 data and
    // command registers; this is the standard reprogramming sequence.
    unsafe {
        crate::arch::outb(PIT_COMMAND, PIT_CMD_CHANNEL0_RATE_GENERATOR);
        crate::arch::outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        crate::arch::outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
}

pub const IRQ_LINE: u8 = 0;
pub const TICK_HZ: u64 = TARGET_HZ as u64;

//! IRQ dispatch (C6, spec §4.5): a fixed 96-entry routine table indexed by
//! `vector - 32`, covering every vector the IDT routes through the common
//! trampoline (`arch::x86_64::idt`'s `TRAMPOLINES`, vectors 32-127). Vector
//! 0x80 (`int 0x80`, the syscall gate) is wired directly to
//! `crate::syscall::dispatch_from_gate` by the IDT and never passes through
//! this table.
//!
//! The table is a plain array of atomics so `dispatch` never takes a lock
//! in interrupt context. Registration is expected to happen during boot,
//! before interrupts are enabled; [`seal`] then write-protects the table
//! against further `register`/`unregister` calls, matching spec's
//! "write-sealed-after-boot" invariant.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::errno::{Errno, KernelResult};

/// First vector routed through this table (matches `idt::IRQ_BASE`).
const VECTOR_BASE: u8 = 32;
/// Number of routed vectors (32..=127 inclusive).
const TABLE_LEN: usize = 96;

pub type IrqHandler = fn(vector: u8);

const NONE: usize = 0;

/// One slot per routed vector, holding an `Option<IrqHandler>` packed as a
/// function pointer (0 meaning unregistered).
static ROUTINES: [AtomicUsize; TABLE_LEN] = {
    const INIT: AtomicUsize = AtomicUsize::new(NONE);
    [INIT; TABLE_LEN]
};

static SEALED: AtomicBool = AtomicBool::new(false);
static DISPATCH_COUNT: AtomicUsize = AtomicUsize::new(0);

fn slot(vector: u8) -> KernelResult<usize> {
    let slot = vector.checked_sub(VECTOR_BASE).ok_or(Errno::EINVAL)? as usize;
    if slot >= TABLE_LEN {
        return Err(Errno::EINVAL);
    }
    Ok(slot)
}

/// Register `handler` for `vector`. Must be called before [`seal`]; fails
/// with `Errno::EACCES` afterward, and `Errno::EEXIST` if the vector is
/// already routed.
pub fn register(vector: u8, handler: IrqHandler) -> KernelResult<()> {
    if SEALED.load(Ordering::Acquire) {
        return Err(Errno::EACCES);
    }
    let idx = slot(vector)?;
    ROUTINES[idx]
        .compare_exchange(NONE, handler as usize, Ordering::AcqRel, Ordering::Acquire)
        .map(|_| ())
        .map_err(|_| Errno::EEXIST)
}

/// Remove the handler for `vector`, if any. Must be called before [`seal`].
pub fn unregister(vector: u8) -> KernelResult<()> {
    if SEALED.load(Ordering::Acquire) {
        return Err(Errno::EACCES);
    }
    let idx = slot(vector)?;
    ROUTINES[idx].store(NONE, Ordering::Release);
    Ok(())
}

/// Write-protect the routine table. Called once at the end of boot, after
/// every driver has registered its handlers.
pub fn seal() {
    SEALED.store(true, Ordering::Release);
}

/// Look up and invoke the handler for `vector`, then signal end-of-interrupt
/// to the Local APIC. Called from the IDT's per-vector trampoline. A vector
/// with no registered handler is a spurious interrupt and is silently
/// dropped, still followed by EOI.
///
/// Examines CR3 before invoking the handler and swaps to the kernel root if
/// the interrupted context wasn't already running on it, restoring the
/// interrupted CR3 afterward (spec §4.5). This table itself is mapped into
/// every address space read-only, so the *lookup* above never needs the
/// swap; only handler bodies, which assume the full kernel mapping, do.
pub fn dispatch(vector: u8) {
    DISPATCH_COUNT.fetch_add(1, Ordering::Relaxed);

    if let Ok(idx) = slot(vector) {
        let raw = ROUTINES[idx].load(Ordering::Acquire);
        if raw != NONE {
            // SAFETY: the only value ever stored here other than `NONE` is an
            // `IrqHandler` cast to `usize` by `register`, for this exact
            // vector's slot.
            let handler: IrqHandler = unsafe { core::mem::transmute(raw) };

            let interrupted = crate::mm::page_table::current_root();
            let kernel_root = crate::mm::page_table::kernel_root();
            let swapped = interrupted != kernel_root;
            if swapped {
                crate::mm::page_table::activate(kernel_root);
            }

            handler(vector);

            if swapped {
                crate::mm::page_table::activate(interrupted);
            }
        }
    }

    crate::arch::x86_64::apic::send_eoi();
}

/// Number of interrupts dispatched since boot (diagnostics only).
pub fn dispatch_count() -> usize {
    DISPATCH_COUNT.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU8;

    static LAST_VECTOR: AtomicU8 = AtomicU8::new(0);

    fn record(vector: u8) {
        LAST_VECTOR.store(vector, Ordering::SeqCst);
    }

    #[test]
    fn register_rejects_vector_outside_table() {
        assert_eq!(register(31, record), Err(Errno::EINVAL));
        assert_eq!(register(128, record), Err(Errno::EINVAL));
    }

    #[test]
    fn register_then_unregister_allows_reregistration() {
        let _ = unregister(200u8.wrapping_sub(1)); // no-op, different vector
        assert_eq!(register(90, record), Ok(()));
        assert_eq!(register(90, record), Err(Errno::EEXIST));
        assert_eq!(unregister(90), Ok(()));
        assert_eq!(register(90, record), Ok(()));
        assert_eq!(unregister(90), Ok(()));
    }
}

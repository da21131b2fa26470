//! Keyboard input ring buffer (spec §6 `GET_KB`/`KB_READ`).
//!
//! Grounded in `original_source/src/drivers/keyboard.c`: the IRQ1 handler
//! never blocks, so it can only push scancodes into a bounded ring and let
//! a later syscall drain them. 128 slots matches the original's own ring
//! size; overflow drops the oldest unread event rather than the new one, so
//! a reader that falls behind still sees the most recent key state.
//!
//! This module owns the ring only -- decoding raw PS/2 scancodes into the
//! `{code, state, mods}` triple is the port 0x60 driver's job and is out of
//! scope here (spec §1 treats drivers as external collaborators); tests and
//! [`push`] exercise the ring directly.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::sync::SpinMutex;

const RING_LEN: usize = 128;

/// One decoded key event (spec §6): a scancode, a press/release state byte,
/// and the active modifier mask.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct KeyEvent {
    pub code: u16,
    pub state: u8,
    pub mods: u8,
}

struct Ring {
    buf: [KeyEvent; RING_LEN],
    head: usize,
    tail: usize,
    len: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            buf: [KeyEvent { code: 0, state: 0, mods: 0 }; RING_LEN],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    fn push(&mut self, ev: KeyEvent) {
        if self.len == RING_LEN {
            // Drop the oldest unread event to make room for the new one.
            self.head = (self.head + 1) % RING_LEN;
            self.len -= 1;
        }
        self.buf[self.tail] = ev;
        self.tail = (self.tail + 1) % RING_LEN;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<KeyEvent> {
        if self.len == 0 {
            return None;
        }
        let ev = self.buf[self.head];
        self.head = (self.head + 1) % RING_LEN;
        self.len -= 1;
        Some(ev)
    }
}

static RING: SpinMutex<Ring> = SpinMutex::new(Ring::new());
static ACTIVE_MODS: AtomicU8 = AtomicU8::new(0);

/// Slots in the user-mappable mirror of [`Ring`] (spec §6 "Keyboard ring").
const SHARED_RING_LEN: usize = 128;

/// The `GET_KB` shared-memory surface (spec §6): a single page, header
/// first, `head`/`tail`/`full` as plain `u32`s (the producer is the sole
/// IRQ1 handler on this core and the consumer only ever reads, so no atomics
/// are needed beyond the ordering the page-fault-free HHDM write already
/// gives us).
#[repr(C)]
struct SharedRingHeader {
    head: u32,
    tail: u32,
    full: u32,
    _reserved: u32,
    events: [KeyEvent; SHARED_RING_LEN],
}

const _: () = assert!(core::mem::size_of::<SharedRingHeader>() <= crate::mm::FRAME_SIZE as usize);

#[cfg(target_os = "none")]
static SHARED_FRAME: crate::sync::GlobalState<crate::mm::PhysAddr> = crate::sync::GlobalState::new();

/// Lazily allocate and zero the page backing the shared keyboard ring,
/// idempotent across repeated `GET_KB` calls from the same or different
/// processes (each just gets re-mapped to the same physical page).
#[cfg(target_os = "none")]
pub fn shared_frame() -> crate::errno::KernelResult<crate::mm::PhysAddr> {
    use crate::mm::{frame_allocator, hhdm};

    if let Some(phys) = SHARED_FRAME.with(|p| *p) {
        return Ok(phys);
    }
    let phys = frame_allocator::alloc_frame()?;
    let virt = hhdm::phys_to_kernel(phys);
    // SAFETY: freshly allocated frame, not yet aliased anywhere else.
    unsafe { core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, crate::mm::FRAME_SIZE as usize) };
    // Lost the race against another caller: free ours, use theirs.
    match SHARED_FRAME.init(phys) {
        Ok(()) => Ok(phys),
        Err(_) => {
            frame_allocator::free_frame(phys);
            Ok(SHARED_FRAME.with(|p| *p).expect("just lost the init race"))
        }
    }
}

/// Mirror the just-pushed event into the shared page, if `GET_KB` has ever
/// been called. Keeps the header layout identical to [`Ring`]'s own
/// drop-oldest-on-overflow policy.
#[cfg(target_os = "none")]
fn mirror_to_shared(ev: KeyEvent) {
    use crate::mm::hhdm;

    let Some(phys) = SHARED_FRAME.with(|p| *p) else {
        return;
    };
    let header = hhdm::phys_to_kernel(phys).as_mut_ptr::<SharedRingHeader>();
    // SAFETY: `phys` was zeroed and sized for `SharedRingHeader` by
    // `shared_frame`; this is the only writer (IRQ1 is not reentrant).
    unsafe {
        let head = (*header).head as usize;
        let tail = (*header).tail as usize;
        let full = (*header).full != 0;
        let (new_head, new_tail) = if full {
            ((head + 1) % SHARED_RING_LEN, (tail + 1) % SHARED_RING_LEN)
        } else {
            (head, (tail + 1) % SHARED_RING_LEN)
        };
        (*header).events[tail] = ev;
        (*header).head = new_head as u32;
        (*header).tail = new_tail as u32;
        (*header).full = (new_tail == new_head) as u32;
    }
}

/// Push a decoded key event onto the ring. Called from the IRQ1 handler;
/// never blocks and never fails (overflow silently drops the oldest event).
pub fn push(code: u16, state: u8) {
    let mods = ACTIVE_MODS.load(Ordering::Relaxed);
    let ev = KeyEvent { code, state, mods };
    RING.lock().push(ev);
    #[cfg(target_os = "none")]
    mirror_to_shared(ev);
}

/// Update the modifier mask future [`push`] calls stamp onto events
/// (shift/ctrl/alt tracked by the scancode decoder, not by this ring).
pub fn set_mods(mods: u8) {
    ACTIVE_MODS.store(mods, Ordering::Relaxed);
}

/// `KB_READ` (spec §6): drain up to one event. Returns `None` if the ring is
/// empty rather than blocking -- callers poll.
pub fn read() -> Option<KeyEvent> {
    RING.lock().pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_read_round_trips() {
        let mut ring = Ring::new();
        ring.push(KeyEvent { code: 30, state: 1, mods: 0 });
        let ev = ring.pop().unwrap();
        assert_eq!(ev.code, 30);
        assert_eq!(ev.state, 1);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut ring = Ring::new();
        for i in 0..RING_LEN + 10 {
            ring.push(KeyEvent { code: i as u16, state: 1, mods: 0 });
        }
        let first = ring.pop().unwrap();
        assert_eq!(first.code, 10);
    }

    #[test]
    fn empty_ring_reads_none() {
        let mut ring = Ring::new();
        assert!(ring.pop().is_none());
    }
}

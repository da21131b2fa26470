//! Timer and timeout wheel (C7, spec §4.6).
//!
//! A single periodic tick source (the PIT, reprogrammed to 2 kHz) increments
//! a 64-bit `pit_count`. `sleep_ms` busy-waits on the counter. `set_timeout`
//! reserves a slot in a fixed 1024-entry array; the wheel is deliberately
//! *not* scanned on every tick -- `poll()` is called when the dispatcher
//! returns to idle (spec: "timeouts are checked when the dispatcher returns
//! to idle (deferred)").

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use crate::errno::{Errno, KernelResult};
use crate::sync::SpinMutex;

/// Ticks per millisecond at the reprogrammed PIT rate (2 kHz).
pub const TICKS_PER_MS: u64 = 2;

static PIT_COUNT: AtomicU64 = AtomicU64::new(0);

/// Called from the IRQ0 handler on every PIT tick.
pub fn on_tick() {
    PIT_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn pit_count() -> u64 {
    PIT_COUNT.load(Ordering::Relaxed)
}

/// Busy-wait until `pit_count` has advanced by at least `n` milliseconds'
/// worth of ticks.
pub fn sleep_ms(n: u64) {
    let target = pit_count() + n * TICKS_PER_MS;
    while pit_count() < target {
        core::hint::spin_loop();
    }
}

pub type TimeoutId = usize;
pub type TimeoutCallback = fn(usize);

const WHEEL_SLOTS: usize = 1024;

/// A slot's `milliseconds` field: 0 = free, `u64::MAX` = claimed but not
/// yet live (still being filled in by `set_timeout`), anything else = the
/// absolute `pit_count` tick at which the callback fires.
const SLOT_FREE: u64 = 0;
const SLOT_CLAIMED: u64 = u64::MAX;

#[derive(Clone, Copy)]
struct Slot {
    milliseconds: u64,
    callback: Option<TimeoutCallback>,
    data: usize,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            milliseconds: SLOT_FREE,
            callback: None,
            data: 0,
        }
    }
}

struct Wheel {
    slots: [Slot; WHEEL_SLOTS],
}

impl Wheel {
    const fn new() -> Self {
        Self {
            slots: [Slot::empty(); WHEEL_SLOTS],
        }
    }

    fn claim_slot(&mut self) -> Option<usize> {
        self.slots
            .iter_mut()
            .position(|s| s.milliseconds == SLOT_FREE)
            .map(|idx| {
                self.slots[idx].milliseconds = SLOT_CLAIMED;
                idx
            })
    }

    fn poll(&mut self, now: u64) {
        for slot in self.slots.iter_mut() {
            let fire_at = slot.milliseconds;
            if fire_at != SLOT_FREE && fire_at != SLOT_CLAIMED && fire_at <= now {
                let cb = slot.callback.take();
                let data = slot.data;
                slot.milliseconds = SLOT_FREE;
                if let Some(cb) = cb {
                    cb(data);
                }
            }
        }
    }
}

// SAFETY: `Wheel` holds only plain data and function pointers, always
// accessed through the module-level `SpinMutex`.
unsafe impl Send for Wheel {}

static WHEEL: SpinMutex<Wheel> = SpinMutex::new(Wheel::new());

/// Reserve a wheel slot that fires `ms` milliseconds from now, invoking
/// `cb(data)`. Returns the slot index as the timeout's id.
pub fn set_timeout(ms: u64, cb: TimeoutCallback, data: usize) -> KernelResult<TimeoutId> {
    let mut wheel = WHEEL.lock();
    let idx = wheel.claim_slot().ok_or(Errno::ENOMEM)?;
    let fire_at = pit_count() + ms * TICKS_PER_MS;
    // fire_at could theoretically land on the two reserved sentinel values;
    // nudge forward by one tick rather than let a timeout silently vanish
    // or get treated as still-claimed.
    let fire_at = match fire_at {
        SLOT_FREE => 1,
        SLOT_CLAIMED => SLOT_CLAIMED - 1,
        other => other,
    };
    wheel.slots[idx].callback = Some(cb);
    wheel.slots[idx].data = data;
    wheel.slots[idx].milliseconds = fire_at;
    Ok(idx)
}

/// Cancel a pending timeout. No-op if it already fired or was never valid.
pub fn cancel_timeout(id: TimeoutId) {
    if let Some(slot) = WHEEL.lock().slots.get_mut(id) {
        slot.callback = None;
        slot.milliseconds = SLOT_FREE;
    }
}

/// Scan the wheel for expired timeouts and fire their callbacks. Called by
/// the IRQ dispatcher when it is about to return to the idle loop, never
/// from the tick handler itself (spec §4.6).
pub fn poll() {
    WHEEL.lock().poll(pit_count());
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static HITS: AtomicUsize = AtomicUsize::new(0);
    fn bump(_data: usize) {
        HITS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn set_timeout_fires_after_deadline() {
        HITS.store(0, Ordering::Relaxed);
        let start = pit_count();
        let id = set_timeout(5, bump, 0).unwrap();
        WHEEL.lock().poll(start); // deadline not reached yet
        assert_eq!(HITS.load(Ordering::Relaxed), 0);
        WHEEL.lock().poll(start + 5 * TICKS_PER_MS);
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
        // Slot is freed after firing; cancelling again is a harmless no-op.
        cancel_timeout(id);
    }

    #[test]
    fn cancel_prevents_fire() {
        HITS.store(0, Ordering::Relaxed);
        let start = pit_count();
        let id = set_timeout(5, bump, 0).unwrap();
        cancel_timeout(id);
        WHEEL.lock().poll(start + 100);
        assert_eq!(HITS.load(Ordering::Relaxed), 0);
    }
}

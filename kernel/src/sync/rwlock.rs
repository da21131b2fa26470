//! Writer-preference reader-writer lock (spec §4.4, C5).
//!
//! `state` is a signed counter: `>= 0` is the live reader count, `-1` means
//! writer-held. A separate `writers_waiting` counter lets a pending writer
//! starve new readers: a reader that observes `writers_waiting > 0` backs
//! off instead of incrementing `state`, so writers cannot be held off
//! indefinitely by a steady stream of readers.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicI32, Ordering},
};

const WRITER: i32 = -1;

pub struct RwLock<T: ?Sized> {
    state: AtomicI32,
    writers_waiting: AtomicI32,
    data: UnsafeCell<T>,
}

// SAFETY: all access to `data` is gated by the atomic `state`/`writers_waiting`
// protocol implemented below.
unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
// SAFETY: see above.
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            state: AtomicI32::new(0),
            writers_waiting: AtomicI32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        loop {
            // Back off while a writer is waiting or holding, so writers are
            // never starved by a continuous stream of readers.
            if self.writers_waiting.load(Ordering::Relaxed) > 0 {
                core::hint::spin_loop();
                continue;
            }
            let cur = self.state.load(Ordering::Relaxed);
            if cur == WRITER {
                core::hint::spin_loop();
                continue;
            }
            if self
                .state
                .compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return RwLockReadGuard { lock: self };
            }
            core::hint::spin_loop();
        }
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        if self.writers_waiting.load(Ordering::Relaxed) > 0 {
            return None;
        }
        let cur = self.state.load(Ordering::Relaxed);
        if cur == WRITER {
            return None;
        }
        self.state
            .compare_exchange(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwLockReadGuard { lock: self })
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.writers_waiting.fetch_add(1, Ordering::Relaxed);
        loop {
            if self
                .state
                .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            core::hint::spin_loop();
        }
        self.writers_waiting.fetch_sub(1, Ordering::Relaxed);
        RwLockWriteGuard { lock: self }
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwLockWriteGuard { lock: self })
    }

    fn read_unlock(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }

    fn write_unlock(&self) {
        self.state.store(0, Ordering::Release);
    }
}

pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<'a, T: ?Sized> RwLockReadGuard<'a, T> {
    /// Upgrade a read guard to a write guard: release the read hold,
    /// register as a waiting writer, and acquire exclusively. Per spec
    /// §4.4: "decrements the reader count, increments `writers_waiting`,
    /// then acquires as a writer."
    pub fn upgrade(self) -> RwLockWriteGuard<'a, T> {
        let lock = self.lock;
        core::mem::forget(self);
        lock.state.fetch_sub(1, Ordering::Release);
        lock.writers_waiting.fetch_add(1, Ordering::Relaxed);
        loop {
            if lock
                .state
                .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            core::hint::spin_loop();
        }
        lock.writers_waiting.fetch_sub(1, Ordering::Relaxed);
        RwLockWriteGuard { lock }
    }
}

impl<'a, T: ?Sized> Deref for RwLockReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: guard construction requires a successful reader acquire.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for RwLockReadGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<'a, T: ?Sized> RwLockWriteGuard<'a, T> {
    /// Downgrade a write guard to a read guard by storing `1` directly, per
    /// spec §4.4 ("downgrade stores 1 directly").
    pub fn downgrade(self) -> RwLockReadGuard<'a, T> {
        let lock = self.lock;
        core::mem::forget(self);
        lock.state.store(1, Ordering::Release);
        RwLockReadGuard { lock }
    }
}

impl<'a, T: ?Sized> Deref for RwLockWriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: guard construction requires exclusive (writer) acquire.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for RwLockWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: guard construction requires exclusive (writer) acquire.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for RwLockWriteGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_reads_allowed() {
        let lock = RwLock::new(5i32);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1, 5);
        assert_eq!(*r2, 5);
    }

    #[test]
    fn write_excludes_everyone() {
        let lock = RwLock::new(0i32);
        {
            let mut w = lock.write();
            *w = 10;
        }
        assert_eq!(*lock.read(), 10);
    }

    #[test]
    fn try_write_fails_while_read_held() {
        let lock = RwLock::new(0i32);
        let _r = lock.read();
        assert!(lock.try_write().is_none());
    }

    #[test]
    fn upgrade_then_downgrade() {
        let lock = RwLock::new(1i32);
        let r = lock.read();
        let mut w = r.upgrade();
        *w = 2;
        let r2 = w.downgrade();
        assert_eq!(*r2, 2);
    }
}

//! Synchronization Primitives (C5)
//!
//! The spin mutex and writer-preference reader-writer lock required by
//! spec §4.4, plus the `GlobalState`/`OnceLock` machinery used to publish
//! singletons (frame allocator, fscache root, IRQ table, ...) without
//! `static mut`.

pub mod mutex;
pub mod once_lock;
pub mod rwlock;

pub use mutex::{SpinMutex, SpinMutexGuard};
pub use once_lock::{GlobalState, LazyLock, OnceLock};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};

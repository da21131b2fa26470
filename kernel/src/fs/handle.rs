//! `vfs_handle`: an open reference to a cache node (spec §3).
//!
//! Grounded in `original_source/src/vfs/vfs.h`'s `vfs_handle_t`: the
//! effective uid/gid/mode captured at `open()` time (not re-checked on
//! every read/write), the back-end's vtable, and a 32-byte
//! back-end-owned instance blob (current cluster, seek position, ...).

use crate::errno::KernelResult;
use crate::fs::fscache::{self, NodeIndex, NodeOps};
use crate::fs::{NodeType, SeekWhence};

/// An open reference returned by `open()`. Dropping it without calling
/// [`VfsHandle::close`] still releases the node reference, but back-ends
/// that allocate resources in `instance_data` expect `close` to run first.
pub struct VfsHandle {
    node: NodeIndex,
    node_type: NodeType,
    uid: u32,
    gid: u32,
    mode: u32,
    vtable: &'static dyn NodeOps,
    instance_data: [u8; 32],
}

impl VfsHandle {
    /// Construct a handle over an already-`try_acquire`'d node. Takes
    /// ownership of that reference; [`VfsHandle::close`] (or `Drop`)
    /// releases it.
    pub fn new(
        node: NodeIndex,
        node_type: NodeType,
        uid: u32,
        gid: u32,
        mode: u32,
        vtable: &'static dyn NodeOps,
    ) -> Self {
        Self {
            node,
            node_type,
            uid,
            gid,
            mode,
            vtable,
            instance_data: [0; 32],
        }
    }

    pub fn node(&self) -> NodeIndex {
        self.node
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn read(&mut self, buf: &mut [u8]) -> KernelResult<usize> {
        self.vtable.read(self.node, &mut self.instance_data, buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> KernelResult<usize> {
        self.vtable.write(self.node, &mut self.instance_data, buf)
    }

    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> KernelResult<i64> {
        self.vtable.seek(self.node, &mut self.instance_data, offset, whence)
    }

    pub fn close(mut self) -> KernelResult<()> {
        let result = self.vtable.close(self.node, &mut self.instance_data);
        fscache::release(self.node);
        // The reference was just released; prevent `Drop` from releasing it
        // a second time.
        core::mem::forget(self);
        result
    }

    /// Interpret the first `size_of::<T>()` bytes of the instance blob as
    /// `T`. Every back-end's instance struct is required to fit in 32
    /// bytes; violating that is a back-end bug, not a runtime condition.
    ///
    /// # Safety
    /// `T` must be a plain-old-data type with no padding-sensitive
    /// invariants, and the caller must only ever interpret the blob as one
    /// `T` for the lifetime of the handle.
    pub unsafe fn instance<T: Copy>(&self) -> T {
        debug_assert!(core::mem::size_of::<T>() <= 32);
        // SAFETY: caller-documented invariant; `instance_data` is always
        // zero-initialized and at least `size_of::<T>()` bytes.
        unsafe { core::ptr::read(self.instance_data.as_ptr() as *const T) }
    }

    /// # Safety
    /// See [`VfsHandle::instance`].
    pub unsafe fn set_instance<T: Copy>(&mut self, value: T) {
        debug_assert!(core::mem::size_of::<T>() <= 32);
        // SAFETY: caller-documented invariant.
        unsafe { core::ptr::write(self.instance_data.as_mut_ptr() as *mut T, value) };
    }
}

impl Drop for VfsHandle {
    fn drop(&mut self) {
        fscache::release(self.node);
    }
}

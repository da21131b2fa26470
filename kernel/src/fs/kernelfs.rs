//! kernelfs: an in-memory tree maintained by kernel code, used for `/dev`
//! (spec §4.10). Grounded in `original_source/src/vfs/kernelfs.c`: unlike
//! the on-disk back-ends, kernelfs builds its tree eagerly -- a driver
//! calls [`create_file`]/[`create_dir`] once at init time and the node is
//! linked immediately, so `load_node` never has anything to lazily
//! produce and always reports `ENOENT`.
//!
//! A kernelfs file's `read` is a per-node callback that produces bytes on
//! demand (the original's motivating use case: exposing PCI device
//! records). The callback and its cookie are packed into the node's
//! 32-byte `internal_data` blob.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::errno::{Errno, KernelResult};
use crate::fs::fscache::{self, NodeIndex, NodeOps};
use crate::fs::{Dirent, NodeType, SeekWhence};

/// A kernelfs file read callback: given the caller-supplied `cookie` and
/// the current seek position, fill as much of `buf` as there is data for
/// and return the byte count (0 at EOF).
pub type ReadFn = fn(cookie: u64, seek_pos: u64, buf: &mut [u8]) -> KernelResult<usize>;

#[derive(Clone, Copy)]
struct FileData {
    read_fn: Option<ReadFn>,
    cookie: u64,
}

const _: () = assert!(core::mem::size_of::<FileData>() <= 32);

fn file_data_of(idx: NodeIndex) -> FileData {
    let raw = fscache::node_internal_data(idx);
    // SAFETY: `raw` was either zero-initialized by `allocate_node` or
    // previously written by `create_file` below as exactly this type.
    unsafe { core::ptr::read(raw.as_ptr() as *const FileData) }
}

fn set_file_data(idx: NodeIndex, data: FileData) {
    let mut raw = [0u8; 32];
    // SAFETY: `FileData` fits in 32 bytes (asserted above) and has no
    // padding-sensitive invariants.
    unsafe { core::ptr::write(raw.as_mut_ptr() as *mut FileData, data) };
    fscache::set_node_internal_data(idx, raw);
}

/// Per-handle seek position; kernelfs files don't need anything else in
/// the handle's instance blob.
#[derive(Clone, Copy, Default)]
struct HandleState {
    seek_pos: u64,
}

/// Per-handle directory cursor (spec §4.8 "directory reads yield dirents").
/// Reuses the same 32-byte instance blob as [`HandleState`]; which one is
/// valid is determined by the node's type, never both at once for a given
/// handle.
#[derive(Clone, Copy, Default)]
struct DirHandleState {
    entry_index: u32,
}

struct KernelfsOps;

impl NodeOps for KernelfsOps {
    fn read(&self, node: NodeIndex, instance: &mut [u8; 32], buf: &mut [u8]) -> KernelResult<usize> {
        if fscache::node_type(node) == Some(NodeType::Directory) {
            return self.read_dir(node, instance, buf);
        }
        let state: HandleState = {
            // SAFETY: the handle's instance blob is zero-initialized at
            // open and only ever interpreted as `HandleState` by this
            // back-end.
            unsafe { core::ptr::read(instance.as_ptr() as *const HandleState) }
        };
        let data = file_data_of(node);
        let read_fn = data.read_fn.ok_or(Errno::EIO)?;
        let n = read_fn(data.cookie, state.seek_pos, buf)?;
        let new_state = HandleState {
            seek_pos: state.seek_pos + n as u64,
        };
        // SAFETY: see above.
        unsafe { core::ptr::write(instance.as_mut_ptr() as *mut HandleState, new_state) };
        Ok(n)
    }

    fn seek(&self, _node: NodeIndex, instance: &mut [u8; 32], offset: i64, whence: SeekWhence) -> KernelResult<i64> {
        // SAFETY: see `read` above.
        let mut state: HandleState = unsafe { core::ptr::read(instance.as_ptr() as *const HandleState) };
        let base = match whence {
            SeekWhence::Set => 0i64,
            SeekWhence::Cur => state.seek_pos as i64,
            SeekWhence::End => 0i64, // kernelfs files have no fixed length
        };
        let new_pos = base.checked_add(offset).ok_or(Errno::EINVAL)?;
        if new_pos < 0 {
            return Err(Errno::EINVAL);
        }
        state.seek_pos = new_pos as u64;
        // SAFETY: see `read` above.
        unsafe { core::ptr::write(instance.as_mut_ptr() as *mut HandleState, state) };
        Ok(new_pos)
    }

    fn load_node(&self, _parent: NodeIndex, _name: &str, _out: NodeIndex) -> KernelResult<()> {
        // kernelfs builds its tree eagerly; anything not already linked as
        // a child genuinely does not exist.
        Err(Errno::ENOENT)
    }

    /// `mkdir`/`create` against a kernelfs directory (e.g. the cache root):
    /// publish `out` in place as a child of `parent`, same as the eager
    /// [`create_dir`]/[`create_file`] constructors use internally.
    fn create_child(
        &self,
        parent: NodeIndex,
        name: &str,
        node_type: NodeType,
        uid: u32,
        gid: u32,
        mode: u32,
        out: NodeIndex,
    ) -> KernelResult<()> {
        if name.len() > crate::fs::NAME_MAX {
            return Err(Errno::ENAMETOOLONG);
        }
        fscache::init_node_metadata(out, name, mode, uid, gid);
        fscache::set_node_vtable(out, &KERNELFS_OPS);
        fscache::publish_node(out, node_type);
        fscache::attach_child(parent, out);
        Ok(())
    }
}

impl KernelfsOps {
    /// Directory read (spec §4.8, §6 `Dirent`): list `node`'s children
    /// starting at the handle's cursor, emit whole 264-byte [`Dirent`]
    /// records until either `buf` is full or the children are exhausted,
    /// and advance the cursor by however many records were emitted --
    /// mirrors `iso9660`/`fat`'s directory vtables, which use the same
    /// cursor-in-instance-blob scheme over their own on-disk entries.
    fn read_dir(&self, node: NodeIndex, instance: &mut [u8; 32], buf: &mut [u8]) -> KernelResult<usize> {
        const REC: usize = core::mem::size_of::<Dirent>();

        // SAFETY: the instance blob is zero-initialized at open and only
        // ever interpreted as `DirHandleState` for a directory handle.
        let state: DirHandleState = unsafe { core::ptr::read(instance.as_ptr() as *const DirHandleState) };

        let children = fscache::list_children(node);
        let mut emitted = 0usize;
        let mut cursor = state.entry_index as usize;
        while cursor < children.len() && (emitted + 1) * REC <= buf.len() {
            let (_, name, node_type) = &children[cursor];
            let dirent = Dirent::new(name, *node_type);
            let dst = &mut buf[emitted * REC..(emitted + 1) * REC];
            // SAFETY: `dirent` is a plain-old-data `repr(C)` struct exactly
            // `REC` bytes long; `dst` is that many bytes.
            unsafe {
                core::ptr::copy_nonoverlapping(&dirent as *const Dirent as *const u8, dst.as_mut_ptr(), REC);
            }
            emitted += 1;
            cursor += 1;
        }

        let new_state = DirHandleState { entry_index: cursor as u32 };
        // SAFETY: see above.
        unsafe { core::ptr::write(instance.as_mut_ptr() as *mut DirHandleState, new_state) };

        Ok(emitted * REC)
    }
}

static KERNELFS_OPS: KernelfsOps = KernelfsOps;

/// Monotonically increasing cookie handed to callers that don't need a
/// meaningful one (e.g. static text files).
static NEXT_ANON_COOKIE: AtomicU64 = AtomicU64::new(1);

/// Create an empty kernelfs directory under `parent`.
pub fn create_dir(parent: NodeIndex, name: &str, mode: u32, uid: u32, gid: u32) -> KernelResult<NodeIndex> {
    let idx = fscache::allocate_node();
    fscache::init_node_metadata(idx, name, mode, uid, gid);
    fscache::set_node_vtable(idx, &KERNELFS_OPS);
    fscache::publish_node(idx, NodeType::Directory);
    fscache::attach_child(parent, idx);
    Ok(idx)
}

/// Create a kernelfs file under `parent` whose reads are serviced by
/// `read_fn(cookie, seek_pos, buf)`.
pub fn create_file(
    parent: NodeIndex,
    name: &str,
    mode: u32,
    uid: u32,
    gid: u32,
    read_fn: ReadFn,
    cookie: u64,
) -> KernelResult<NodeIndex> {
    if name.len() > crate::fs::NAME_MAX {
        return Err(Errno::ENAMETOOLONG);
    }
    let idx = fscache::allocate_node();
    fscache::init_node_metadata(idx, name, mode, uid, gid);
    fscache::set_node_vtable(idx, &KERNELFS_OPS);
    set_file_data(idx, FileData { read_fn: Some(read_fn), cookie });
    fscache::publish_node(idx, NodeType::Char);
    fscache::attach_child(parent, idx);
    Ok(idx)
}

/// Allocate a cookie for callers with no natural identity of their own.
pub fn next_anon_cookie() -> u64 {
    NEXT_ANON_COOKIE.fetch_add(1, Ordering::Relaxed)
}

/// Back the cache root itself with kernelfs, so top-level `mkdir` works
/// before any disk back-end is mounted over it. Called once at fs subsystem
/// init, before anything else touches the tree.
pub fn mount_root() {
    fscache::set_node_vtable(fscache::root_index(), &KERNELFS_OPS);
}

/// Build the `/dev` directory under the cache root. Called once at fs
/// subsystem init; individual drivers populate it afterwards with
/// `create_file`/`create_dir`.
pub fn mount_dev() -> KernelResult<NodeIndex> {
    create_dir(fscache::root_index(), "dev", 0o755, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_text(_cookie: u64, seek_pos: u64, buf: &mut [u8]) -> KernelResult<usize> {
        const TEXT: &[u8] = b"hello from kernelfs\n";
        if seek_pos as usize >= TEXT.len() {
            return Ok(0);
        }
        let remaining = &TEXT[seek_pos as usize..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        Ok(n)
    }

    #[test]
    fn create_file_is_readable_through_vtable() {
        fscache::init();
        let dev = mount_dev().unwrap();
        let file = create_file(dev, "version", 0o444, 0, 0, static_text, 0).unwrap();

        let mut instance = [0u8; 32];
        let mut buf = [0u8; 64];
        let n = KERNELFS_OPS.read(file, &mut instance, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello from kernelfs\n");

        // Second read from the advanced seek position hits EOF.
        let n2 = KERNELFS_OPS.read(file, &mut instance, &mut buf).unwrap();
        assert_eq!(n2, 0);
    }

    #[test]
    fn load_node_always_misses() {
        fscache::init();
        let dev = mount_dev().unwrap();
        assert_eq!(
            KERNELFS_OPS.load_node(dev, "nonexistent", 0),
            Err(Errno::ENOENT)
        );
    }
}

//! The node arena, path resolution, and reference counting (C9, spec §4.8).
//!
//! Grounded in `original_source/src/vfs/fscache.c`: nodes live in
//! fixed-size blocks allocated on demand and never freed, addressed by
//! arena index rather than pointer so that the parent/child/sibling tree
//! can contain cycles (root's children point back at root) without
//! reference-counted smart pointers (spec §9 design notes). A slot is free
//! iff its type byte is zero; claiming one is a single CAS.
//!
//! Per spec §9's open question on the two overlapping lock regimes: this
//! implementation treats `ref_count` as authoritative for node lifetime
//! (try_acquire/release), and the per-node rw-lock as protecting only the
//! node's mutable fields (name, tree links, vtable, internal_data) during
//! hand-over-hand path resolution and replace/mount. A node can therefore
//! be read-locked by a walker while a concurrent `release` drops its
//! ref_count to zero; eviction of a zero-refcount node still requires
//! acquiring the write lock before unlinking, so a live walker always
//! observes a consistent (if soon-to-be-evicted) node.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use crate::errno::{Errno, KernelResult};
use crate::fs::{Access, NodeFlags, NodeType, SeekWhence, NAME_MAX};
use crate::sync::{GlobalState, RwLock};

/// Index into the node arena. `NIL` marks "no such node" (e.g. a root's
/// parent, or an empty sibling link).
pub type NodeIndex = u32;
pub const NIL: NodeIndex = u32::MAX;

/// Slots per arena block. Chosen so that one block is a handful of pages;
/// the arena grows by appending a new block when every existing slot in
/// every block is claimed.
const BLOCK_SLOTS: usize = 64;

/// Sentinel written to `node_type` while a slot is being filled in by
/// `allocate_node`, before the caller publishes the real type. Distinct
/// from 0 (free) and from every real `NodeType` discriminant (1..=8).
const CLAIMED: u8 = 0xFF;

/// Operations surface every back-end implements, one vtable per node
/// (spec §4.8 "Operations surface"). Directory reads yield dirents; file
/// reads yield bytes. Every node (file or directory) shares this trait;
/// back-ends that don't support an operation return `Errno::ENOSYS`.
pub trait NodeOps: Sync {
    fn read(&self, _node: NodeIndex, _instance: &mut [u8; 32], _buf: &mut [u8]) -> KernelResult<usize> {
        Err(Errno::EIO)
    }

    fn write(&self, _node: NodeIndex, _instance: &mut [u8; 32], _buf: &[u8]) -> KernelResult<usize> {
        Err(Errno::EIO)
    }

    fn seek(
        &self,
        _node: NodeIndex,
        _instance: &mut [u8; 32],
        _offset: i64,
        _whence: SeekWhence,
    ) -> KernelResult<i64> {
        Err(Errno::EIO)
    }

    fn close(&self, _node: NodeIndex, _instance: &mut [u8; 32]) -> KernelResult<()> {
        Ok(())
    }

    /// Populate `out` (an already-allocated, still-claimed node) as the
    /// child of `parent` named `name`. Returns `ENOENT` if no such child
    /// exists in the back-end's own storage.
    fn load_node(&self, parent: NodeIndex, name: &str, out: NodeIndex) -> KernelResult<()>;

    fn create_child(
        &self,
        _parent: NodeIndex,
        _name: &str,
        _node_type: NodeType,
        _uid: u32,
        _gid: u32,
        _mode: u32,
        _out: NodeIndex,
    ) -> KernelResult<()> {
        Err(Errno::ENOSYS)
    }

    fn unload_node(&self, _node: NodeIndex) -> KernelResult<()> {
        Ok(())
    }
}

/// Fields mutated only under the node's rw-lock: tree links, metadata, and
/// the opaque back-end blob.
pub struct NodeInner {
    pub name: [u8; NAME_MAX + 1],
    pub name_len: u8,
    pub flags: NodeFlags,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub parent: NodeIndex,
    pub first_child: NodeIndex,
    pub next_sibling: NodeIndex,
    pub prev_sibling: NodeIndex,
    pub vtable: Option<&'static dyn NodeOps>,
    pub internal_data: [u8; 32],
}

impl NodeInner {
    const fn empty() -> Self {
        Self {
            name: [0; NAME_MAX + 1],
            name_len: 0,
            flags: NodeFlags::empty(),
            mode: 0,
            uid: 0,
            gid: 0,
            parent: NIL,
            first_child: NIL,
            next_sibling: NIL,
            prev_sibling: NIL,
            vtable: None,
            internal_data: [0; 32],
        }
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }
}

/// One fscache node (spec §3 "fscache node"). `node_type` doubles as the
/// arena's free/claimed/live sentinel; `ref_count` is the authoritative
/// liveness counter (>= 0 live, -1 marked for destruction).
pub struct Node {
    node_type: AtomicU8,
    ref_count: AtomicI32,
    inner: RwLock<NodeInner>,
}

impl Node {
    const fn empty() -> Self {
        Self {
            node_type: AtomicU8::new(0),
            ref_count: AtomicI32::new(0),
            inner: RwLock::new(NodeInner::empty()),
        }
    }

    pub fn node_type(&self) -> Option<NodeType> {
        NodeType::from_u8(self.node_type.load(Ordering::Acquire))
    }

    pub fn read(&self) -> crate::sync::RwLockReadGuard<'_, NodeInner> {
        self.inner.read()
    }

    pub fn write(&self) -> crate::sync::RwLockWriteGuard<'_, NodeInner> {
        self.inner.write()
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Relaxed)
    }
}

struct Block {
    nodes: [Node; BLOCK_SLOTS],
}

impl Block {
    fn new() -> Box<Self> {
        Box::new(Block {
            nodes: core::array::from_fn(|_| Node::empty()),
        })
    }
}

/// The arena: an append-only list of leaked blocks. Blocks are never freed
/// or moved, so a `&'static Node` handed out once stays valid forever;
/// growth only ever appends, so readers need the lock only long enough to
/// copy out a block pointer.
struct Arena {
    blocks: Vec<&'static Block>,
}

static ARENA: crate::sync::SpinMutex<Arena> = crate::sync::SpinMutex::new(Arena { blocks: Vec::new() });

fn node_ref(idx: NodeIndex) -> &'static Node {
    let block_idx = idx as usize / BLOCK_SLOTS;
    let slot_idx = idx as usize % BLOCK_SLOTS;
    let blocks = ARENA.lock();
    &blocks.blocks[block_idx].nodes[slot_idx]
}

fn try_claim_in_block(block_idx: usize) -> Option<NodeIndex> {
    let block: &'static Block = {
        let blocks = ARENA.lock();
        blocks.blocks[block_idx]
    };
    for (slot_idx, node) in block.nodes.iter().enumerate() {
        if node
            .node_type
            .compare_exchange(0, CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return Some((block_idx * BLOCK_SLOTS + slot_idx) as NodeIndex);
        }
    }
    None
}

/// Allocate a cleared node slot, growing the arena by one block if every
/// existing slot is claimed (spec §4.8: "start with N slots, grow by
/// appending blocks").
pub fn allocate_node() -> NodeIndex {
    loop {
        let block_count = ARENA.lock().blocks.len();
        for b in 0..block_count {
            if let Some(idx) = try_claim_in_block(b) {
                let node = node_ref(idx);
                *node.inner.write() = NodeInner::empty();
                node.ref_count.store(0, Ordering::Relaxed);
                return idx;
            }
        }
        ARENA.lock().blocks.push(Box::leak(Block::new()));
    }
}

/// Publish a claimed node's final type, making it visible to `node_type()`
/// readers and concluding the allocate-then-fill-in-then-publish sequence.
pub fn publish_node(idx: NodeIndex, node_type: NodeType) {
    node_ref(idx).node_type.store(node_type as u8, Ordering::Release);
}

/// Return a claimed-but-never-published node slot to the free list. Used
/// when `load_node` fails: the slot was reserved by [`allocate_node`] before
/// the back-end was ever consulted, and nothing was linked into the tree, so
/// it must go back to `0` or the slot leaks forever. Mirrors
/// `original_source/src/vfs/fscache.c`'s `fscache_request_node`, which does
/// `atomic_store(&new_node->type, 0)` unconditionally whenever the back-end
/// lookup fails.
fn free_node(idx: NodeIndex) {
    node_ref(idx).node_type.store(0, Ordering::Release);
}

/// CAS-increment `ref_count` iff it is `>= 0` (spec §4.8 "Reference
/// counts"). Fails (no increment) once the node has been marked `-1` for
/// destruction.
pub fn try_acquire(idx: NodeIndex) -> KernelResult<()> {
    let node = node_ref(idx);
    loop {
        let cur = node.ref_count.load(Ordering::Relaxed);
        if cur < 0 {
            return Err(Errno::ENOENT);
        }
        if node
            .ref_count
            .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return Ok(());
        }
        core::hint::spin_loop();
    }
}

/// Drop one reference. Never evicts by itself -- eviction is a separate,
/// implementation-defined policy that MUST NOT run while `ref_count > 0`
/// (spec §4.8).
pub fn release(idx: NodeIndex) {
    node_ref(idx).ref_count.fetch_sub(1, Ordering::AcqRel);
}

fn link_child(parent_idx: NodeIndex, child_idx: NodeIndex) {
    let parent = node_ref(parent_idx);
    let child = node_ref(child_idx);
    let mut parent_inner = parent.write();
    let mut child_inner = child.write();
    child_inner.parent = parent_idx;
    child_inner.prev_sibling = NIL;
    child_inner.next_sibling = parent_inner.first_child;
    if parent_inner.first_child != NIL {
        node_ref(parent_inner.first_child).write().prev_sibling = child_idx;
    }
    parent_inner.first_child = child_idx;
}

fn unlink(idx: NodeIndex) {
    let node = node_ref(idx);
    let (parent_idx, prev, next) = {
        let inner = node.read();
        (inner.parent, inner.prev_sibling, inner.next_sibling)
    };
    if prev != NIL {
        node_ref(prev).write().next_sibling = next;
    } else if parent_idx != NIL {
        node_ref(parent_idx).write().first_child = next;
    }
    if next != NIL {
        node_ref(next).write().prev_sibling = prev;
    }
}

/// `replace_node` (spec §4.8 "Replace/mount"): requires `old.ref_count ==
/// 0`, CASes it to -1, unlinks it, and links `new` under `new_parent` at
/// the head of its children. Used both for mount-point substitution and
/// for ordinary node replacement.
pub fn replace_node(old: NodeIndex, new: NodeIndex, new_parent: NodeIndex) -> KernelResult<NodeIndex> {
    let old_node = node_ref(old);
    old_node
        .ref_count
        .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Relaxed)
        .map_err(|_| Errno::EACCES)?;
    unlink(old);
    link_child(new_parent, new);
    Ok(new)
}

static ROOT: GlobalState<NodeIndex> = GlobalState::new();

pub fn root_index() -> NodeIndex {
    ROOT.with(|r| *r).expect("fscache not initialized")
}

/// Create the immortal cache root (spec §3: "the cache root is immortal").
/// Called once during `fs` subsystem init; a second call is a no-op (tests
/// exercising individual back-ends may each call this defensively).
pub fn init() {
    if ROOT.with(|_| ()).is_some() {
        return;
    }
    let idx = allocate_node();
    {
        let node = node_ref(idx);
        let mut inner = node.write();
        inner.mode = 0o755;
        inner.parent = NIL;
    }
    node_ref(idx).ref_count.store(1, Ordering::Relaxed);
    publish_node(idx, NodeType::Directory);
    let _ = ROOT.init(idx);
}

/// Status returned by [`request_node`] (spec §4.8 "Path resolution").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// The full path resolved to a live node.
    Found,
    /// Every component but the last resolved; the last component does not
    /// exist. Lets `create`-style callers proceed without a second walk.
    OneLevelAway,
}

fn split_tokens(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn find_child_locked(parent_inner: &NodeInner, token: &str) -> Option<NodeIndex> {
    let mut cur = parent_inner.first_child;
    while cur != NIL {
        let child = node_ref(cur);
        let child_inner = child.read();
        if child_inner.name() == token {
            return Some(cur);
        }
        let next = child_inner.next_sibling;
        drop(child_inner);
        cur = next;
    }
    None
}

/// Follow the `MOUNT_POINT` flag: resolution crossing a mount point
/// silently substitutes the mounted filesystem's root (spec §4.8).
fn resolve_mount(idx: NodeIndex) -> NodeIndex {
    let inner = node_ref(idx).read();
    if inner.flags.contains(NodeFlags::MOUNT_POINT) && inner.first_child != NIL {
        inner.first_child
    } else {
        idx
    }
}

/// Path resolution (spec §4.8). Walks the cache hand-over-hand, read-locking
/// each node in turn and releasing the previous one only after the next is
/// locked. On a missing child, upgrades to a writer, double-checks, and
/// calls the parent's `load_node`; a miss on the *last* token returns the
/// parent with [`ResolveStatus::OneLevelAway`] so create operations can
/// proceed without re-walking. The returned node is held with one extra
/// reference (`try_acquire`'d); the caller must `release` it.
pub fn request_node(path: &str) -> KernelResult<(NodeIndex, ResolveStatus)> {
    let mut current = resolve_mount(root_index());
    let tokens: Vec<&str> = split_tokens(path).collect();

    let mut current_read = node_ref(current).read();
    let mut iter = tokens.iter().peekable();
    while let Some(&token) = iter.next() {
        let is_last = iter.peek().is_none();

        if let Some(child) = find_child_locked(&current_read, token) {
            let child = resolve_mount(child);
            let child_read = node_ref(child).read();
            drop(current_read);
            current = child;
            current_read = child_read;
            continue;
        }

        // Miss: upgrade to writer and double-check before calling load_node.
        let mut current_write = current_read.upgrade();
        if let Some(child) = find_child_locked(&current_write, token) {
            current_read = current_write.downgrade();
            let child = resolve_mount(child);
            let child_read = node_ref(child).read();
            drop(current_read);
            current = child;
            current_read = child_read;
            continue;
        }

        let vtable = current_write.vtable;
        let parent_idx = current;
        let vtable = match vtable {
            Some(v) => v,
            None => return Err(Errno::EIO),
        };

        let new_idx = allocate_node();
        match vtable.load_node(parent_idx, token, new_idx) {
            Ok(()) => {
                drop(current_write);
                link_child(parent_idx, new_idx);
                try_acquire(new_idx)?;
                current = resolve_mount(new_idx);
                current_read = node_ref(current).read();
            }
            Err(Errno::ENOENT) if is_last => {
                drop(current_write);
                free_node(new_idx);
                try_acquire(parent_idx)?;
                return Ok((parent_idx, ResolveStatus::OneLevelAway));
            }
            Err(e) => {
                drop(current_write);
                free_node(new_idx);
                return Err(e);
            }
        }
    }

    try_acquire(current)?;
    Ok((current, ResolveStatus::Found))
}

/// `access()` consulting a node's own uid/gid/mode under its read lock.
pub fn node_access(idx: NodeIndex, process_uid: u32) -> Access {
    let inner = node_ref(idx).read();
    crate::fs::access(inner.mode, inner.uid, inner.gid, process_uid)
}

/// Attach a freshly allocated, not-yet-linked node as a child of `parent`
/// at the head of its children list. Used by back-ends that build their
/// tree eagerly (e.g. `kernelfs`) rather than through `load_node`.
pub fn attach_child(parent: NodeIndex, child: NodeIndex) {
    link_child(parent, child);
}

/// Read a node's opaque back-end blob (spec §3 `internal_data`).
pub fn node_internal_data(idx: NodeIndex) -> [u8; 32] {
    node_ref(idx).read().internal_data
}

/// Overwrite a node's opaque back-end blob.
pub fn set_node_internal_data(idx: NodeIndex, data: [u8; 32]) {
    node_ref(idx).write().internal_data = data;
}

/// Set a node's name, mode, uid and gid in one locked pass (used by
/// back-ends populating a freshly allocated node).
pub fn init_node_metadata(idx: NodeIndex, name: &str, mode: u32, uid: u32, gid: u32) {
    let mut inner = node_ref(idx).write();
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_MAX);
    inner.name[..n].copy_from_slice(&bytes[..n]);
    inner.name_len = n as u8;
    inner.mode = mode;
    inner.uid = uid;
    inner.gid = gid;
}

/// Set a node's vtable pointer (back-ends call this once, right after
/// `allocate_node`, before `publish_node`).
pub fn set_node_vtable(idx: NodeIndex, vtable: &'static dyn NodeOps) {
    node_ref(idx).write().vtable = Some(vtable);
}

/// Mark `idx` as a mount point whose resolved root is `mounted_root`.
pub fn set_mount_point(idx: NodeIndex, mounted_root: NodeIndex) {
    let mut inner = node_ref(idx).write();
    inner.flags.insert(NodeFlags::MOUNT_POINT);
    inner.first_child = mounted_root;
}

/// The node type tag, for callers outside this module that only have a
/// [`NodeIndex`] (e.g. the syscall dispatcher filling in a `Dirent`).
pub fn node_type(idx: NodeIndex) -> Option<NodeType> {
    node_ref(idx).node_type()
}

/// Reconstruct `idx`'s absolute path by walking `parent` links up to the
/// cache root, one node read-locked at a time. Used by `fchdir` (spec
/// §4.3), which is handed a node rather than a path string.
pub fn node_path(idx: NodeIndex) -> String {
    let mut components: Vec<String> = Vec::new();
    let mut cur = idx;
    let root = root_index();
    while cur != root && cur != NIL {
        let inner = node_ref(cur).read();
        components.push(String::from(inner.name()));
        cur = inner.parent;
    }
    if components.is_empty() {
        return String::from("/");
    }
    let mut path = String::new();
    for component in components.iter().rev() {
        path.push('/');
        path.push_str(component);
    }
    path
}

/// Mode/uid/gid/vtable captured under one lock, the fields `open()` needs to
/// build a [`crate::fs::handle::VfsHandle`] (spec §4.9 "dispatch").
#[derive(Clone, Copy)]
pub struct NodeMeta {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub vtable: Option<&'static dyn NodeOps>,
}

pub fn node_meta(idx: NodeIndex) -> NodeMeta {
    let inner = node_ref(idx).read();
    NodeMeta {
        mode: inner.mode,
        uid: inner.uid,
        gid: inner.gid,
        vtable: inner.vtable,
    }
}

/// Snapshot of a directory's immediate children, for `getdents`. Taken under
/// the parent's read lock one child at a time; the returned names/types are
/// copies, so the walk never holds more than one node locked at a time.
pub fn list_children(idx: NodeIndex) -> Vec<(NodeIndex, String, NodeType)> {
    let mut out = Vec::new();
    let mut cur = node_ref(idx).read().first_child;
    while cur != NIL {
        let child = node_ref(cur).read();
        if let Some(ty) = node_ref(cur).node_type() {
            out.push((cur, String::from(child.name()), ty));
        }
        cur = child.next_sibling;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDirOps;
    impl NodeOps for NullDirOps {
        fn load_node(&self, _parent: NodeIndex, _name: &str, _out: NodeIndex) -> KernelResult<()> {
            Err(Errno::ENOENT)
        }
    }
    static NULL_DIR_OPS: NullDirOps = NullDirOps;

    fn reset_for_test() {
        // Each test gets a fresh root; the arena itself is process-global
        // in a real kernel, but unit tests run in isolated processes.
        let idx = allocate_node();
        node_ref(idx).write().mode = 0o755;
        node_ref(idx).write().vtable = Some(&NULL_DIR_OPS);
        node_ref(idx).ref_count.store(1, Ordering::Relaxed);
        publish_node(idx, NodeType::Directory);
        let _ = ROOT.init(idx);
    }

    #[test]
    fn allocate_and_publish_roundtrip() {
        let idx = allocate_node();
        assert!(node_ref(idx).node_type().is_none());
        publish_node(idx, NodeType::Regular);
        assert_eq!(node_ref(idx).node_type(), Some(NodeType::Regular));
    }

    #[test]
    fn try_acquire_fails_after_mark_for_destruction() {
        let idx = allocate_node();
        publish_node(idx, NodeType::Regular);
        node_ref(idx).ref_count.store(-1, Ordering::Relaxed);
        assert_eq!(try_acquire(idx), Err(Errno::ENOENT));
    }

    #[test]
    fn link_and_find_child() {
        reset_for_test();
        let root = root_index();
        let child = allocate_node();
        node_ref(child).write().name[..4].copy_from_slice(b"home");
        node_ref(child).write().name_len = 4;
        publish_node(child, NodeType::Directory);
        link_child(root, child);

        let inner = node_ref(root).read();
        assert_eq!(find_child_locked(&inner, "home"), Some(child));
        assert_eq!(find_child_locked(&inner, "nope"), None);
    }

    #[test]
    fn request_node_resolves_root() {
        reset_for_test();
        let (idx, status) = request_node("/").unwrap();
        assert_eq!(status, ResolveStatus::Found);
        assert_eq!(idx, root_index());
        release(idx);
    }

    #[test]
    fn request_node_missing_last_component_is_one_level_away() {
        reset_for_test();
        let (idx, status) = request_node("/missing").unwrap();
        assert_eq!(status, ResolveStatus::OneLevelAway);
        assert_eq!(idx, root_index());
        release(idx);
    }
}

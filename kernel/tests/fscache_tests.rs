//! Integration test for the VFS node cache (C9, spec §4.8).
//!
//! Unlike `frame_allocator_tests` and `rwlock_tests`, `fscache` allocates
//! through the global allocator (arena blocks, path-token vectors), so this
//! binary boots far enough through the real Limine protocol to bring up a
//! working heap (`boot::init_memory_for_tests`) before touching the cache.

#![no_std]
#![no_main]

extern crate alloc;

use hobbes_kernel::errno::Errno;
use hobbes_kernel::fs::fscache::{self, NodeIndex, NodeOps, ResolveStatus};
use hobbes_kernel::fs::NodeType;
use hobbes_kernel::{exit_qemu, serial_println, QemuExitCode};

/// A trivial directory back-end: every `load_node` call misses, as if the
/// directory's full contents are already linked in the cache.
struct NullDirOps;
impl NodeOps for NullDirOps {
    fn load_node(&self, _parent: NodeIndex, _name: &str, _out: NodeIndex) -> Result<(), Errno> {
        Err(Errno::ENOENT)
    }
}
static NULL_DIR_OPS: NullDirOps = NullDirOps;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    // SAFETY: first and only call, before anything else touches `crate::mm`.
    unsafe {
        hobbes_kernel::boot::init_memory_for_tests();
    }
    serial_println!("fscache_tests: starting");

    fscache::init();
    link_home_then_resolve_it();
    missing_leaf_reports_one_level_away();
    mount_point_substitutes_root();
    try_acquire_fails_once_marked_for_destruction();

    serial_println!("fscache_tests: [ok]");
    exit_qemu(QemuExitCode::Success)
}

fn make_dir(name: &str) -> NodeIndex {
    let idx = fscache::allocate_node();
    fscache::init_node_metadata(idx, name, 0o755, 0, 0);
    fscache::set_node_vtable(idx, &NULL_DIR_OPS);
    fscache::publish_node(idx, NodeType::Directory);
    idx
}

fn link_home_then_resolve_it() {
    let root = fscache::root_index();
    let home = make_dir("home");
    fscache::attach_child(root, home);
    // ref_count starts at 0 for a freshly allocated node, matching a node
    // that exists only via cache linkage until someone opens it.

    let (resolved, status) = fscache::request_node("/home").expect("resolve /home");
    assert_eq!(status, ResolveStatus::Found);
    assert_eq!(resolved, home);
    fscache::release(resolved);
    serial_println!("  link_home_then_resolve_it: [ok]");
}

fn missing_leaf_reports_one_level_away() {
    let (parent, status) = fscache::request_node("/home/nope").expect("resolve /home/nope");
    assert_eq!(status, ResolveStatus::OneLevelAway);
    let home_idx = {
        let (idx, _) = fscache::request_node("/home").unwrap();
        fscache::release(idx);
        idx
    };
    assert_eq!(parent, home_idx);
    fscache::release(parent);
    serial_println!("  missing_leaf_reports_one_level_away: [ok]");
}

fn mount_point_substitutes_root() {
    let root = fscache::root_index();
    let mnt = make_dir("mnt");
    fscache::attach_child(root, mnt);

    let mounted_root = make_dir("iso-root");
    fscache::set_mount_point(mnt, mounted_root);

    // Resolving "/mnt" itself (zero components past the mount point) still
    // crosses the mount per spec §4.8's "resolution crossing it silently
    // substitutes the root node of the mounted filesystem".
    let (resolved, status) = fscache::request_node("/mnt").expect("resolve /mnt");
    assert_eq!(status, ResolveStatus::Found);
    assert_eq!(resolved, mounted_root);
    fscache::release(resolved);
    serial_println!("  mount_point_substitutes_root: [ok]");
}

fn try_acquire_fails_once_marked_for_destruction() {
    let idx = make_dir("doomed");
    fscache::try_acquire(idx).expect("first acquire succeeds");
    fscache::release(idx);
    // Drive ref_count to -1 the same way `replace_node` does, by CASing a
    // zero-refcount node: attach it under root first so replace_node has a
    // parent to unlink from.
    let root = fscache::root_index();
    fscache::attach_child(root, idx);
    let replacement = make_dir("replacement");
    fscache::replace_node(idx, replacement, root).expect("replace_node");
    assert_eq!(fscache::try_acquire(idx), Err(Errno::ENOENT));
    serial_println!("  try_acquire_fails_once_marked_for_destruction: [ok]");
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    hobbes_kernel::test_panic_handler(info)
}

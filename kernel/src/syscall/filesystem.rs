//! Filesystem syscalls (spec §4.9, §6): `read`/`write`/`open`/`close`,
//! `stat`/`fstat`/`lstat`, `lseek`, `mkdir`, `getdents`, and the cwd trio
//! `chdir`/`fchdir`/`getcwd`.
//!
//! Grounded in `original_source/src/syscall/fs/*.c`: path arguments are
//! canonicalized against the calling process's cwd before ever reaching
//! `fscache::request_node`, and `getdents` truncates the caller's buffer to
//! a whole number of [`crate::fs::Dirent`] records before reading, exactly
//! as `entries.c`'s `count_adj` does.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::errno::{Errno, KernelResult};
use crate::fs::fscache::{self, ResolveStatus};
use crate::fs::{Dirent, NodeType, OpenFlags, SeekWhence, VfsHandle, NAME_MAX, PATH_MAX};
use crate::process;

use super::userspace::{copy_string_from_user, copy_to_kernel, copy_to_user};

/// POSIX-shaped `kstat` (spec §4.9): the original's `struct kstat` only
/// ever filled in `mode`/`uid`/`gid`; SPEC_FULL adds `st_size`, derived by
/// seeking the target to `SeekWhence::End` since no back-end tracks a
/// generic node-size field outside the handle that's reading it.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct KStat {
    pub st_type: u8,
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: u64,
}

/// Resolve `path` (absolute or relative to `cwd`) into an absolute,
/// `.`/`..`-free path, bounded by [`PATH_MAX`]. Pure string manipulation --
/// `fscache::request_node`'s own tokenizer tolerates the leading `/` and any
/// internal empty segments this produces.
fn canonicalize(cwd: &str, path: &str) -> KernelResult<String> {
    if path.len() > PATH_MAX {
        return Err(Errno::ENAMETOOLONG);
    }
    let mut stack: Vec<&str> = Vec::new();
    let base = if path.starts_with('/') { "" } else { cwd };
    for component in base.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            c => stack.push(c),
        }
    }
    let mut out = String::new();
    for c in &stack {
        out.push('/');
        out.push_str(c);
    }
    if out.is_empty() {
        out.push('/');
    }
    if out.len() > PATH_MAX {
        return Err(Errno::ENAMETOOLONG);
    }
    Ok(out)
}

fn current_pid() -> KernelResult<process::Pid> {
    process::current().map(|(pid, _)| pid).ok_or(Errno::EFAULT)
}

fn resolve_against_cwd(path: &str) -> KernelResult<String> {
    let pid = current_pid()?;
    let cwd = process::with_process(pid, |p| p.cwd.clone()).ok_or(Errno::EFAULT)?;
    canonicalize(&cwd, path)
}

/// `open(path, flags, mode)` (syscall 2, spec §4.9, B1).
pub fn sys_open(path_ptr: u64, flags: u64, mode: u64) -> KernelResult<i64> {
    let raw_path = copy_string_from_user(path_ptr, PATH_MAX)?;
    let abs_path = resolve_against_cwd(&raw_path)?;
    let flags = OpenFlags::from_bits_truncate(flags as u32);
    let mode = mode as u32;

    let (node, status) = fscache::request_node(&abs_path)?;

    let idx = match status {
        ResolveStatus::Found => {
            if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCL) {
                fscache::release(node);
                return Err(Errno::EEXIST);
            }
            node
        }
        ResolveStatus::OneLevelAway => {
            if !flags.contains(OpenFlags::CREATE) {
                fscache::release(node);
                return Err(Errno::ENOENT);
            }
            let parent = node;
            let name = abs_path.rsplit('/').next().unwrap_or("");
            if name.is_empty() || name.len() > NAME_MAX {
                fscache::release(parent);
                return Err(Errno::ENAMETOOLONG);
            }
            let meta = fscache::node_meta(parent);
            let vtable = meta.vtable.ok_or(Errno::EIO);
            let vtable = match vtable {
                Ok(v) => v,
                Err(e) => {
                    fscache::release(parent);
                    return Err(e);
                }
            };
            let pid = current_pid()?;
            let uid = process::with_process(pid, |p| p.uid).ok_or(Errno::EFAULT)?;
            let new_idx = fscache::allocate_node();
            let created = vtable.create_child(parent, name, NodeType::Regular, uid, 0, mode, new_idx);
            fscache::release(parent);
            created?;
            fscache::try_acquire(new_idx)?;
            new_idx
        }
    };

    let meta = fscache::node_meta(idx);
    let node_type = fscache::node_type(idx).ok_or_else(|| {
        fscache::release(idx);
        Errno::EIO
    });
    let node_type = match node_type {
        Ok(t) => t,
        Err(e) => return Err(e),
    };

    if flags.contains(OpenFlags::DIRECTORY) && node_type != NodeType::Directory {
        fscache::release(idx);
        return Err(Errno::ENOTDIR);
    }

    let vtable = match meta.vtable {
        Some(v) => v,
        None => {
            fscache::release(idx);
            return Err(Errno::EIO);
        }
    };

    let handle = VfsHandle::new(idx, node_type, meta.uid, meta.gid, meta.mode, vtable);

    let pid = current_pid()?;
    let fd = process::with_process(pid, |p| p.alloc_fd(handle)).ok_or(Errno::EFAULT)?;
    match fd {
        Some(fd) => Ok(fd as i64),
        None => Err(Errno::EMFILE),
    }
}

/// `close(fd)` (syscall 3).
pub fn sys_close(fd: u64) -> KernelResult<i64> {
    let pid = current_pid()?;
    let closed = process::with_process(pid, |p| p.close_fd(fd as usize)).ok_or(Errno::EFAULT)?;
    if closed {
        Ok(0)
    } else {
        Err(Errno::EBADF)
    }
}

/// Run `f` against the fd's handle, by temporarily taking it out of the
/// process's fd table (back-end ops need `&mut VfsHandle`, and the process
/// table only ever hands out `&mut Process`, not nested borrows).
fn with_fd<R>(fd: u64, f: impl FnOnce(&mut VfsHandle) -> KernelResult<R>) -> KernelResult<R> {
    let pid = current_pid()?;
    process::with_process(pid, |p| {
        let slot = p.fds.get_mut(fd as usize).ok_or(Errno::EBADF)?;
        let handle = slot.as_mut().ok_or(Errno::EBADF)?;
        f(handle)
    })
    .ok_or(Errno::EFAULT)?
}

/// `read(fd, ubuf, len)` (syscall 0, spec B2: directory fd -> `EISDIR`).
pub fn sys_read(fd: u64, ubuf: u64, len: u64) -> KernelResult<i64> {
    let n = with_fd(fd, |handle| {
        if handle.node_type() == NodeType::Directory {
            return Err(Errno::EISDIR);
        }
        let mut buf = alloc::vec![0u8; len as usize];
        let n = handle.read(&mut buf)?;
        copy_to_user(ubuf, &buf[..n])?;
        Ok(n)
    })?;
    Ok(n as i64)
}

/// `write(fd, ubuf, len)` (syscall 1).
pub fn sys_write(fd: u64, ubuf: u64, len: u64) -> KernelResult<i64> {
    let mut buf = alloc::vec![0u8; len as usize];
    copy_to_kernel(&mut buf, ubuf)?;
    let n = with_fd(fd, |handle| handle.write(&buf))?;
    Ok(n as i64)
}

/// `lseek(fd, offset, whence)` (syscall 8).
pub fn sys_lseek(fd: u64, offset: u64, whence: u64) -> KernelResult<i64> {
    let whence = match whence {
        0 => SeekWhence::Set,
        1 => SeekWhence::Cur,
        2 => SeekWhence::End,
        _ => return Err(Errno::EINVAL),
    };
    with_fd(fd, |handle| handle.seek(offset as i64, whence))
}

/// `getdents(fd, ubuf, len)` (syscall 9, spec P6/scenario 2): truncate `len`
/// down to a whole number of [`Dirent`] records before reading, mirroring
/// the original's `count_adj = (count / sizeof(dirent)) * sizeof(dirent)`.
pub fn sys_getdents(fd: u64, ubuf: u64, len: u64) -> KernelResult<i64> {
    const REC: usize = core::mem::size_of::<Dirent>();
    let capped = (len as usize / REC) * REC;

    let n = with_fd(fd, |handle| {
        if handle.node_type() != NodeType::Directory {
            return Err(Errno::ENOTDIR);
        }
        let mut buf = alloc::vec![0u8; capped];
        let n = handle.read(&mut buf)?;
        copy_to_user(ubuf, &buf[..n])?;
        Ok(n)
    })?;
    Ok(n as i64)
}

/// `mkdir(path, mode)` (syscall 10).
pub fn sys_mkdir(path_ptr: u64, mode: u64) -> KernelResult<i64> {
    let raw_path = copy_string_from_user(path_ptr, PATH_MAX)?;
    let abs_path = resolve_against_cwd(&raw_path)?;

    let (node, status) = fscache::request_node(&abs_path)?;
    if status == ResolveStatus::Found {
        fscache::release(node);
        return Err(Errno::EEXIST);
    }
    let parent = node;
    let name = abs_path.rsplit('/').next().unwrap_or("");
    if name.is_empty() || name.len() > NAME_MAX {
        fscache::release(parent);
        return Err(Errno::ENAMETOOLONG);
    }
    let meta = fscache::node_meta(parent);
    let vtable = match meta.vtable {
        Some(v) => v,
        None => {
            fscache::release(parent);
            return Err(Errno::EIO);
        }
    };
    let pid = current_pid()?;
    let uid = process::with_process(pid, |p| p.uid).ok_or(Errno::EFAULT)?;
    let new_idx = fscache::allocate_node();
    let result = vtable.create_child(parent, name, NodeType::Directory, uid, 0, mode as u32, new_idx);
    fscache::release(parent);
    result?;
    Ok(0)
}

/// `chdir(path)` (syscall 18).
pub fn sys_chdir(path_ptr: u64) -> KernelResult<i64> {
    let raw_path = copy_string_from_user(path_ptr, PATH_MAX)?;
    let abs_path = resolve_against_cwd(&raw_path)?;

    let (node, _status) = fscache::request_node(&abs_path)?;
    let node_type = fscache::node_type(node);
    fscache::release(node);
    if node_type != Some(NodeType::Directory) {
        return Err(Errno::ENOTDIR);
    }

    let pid = current_pid()?;
    process::with_process(pid, |p| p.cwd = abs_path).ok_or(Errno::EFAULT)?;
    Ok(0)
}

/// `fchdir(fd)` (syscall 19): reconstruct the fd's node's absolute path and
/// adopt it as the cwd -- the fd is already a directory, so no additional
/// resolution or permission check is needed.
pub fn sys_fchdir(fd: u64) -> KernelResult<i64> {
    let new_cwd = with_fd(fd, |handle| {
        if handle.node_type() != NodeType::Directory {
            return Err(Errno::ENOTDIR);
        }
        Ok(fscache::node_path(handle.node()))
    })?;
    let pid = current_pid()?;
    process::with_process(pid, |p| p.cwd = new_cwd).ok_or(Errno::EFAULT)?;
    Ok(0)
}

/// `getcwd(ubuf, size)` (syscall 20, grounded in `cwd.c`): `EINVAL` if
/// `size == 0`; `ERANGE` if the cwd (plus its NUL) doesn't fit.
pub fn sys_getcwd(ubuf: u64, size: u64) -> KernelResult<i64> {
    if size == 0 {
        return Err(Errno::EINVAL);
    }
    let pid = current_pid()?;
    let cwd = process::with_process(pid, |p| p.cwd.clone()).ok_or(Errno::EFAULT)?;
    let needed = cwd.len() + 1;
    if needed > size as usize {
        return Err(Errno::ERANGE);
    }
    let mut out = alloc::vec![0u8; needed];
    out[..cwd.len()].copy_from_slice(cwd.as_bytes());
    copy_to_user(ubuf, &out)?;
    Ok(needed as i64)
}

fn build_kstat(node: fscache::NodeIndex, node_type: NodeType, meta: fscache::NodeMeta) -> KernelResult<KStat> {
    let st_size = if node_type == NodeType::Directory {
        0
    } else {
        let vtable = meta.vtable.ok_or(Errno::EIO)?;
        let mut instance = [0u8; 32];
        vtable.seek(node, &mut instance, 0, SeekWhence::End)? as u64
    };
    Ok(KStat {
        st_type: node_type as u8,
        st_mode: meta.mode,
        st_uid: meta.uid,
        st_gid: meta.gid,
        st_size,
    })
}

fn write_kstat_to_user(ubuf: u64, stat: KStat) -> KernelResult<i64> {
    let bytes = unsafe {
        core::slice::from_raw_parts(&stat as *const KStat as *const u8, core::mem::size_of::<KStat>())
    };
    copy_to_user(ubuf, bytes)?;
    Ok(0)
}

/// `stat(path, ubuf)` (syscall 4).
pub fn sys_stat(path_ptr: u64, ubuf: u64) -> KernelResult<i64> {
    let raw_path = copy_string_from_user(path_ptr, PATH_MAX)?;
    let abs_path = resolve_against_cwd(&raw_path)?;
    let (node, _status) = fscache::request_node(&abs_path)?;
    let node_type = fscache::node_type(node).ok_or(Errno::EIO);
    let meta = fscache::node_meta(node);
    let stat = node_type.and_then(|t| build_kstat(node, t, meta));
    fscache::release(node);
    write_kstat_to_user(ubuf, stat?)
}

/// `fstat(fd, ubuf)` (syscall 5).
pub fn sys_fstat(fd: u64, ubuf: u64) -> KernelResult<i64> {
    let stat = with_fd(fd, |handle| {
        let node = handle.node();
        let node_type = handle.node_type();
        let meta = fscache::node_meta(node);
        build_kstat(node, node_type, meta)
    })?;
    write_kstat_to_user(ubuf, stat)
}

/// `lstat(path, ubuf)` (syscall 6): symlinks aren't implemented yet (spec
/// §4.10 non-goal), so this is exactly `stat` -- matching the original's own
/// `syscall_routine_lstat`, which just calls through to `stat`.
pub fn sys_lstat(path_ptr: u64, ubuf: u64) -> KernelResult<i64> {
    sys_stat(path_ptr, ubuf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_resolves_dot_dot() {
        assert_eq!(canonicalize("/a/b", "../c").unwrap(), "/a/c");
    }

    #[test]
    fn canonicalize_absolute_ignores_cwd() {
        assert_eq!(canonicalize("/a/b", "/x/y").unwrap(), "/x/y");
    }

    #[test]
    fn canonicalize_dot_is_noop() {
        assert_eq!(canonicalize("/a/b", ".").unwrap(), "/a/b");
    }

    #[test]
    fn canonicalize_rejects_oversized_input() {
        let long = alloc::string::String::from("a").repeat(PATH_MAX + 1);
        assert_eq!(canonicalize("/", &long), Err(Errno::ENAMETOOLONG));
    }
}

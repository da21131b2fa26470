//! VFS + fscache core (C9) and back-end FS adapters (C11), spec §4.8/§4.10.
//!
//! The cache is a tree of fixed-size, arena-indexed nodes rooted at `/`.
//! [`fscache`] owns the arena, path resolution, and reference counting;
//! [`handle`] is the open-file abstraction syscalls operate on; [`blockdev`]
//! is the narrow contract back-ends use to read physical sectors.  Each
//! back-end (`kernelfs`, `iso9660`, `fat`) is independently gateable by a
//! Cargo feature, and `mbr` enumerates partitions and dispatches `mount` to
//! whichever back-end owns a given partition type.

pub mod blockdev;
pub mod fscache;
pub mod handle;
pub mod mbr;

#[cfg(feature = "kernelfs")]
pub mod kernelfs;

#[cfg(feature = "iso9660")]
pub mod iso9660;

#[cfg(feature = "fat")]
pub mod fat;

pub use fscache::{NodeIndex, NodeOps};
pub use handle::VfsHandle;

/// Longest path accepted from userland, including the terminator (spec §6,
/// "bounded by PATH_MAX or NAME_MAX").
pub const PATH_MAX: usize = 4096;

/// Longest single path component, not including the terminator. Chosen so
/// that the wire [`Dirent`] record is exactly 264 bytes (spec §6).
pub const NAME_MAX: usize = 255;

/// fscache node type tag (spec §3 "fscache node").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Regular = 1,
    Directory = 2,
    Char = 3,
    Block = 4,
    Fifo = 5,
    Symlink = 6,
    Socket = 7,
    Unknown = 8,
}

impl NodeType {
    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => NodeType::Regular,
            2 => NodeType::Directory,
            3 => NodeType::Char,
            4 => NodeType::Block,
            5 => NodeType::Fifo,
            6 => NodeType::Symlink,
            7 => NodeType::Socket,
            8 => NodeType::Unknown,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// fscache node flags (spec §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        const DIRTY       = 1 << 0;
        const MOUNT_POINT = 1 << 1;
    }
}

bitflags::bitflags! {
    /// `open()` flags (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const EX        = 1;
        const WRITE     = 2;
        const READ      = 4;
        const CREATE    = 8;
        const EXCL      = 0x10;
        const DIRECTORY = 0x20;
    }
}

/// `lseek` whence values (`vfs_seek_whence_t` in the original source).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

/// Result of [`fscache::access`]: which of read/write/execute the caller is
/// permitted, per spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

/// Permission check (spec §4.8): "uid 0 has RW always and X if any execute
/// bit is set; else the owner bits apply if uids match, otherwise the
/// 'other' bits (group bits are not yet consulted -- spec §9 design notes
/// accept this as a known gap)."
pub fn access(mode: u32, file_uid: u32, _file_gid: u32, process_uid: u32) -> Access {
    if process_uid == 0 {
        return Access {
            read: true,
            write: true,
            exec: mode & 0o111 != 0,
        };
    }
    let bits = if process_uid == file_uid {
        (mode >> 6) & 0o7
    } else {
        mode & 0o7
    };
    Access {
        read: bits & 0o4 != 0,
        write: bits & 0o2 != 0,
        exec: bits & 0o1 != 0,
    }
}

/// Wire-format directory entry (spec §3/§6): fixed 264 bytes, filled
/// sequentially into a user buffer by `getdents`. Short writes (less than
/// one full record) are never produced.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Dirent {
    pub name: [u8; NAME_MAX + 1],
    pub dirent_type: u8,
    pub reserved: [u8; 7],
}

const _: () = assert!(core::mem::size_of::<Dirent>() == 264);

impl Dirent {
    pub fn new(name: &str, node_type: NodeType) -> Self {
        let mut buf = [0u8; NAME_MAX + 1];
        let bytes = name.as_bytes();
        let n = bytes.len().min(NAME_MAX);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self {
            name: buf,
            dirent_type: node_type as u8,
            reserved: [0; 7],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_full_access() {
        let a = access(0o644, 1000, 1000, 0);
        assert_eq!(a, Access { read: true, write: true, exec: false });
    }

    #[test]
    fn owner_bits_apply_to_matching_uid() {
        let a = access(0o750, 1000, 1000, 1000);
        assert!(a.read && a.write && a.exec);
    }

    #[test]
    fn other_bits_apply_otherwise() {
        let a = access(0o754, 1000, 1000, 2000);
        assert!(a.read && !a.write && !a.exec);
    }

    #[test]
    fn dirent_is_264_bytes() {
        assert_eq!(core::mem::size_of::<Dirent>(), 264);
    }
}

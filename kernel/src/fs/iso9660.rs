//! ISO9660, read-only (spec §4.10). Grounded in
//! `original_source/src/vfs/iso9660/iso9660.c`: directory records are
//! walked a `logical_block_size` at a time straight off the drive; the
//! path table is ignored entirely since every directory is reachable
//! through directory records too.
//!
//! Name normalization (spec §4.10): `;` and the version suffix after it
//! are stripped, letters are lowercased, a trailing `.` (files with no
//! extension) is dropped, and the two special single-byte identifiers
//! `\0`/`\1` become `.`/`..`.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::errno::{Errno, KernelResult};
use crate::fs::blockdev::BlockDevice;
use crate::fs::fscache::{self, NodeIndex, NodeOps};
use crate::fs::{NodeType, SeekWhence};

/// LBA of the primary volume descriptor, fixed by the standard (spec §6).
const PVD_LBA: u64 = 16;

/// On-disk directory record, enough of it to drive the cache (not a
/// complete field-for-field transcription of the standard).
#[derive(Clone, Copy)]
struct DirectoryRecord {
    length: u8,
    extent_lba: u32,
    data_length: u32,
    file_flags: u8,
    file_name_length: u8,
    file_identifier: [u8; 222], // max representable given `length` is a u8
}

const DIR_RECORD_FLAG_DIRECTORY: u8 = 0x02;

impl DirectoryRecord {
    /// Parse a directory record from the start of `bytes`. `bytes` must
    /// contain at least the record's own `length` (read from `bytes[0]`).
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let length = bytes[0];
        if length == 0 || (length as usize) > bytes.len() {
            return None;
        }
        if (length as usize) < 34 {
            return None;
        }
        let extent_lba = u32::from_le_bytes(bytes[2..6].try_into().ok()?);
        let data_length = u32::from_le_bytes(bytes[10..14].try_into().ok()?);
        let file_flags = bytes[25];
        let file_name_length = bytes[32];
        let mut file_identifier = [0u8; 222];
        let name_end = (33 + file_name_length as usize).min(bytes.len()).min(33 + 222);
        let n = name_end - 33;
        file_identifier[..n].copy_from_slice(&bytes[33..33 + n]);
        Some(Self {
            length,
            extent_lba,
            data_length,
            file_flags,
            file_name_length,
            file_identifier,
        })
    }

    fn is_directory(&self) -> bool {
        self.file_flags & DIR_RECORD_FLAG_DIRECTORY != 0
    }
}

/// Lowercase, de-versioned, de-dotted name for one directory-record
/// identifier (spec §4.10).
fn normalize_name(record: &DirectoryRecord) -> heapless_name::NameBuf {
    let in_bytes = &record.file_identifier[..record.file_name_length as usize];

    if in_bytes.len() == 1 && in_bytes[0] == 0 {
        return heapless_name::NameBuf::from_str(".");
    }
    if in_bytes.len() == 1 && in_bytes[0] == 1 {
        return heapless_name::NameBuf::from_str("..");
    }

    let mut out = heapless_name::NameBuf::new();
    for &c in in_bytes {
        if c == b';' {
            break;
        }
        let c = if c.is_ascii_uppercase() { c.to_ascii_lowercase() } else { c };
        if !out.push(c) {
            break;
        }
    }
    out.trim_trailing_dot();
    out
}

/// A tiny fixed-capacity ASCII name buffer, avoiding a heap allocation per
/// directory-record comparison during a hot path walk.
mod heapless_name {
    use crate::fs::NAME_MAX;

    pub struct NameBuf {
        buf: [u8; NAME_MAX],
        len: usize,
    }

    impl NameBuf {
        pub fn new() -> Self {
            Self { buf: [0; NAME_MAX], len: 0 }
        }

        pub fn from_str(s: &str) -> Self {
            let mut n = Self::new();
            for &b in s.as_bytes() {
                n.push(b);
            }
            n
        }

        pub fn push(&mut self, b: u8) -> bool {
            if self.len >= NAME_MAX {
                return false;
            }
            self.buf[self.len] = b;
            self.len += 1;
            true
        }

        pub fn trim_trailing_dot(&mut self) {
            if self.len > 0 && self.buf[self.len - 1] == b'.' {
                self.len -= 1;
            }
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
        }
    }
}

struct Fs {
    drive: Arc<dyn BlockDevice>,
    partition_start_lba: u64,
    logical_block_size: u32,
}

/// Per-node back-end data, packed into the 32-byte `internal_data` blob:
/// a pointer to the shared `Fs` plus a heap-boxed copy of this node's own
/// directory record (leaked for the node's lifetime, matching the
/// original's per-node `kmalloc`'d record copy).
struct NodeData {
    fs: &'static Fs,
    record: &'static DirectoryRecord,
}

const _: () = assert!(core::mem::size_of::<NodeData>() <= 32);

fn node_data_of(idx: NodeIndex) -> NodeData {
    let raw = fscache::node_internal_data(idx);
    // SAFETY: written by `set_node_data` below as exactly this type.
    unsafe { core::ptr::read(raw.as_ptr() as *const NodeData) }
}

fn set_node_data(idx: NodeIndex, data: NodeData) {
    let mut raw = [0u8; 32];
    // SAFETY: `NodeData` fits in 32 bytes and is plain data.
    unsafe { core::ptr::write(raw.as_mut_ptr() as *mut NodeData, data) };
    fscache::set_node_internal_data(idx, raw);
}

#[derive(Clone, Copy, Default)]
struct HandleState {
    seek_pos: u64,
    /// Directory-read cursor: offset into the current logical block.
    extent_pos: u64,
    current_extent_block: u64,
}

struct Iso9660FileOps;
struct Iso9660DirOps;

static FILE_OPS: Iso9660FileOps = Iso9660FileOps;
static DIR_OPS: Iso9660DirOps = Iso9660DirOps;

fn read_handle_state(instance: &[u8; 32]) -> HandleState {
    // SAFETY: the handle's instance blob is zero-initialized at open and
    // only ever interpreted as `HandleState` by this back-end.
    unsafe { core::ptr::read(instance.as_ptr() as *const HandleState) }
}

fn write_handle_state(instance: &mut [u8; 32], state: HandleState) {
    // SAFETY: see `read_handle_state`.
    unsafe { core::ptr::write(instance.as_mut_ptr() as *mut HandleState, state) };
}

impl NodeOps for Iso9660FileOps {
    fn read(&self, node: NodeIndex, instance: &mut [u8; 32], buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let data = node_data_of(node);
        let state = read_handle_state(instance);

        let file_size = data.record.data_length as u64;
        if state.seek_pos >= file_size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(file_size - state.seek_pos) as usize;

        let block_size = data.fs.logical_block_size as u64;
        let start_lba = data.fs.partition_start_lba + data.record.extent_lba as u64;
        let mut cur_block = state.seek_pos / block_size;
        let mut block_off = (state.seek_pos % block_size) as usize;

        let mut block_buf = alloc::vec![0u8; block_size as usize];
        let mut copied = 0usize;
        while copied < want {
            let lba = start_lba + cur_block;
            data.fs.drive.read_sectors(lba, 1, &mut block_buf)?;
            let avail = block_size as usize - block_off;
            let to_copy = (want - copied).min(avail);
            buf[copied..copied + to_copy].copy_from_slice(&block_buf[block_off..block_off + to_copy]);
            copied += to_copy;
            block_off = 0;
            cur_block += 1;
        }

        write_handle_state(instance, HandleState { seek_pos: state.seek_pos + copied as u64, ..state });
        Ok(copied)
    }

    fn seek(&self, node: NodeIndex, instance: &mut [u8; 32], offset: i64, whence: SeekWhence) -> KernelResult<i64> {
        let data = node_data_of(node);
        let mut state = read_handle_state(instance);
        let base = match whence {
            SeekWhence::Set => 0i64,
            SeekWhence::Cur => state.seek_pos as i64,
            SeekWhence::End => data.record.data_length as i64,
        };
        let new_pos = base.checked_add(offset).ok_or(Errno::EINVAL)?;
        if new_pos < 0 {
            return Err(Errno::EINVAL);
        }
        state.seek_pos = new_pos as u64;
        write_handle_state(instance, state);
        Ok(new_pos)
    }

    fn load_node(&self, parent: NodeIndex, name: &str, out: NodeIndex) -> KernelResult<()> {
        load_node_impl(parent, name, out)
    }
}

impl NodeOps for Iso9660DirOps {
    fn read(&self, node: NodeIndex, instance: &mut [u8; 32], buf: &mut [u8]) -> KernelResult<usize> {
        directory_read(node, instance, buf)
    }

    fn load_node(&self, parent: NodeIndex, name: &str, out: NodeIndex) -> KernelResult<()> {
        load_node_impl(parent, name, out)
    }
}

fn directory_read(node: NodeIndex, instance: &mut [u8; 32], buf: &mut [u8]) -> KernelResult<usize> {
    use crate::fs::Dirent;
    const REC: usize = core::mem::size_of::<Dirent>();
    if buf.len() < REC {
        return Err(Errno::EINVAL);
    }

    let data = node_data_of(node);
    let mut state = read_handle_state(instance);

    let block_size = data.fs.logical_block_size as u64;
    let mut dir_extent_lba = data.fs.partition_start_lba + data.record.extent_lba as u64 + state.current_extent_block;
    let mut dir_remaining = data.record.data_length as u64 - state.seek_pos;

    let mut block_buf = alloc::vec![0u8; block_size as usize];
    let mut total = 0usize;
    let mut remaining_out = buf.len();

    let mut block_offset = state.extent_pos as usize;

    while dir_remaining > 0 && remaining_out >= REC {
        data.fs.drive.read_sectors(dir_extent_lba, 1, &mut block_buf)?;

        let mut offs = 0usize;
        while offs < block_size as usize && remaining_out >= REC && dir_remaining > 0 {
            let Some(entry) = DirectoryRecord::parse(&block_buf[offs..]) else {
                break;
            };
            if entry.length == 0 {
                break;
            }

            if block_offset >= entry.length as usize {
                block_offset -= entry.length as usize;
                offs += entry.length as usize;
                continue;
            } else if block_offset != 0 {
                return Err(Errno::EIO);
            }

            let name = normalize_name(&entry);
            let name_str = name.as_str();
            if name_str != "." && name_str != ".." {
                let node_type = if entry.is_directory() { NodeType::Directory } else { NodeType::Regular };
                let dirent = Dirent::new(name_str, node_type);
                let dst = &mut buf[total..total + REC];
                // SAFETY: `Dirent` is `repr(C)` plain data and `REC` bytes
                // exactly; `dst` was sized to `REC` above.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        (&dirent as *const Dirent) as *const u8,
                        dst.as_mut_ptr(),
                        REC,
                    )
                };
                total += REC;
                remaining_out -= REC;
            }

            offs += entry.length as usize;
            state.seek_pos += entry.length as u64;
            state.extent_pos += entry.length as u64;
            dir_remaining -= entry.length as u64;
        }

        if offs < block_size as usize {
            break;
        }
        dir_extent_lba += 1;
        state.current_extent_block += 1;
        block_offset = 0;
        state.extent_pos = 0;
    }

    write_handle_state(instance, state);
    Ok(total)
}

fn load_node_impl(parent: NodeIndex, name: &str, out: NodeIndex) -> KernelResult<()> {
    let parent_data = node_data_of(parent);
    if !parent_data.record.is_directory() {
        return Err(Errno::ENOTDIR);
    }

    let block_size = parent_data.fs.logical_block_size as u64;
    let mut dir_lba = parent_data.fs.partition_start_lba + parent_data.record.extent_lba as u64;
    let mut dir_remaining = parent_data.record.data_length as u64;

    let mut block_buf = alloc::vec![0u8; block_size as usize];

    while dir_remaining > 0 {
        parent_data.fs.drive.read_sectors(dir_lba, 1, &mut block_buf)?;

        let mut offs = 0usize;
        while offs < block_size as usize {
            let Some(entry) = DirectoryRecord::parse(&block_buf[offs..]) else {
                break;
            };
            if entry.length == 0 {
                break;
            }

            if normalize_name(&entry).as_str() == name {
                let record: &'static DirectoryRecord = Box::leak(Box::new(entry));
                let node_type = if entry.is_directory() { NodeType::Directory } else { NodeType::Regular };
                set_node_data(out, NodeData { fs: parent_data.fs, record });
                fscache::init_node_metadata(out, name, 0o755, 0, 0);
                fscache::set_node_vtable(
                    out,
                    if entry.is_directory() { &DIR_OPS as &dyn NodeOps } else { &FILE_OPS as &dyn NodeOps },
                );
                fscache::publish_node(out, node_type);
                return Ok(());
            }
            offs += entry.length as usize;
        }
        dir_lba += 1;
        dir_remaining = dir_remaining.saturating_sub(block_size);
    }

    Err(Errno::ENOENT)
}

/// Parse the primary volume descriptor's root directory record and link a
/// fresh node carrying it as a child of `mount_point` (spec §4.10 / §6).
pub fn mount(drive: Arc<dyn BlockDevice>, partition_start_lba: u64, mount_point: NodeIndex) -> KernelResult<NodeIndex> {
    let sector_size = drive.logical_sector_size() as usize;
    let mut pvd_buf = alloc::vec![0u8; sector_size.max(2048)];
    drive.read_sectors(partition_start_lba + PVD_LBA, 1, &mut pvd_buf)?;

    if pvd_buf[0] != 1 || &pvd_buf[1..6] != b"CD001" {
        return Err(Errno::EIO);
    }
    let logical_block_size = u16::from_le_bytes(pvd_buf[128..130].try_into().unwrap()) as u32;
    let root_record_bytes = &pvd_buf[156..156 + 34];
    let root_record = DirectoryRecord::parse(root_record_bytes).ok_or(Errno::EIO)?;

    let fs: &'static Fs = Box::leak(Box::new(Fs {
        drive,
        partition_start_lba,
        logical_block_size,
    }));
    let root_record: &'static DirectoryRecord = Box::leak(Box::new(root_record));

    let idx = fscache::allocate_node();
    set_node_data(idx, NodeData { fs, record: root_record });
    fscache::init_node_metadata(idx, "iso9660", 0o755, 0, 0);
    fscache::set_node_vtable(idx, &DIR_OPS);
    fscache::publish_node(idx, NodeType::Directory);

    fscache::attach_child(mount_point, idx);
    fscache::set_mount_point(mount_point, idx);
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_version_suffix_and_case() {
        let mut record = DirectoryRecord {
            length: 40,
            extent_lba: 0,
            data_length: 0,
            file_flags: 0,
            file_name_length: 11,
            file_identifier: [0; 222],
        };
        record.file_identifier[..11].copy_from_slice(b"FOO.SO;1\0\0\0");
        record.file_name_length = 8;
        assert_eq!(normalize_name(&record).as_str(), "foo.so");
    }

    #[test]
    fn special_entries_become_dot_and_dotdot() {
        let mut record = DirectoryRecord {
            length: 34,
            extent_lba: 0,
            data_length: 0,
            file_flags: DIR_RECORD_FLAG_DIRECTORY,
            file_name_length: 1,
            file_identifier: [0; 222],
        };
        assert_eq!(normalize_name(&record).as_str(), ".");
        record.file_identifier[0] = 1;
        assert_eq!(normalize_name(&record).as_str(), "..");
    }

    #[test]
    fn trailing_dot_is_dropped_for_extensionless_names() {
        let mut record = DirectoryRecord {
            length: 40,
            extent_lba: 0,
            data_length: 0,
            file_flags: 0,
            file_name_length: 8,
            file_identifier: [0; 222],
        };
        record.file_identifier[..8].copy_from_slice(b"README.\0");
        record.file_name_length = 7;
        assert_eq!(normalize_name(&record).as_str(), "readme");
    }
}

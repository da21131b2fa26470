//! FAT12/16/32, read-focused (spec §4.10). Grounded in
//! `original_source/src/vfs/fat/{fat.c,fat12.c,fat12.h}`: the on-disk
//! layout and boot-sector fields are shared across all three widths;
//! FAT12 and FAT16 differ only in FAT entry width and EOC marker, and
//! both keep a fixed-size root directory region, while FAT32 has no
//! fixed root -- it is just another cluster chain.
//!
//! Long-file-name entries (`attr == 0x0F`) are recognized and skipped,
//! never parsed into a long name (spec §4.10 / §9 open question: "the
//! spec permits skipping LFN records").

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::errno::{Errno, KernelResult};
use crate::fs::blockdev::BlockDevice;
use crate::fs::fscache::{self, NodeIndex, NodeOps};
use crate::fs::{Dirent, NodeType, SeekWhence};

const ATTR_LONG_NAME: u8 = 0x0F;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_VOLUME_ID: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// Fields shared by every FAT width's boot sector (BPB), read straight out
/// of sector 0 (spec §6: "FAT: standard boot sector layout").
struct BootSector {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sector_count: u16,
    num_fats: u8,
    root_entry_count: u16,
    total_sectors_16: u16,
    fat_size_16: u16,
    total_sectors_32: u32,
    fat_size_32: u32,
    root_cluster: u32,
}

impl BootSector {
    fn parse(sector: &[u8]) -> KernelResult<Self> {
        if sector.len() < 512 || sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(Errno::EIO);
        }
        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        let sectors_per_cluster = sector[13];
        let reserved_sector_count = u16::from_le_bytes([sector[14], sector[15]]);
        let num_fats = sector[16];
        let root_entry_count = u16::from_le_bytes([sector[17], sector[18]]);
        let total_sectors_16 = u16::from_le_bytes([sector[19], sector[20]]);
        let fat_size_16 = u16::from_le_bytes([sector[22], sector[23]]);
        let total_sectors_32 = u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]);
        let fat_size_32 = u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]);
        let root_cluster = u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]);
        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            num_fats,
            root_entry_count,
            total_sectors_16,
            fat_size_16,
            total_sectors_32,
            fat_size_32,
            root_cluster,
        })
    }

    fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    fn fat_size(&self) -> u32 {
        if self.fat_size_16 != 0 {
            self.fat_size_16 as u32
        } else {
            self.fat_size_32
        }
    }

    fn root_dir_sectors(&self) -> u32 {
        ((self.root_entry_count as u32 * 32) + (self.bytes_per_sector as u32 - 1)) / self.bytes_per_sector as u32
    }
}

/// `fat_detect_type` (spec §4.10 / `fat.c`): FAT12 vs FAT16 is decided by
/// counting data clusters, not by any on-disk tag; FAT32 is recognized by
/// `fat_size_16 == 0`.
fn detect_type(bs: &BootSector) -> FatType {
    if bs.fat_size_16 == 0 {
        return FatType::Fat32;
    }
    let data_sectors = bs.total_sectors()
        - (bs.reserved_sector_count as u32 + bs.num_fats as u32 * bs.fat_size() + bs.root_dir_sectors());
    let total_clusters = data_sectors / bs.sectors_per_cluster as u32;
    if total_clusters < 4085 {
        FatType::Fat12
    } else {
        FatType::Fat16
    }
}

struct Fs {
    drive: Arc<dyn BlockDevice>,
    partition_start_lba: u64,
    fat_type: FatType,
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    /// (drive logical sector size) / (FAT's own 512-byte-assumption
    /// sector), used by `fat_drive_read` to translate FAT-relative LBAs.
    factor: u32,
    fat_start_lba: u32,
    root_dir_start_lba: u32,
    root_dir_sectors: u32,
    cluster_heap_start_lba: u32,
    root_cluster: u32,
}

impl Fs {
    fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Translate a FAT-relative (512-byte-unit) LBA run into drive-native
    /// sector reads (spec §4.10 "sector-translation helper"), grounded in
    /// `fat12_drive_read`.
    fn fat_drive_read(&self, fat_lba: u32, fat_sectors: u32, buf: &mut [u8]) -> KernelResult<()> {
        if self.factor == 1 {
            self.drive
                .read_sectors(self.partition_start_lba + fat_lba as u64, fat_sectors, buf)?;
            return Ok(());
        }

        let fat_bytes_per_sector = self.bytes_per_sector;
        let mut tmp = alloc::vec![0u8; self.drive.logical_sector_size() as usize];
        let mut remaining = fat_sectors;
        let mut current_fat_lba = fat_lba;
        let mut out_off = 0usize;

        while remaining > 0 {
            let drive_lba = self.partition_start_lba + (current_fat_lba / self.factor) as u64;
            let offset = current_fat_lba % self.factor;
            let sectors_this_iter = (self.factor - offset).min(remaining);

            self.drive.read_sectors(drive_lba, 1, &mut tmp)?;

            let src_off = (offset * fat_bytes_per_sector) as usize;
            let len = (sectors_this_iter * fat_bytes_per_sector) as usize;
            buf[out_off..out_off + len].copy_from_slice(&tmp[src_off..src_off + len]);

            out_off += len;
            remaining -= sectors_this_iter;
            current_fat_lba += sectors_this_iter;
        }
        Ok(())
    }

    fn read_cluster(&self, cluster: u32, buf: &mut [u8]) -> KernelResult<()> {
        if cluster < 2 {
            return Err(Errno::EIO);
        }
        let sector = self.cluster_heap_start_lba + (cluster - 2) * self.sectors_per_cluster;
        self.fat_drive_read(sector, self.sectors_per_cluster, buf)
    }

    fn is_eoc(&self, cluster: u32) -> bool {
        match self.fat_type {
            FatType::Fat12 => cluster >= 0xFF8,
            FatType::Fat16 => cluster >= 0xFFF8,
            FatType::Fat32 => (cluster & 0x0FFF_FFFF) >= 0x0FFF_FFF8,
        }
    }

    /// `fat12_next_cluster` generalized to all three widths.
    fn next_cluster(&self, cluster: u32) -> KernelResult<u32> {
        if cluster < 2 {
            return Err(Errno::EIO);
        }
        match self.fat_type {
            FatType::Fat12 => {
                let fat_offset = (cluster * 3) / 2;
                let fat_sector = self.fat_start_lba + fat_offset / self.bytes_per_sector;
                let offset_in_sector = (fat_offset % self.bytes_per_sector) as usize;
                let mut sector_buf = alloc::vec![0u8; self.bytes_per_sector as usize];
                self.fat_drive_read(fat_sector, 1, &mut sector_buf)?;

                let entry = if offset_in_sector == self.bytes_per_sector as usize - 1 {
                    let lo = sector_buf[offset_in_sector];
                    let mut next_sector = alloc::vec![0u8; self.bytes_per_sector as usize];
                    self.fat_drive_read(fat_sector + 1, 1, &mut next_sector)?;
                    (lo as u16) | ((next_sector[0] as u16) << 8)
                } else {
                    u16::from_le_bytes([sector_buf[offset_in_sector], sector_buf[offset_in_sector + 1]])
                };
                let entry = if cluster & 1 != 0 { entry >> 4 } else { entry & 0x0FFF };
                Ok(entry as u32)
            }
            FatType::Fat16 => {
                let fat_offset = cluster * 2;
                let fat_sector = self.fat_start_lba + fat_offset / self.bytes_per_sector;
                let offset_in_sector = (fat_offset % self.bytes_per_sector) as usize;
                let mut sector_buf = alloc::vec![0u8; self.bytes_per_sector as usize];
                self.fat_drive_read(fat_sector, 1, &mut sector_buf)?;
                Ok(u16::from_le_bytes([sector_buf[offset_in_sector], sector_buf[offset_in_sector + 1]]) as u32)
            }
            FatType::Fat32 => {
                let fat_offset = cluster * 4;
                let fat_sector = self.fat_start_lba + fat_offset / self.bytes_per_sector;
                let offset_in_sector = (fat_offset % self.bytes_per_sector) as usize;
                let mut sector_buf = alloc::vec![0u8; self.bytes_per_sector as usize];
                self.fat_drive_read(fat_sector, 1, &mut sector_buf)?;
                let raw = u32::from_le_bytes(sector_buf[offset_in_sector..offset_in_sector + 4].try_into().unwrap());
                Ok(raw & 0x0FFF_FFFF)
            }
        }
    }
}

/// Raw 32-byte 8.3 directory entry.
#[derive(Clone, Copy)]
struct RawDirEntry {
    name: [u8; 11],
    attr: u8,
    cluster_hi: u16,
    cluster_lo: u16,
    file_size: u32,
}

impl RawDirEntry {
    fn parse(bytes: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&bytes[0..11]);
        Self {
            name,
            attr: bytes[11],
            cluster_hi: u16::from_le_bytes([bytes[20], bytes[21]]),
            cluster_lo: u16::from_le_bytes([bytes[26], bytes[27]]),
            file_size: u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]),
        }
    }

    fn is_free(&self) -> bool {
        self.name[0] == 0x00
    }

    fn is_deleted(&self) -> bool {
        self.name[0] == 0xE5
    }

    fn is_long_name(&self) -> bool {
        self.attr == ATTR_LONG_NAME
    }

    fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    fn start_cluster(&self) -> u32 {
        ((self.cluster_hi as u32) << 16) | self.cluster_lo as u32
    }

    /// 8.3 name, `.`-joined, lowercased, trimmed. Minimal shadow name only
    /// -- long-name entries are skipped, not parsed (spec §9).
    fn short_name(&self) -> alloc::string::String {
        let base = core::str::from_utf8(&self.name[0..8]).unwrap_or("").trim_end();
        let ext = core::str::from_utf8(&self.name[8..11]).unwrap_or("").trim_end();
        let mut s = alloc::string::String::new();
        for c in base.chars() {
            s.push(c.to_ascii_lowercase());
        }
        if !ext.is_empty() {
            s.push('.');
            for c in ext.chars() {
                s.push(c.to_ascii_lowercase());
            }
        }
        s
    }
}

struct NodeData {
    fs: &'static Fs,
    start_cluster: u32,
    /// `true` only for the FAT12/16 fixed-region root directory, which has
    /// no start cluster at all.
    fixed_root: bool,
}

const _: () = assert!(core::mem::size_of::<NodeData>() <= 32);

fn node_data_of(idx: NodeIndex) -> NodeData {
    let raw = fscache::node_internal_data(idx);
    // SAFETY: written by `set_node_data` as exactly this type.
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
    current_cluster: u32,
    cluster_pos: u32,
    seek_pos: u64,
    /// Root-directory (fixed region) or cluster-chain directory read index.
    entry_index: u32,
}

fn read_handle_state(instance: &[u8; 32]) -> HandleState {
    // SAFETY: the handle's instance blob is zero-initialized at open and
    // only ever interpreted as `HandleState` by this back-end.
    unsafe { core::ptr::read(instance.as_ptr() as *const HandleState) }
}

fn write_handle_state(instance: &mut [u8; 32], state: HandleState) {
    // SAFETY: see `read_handle_state`.
    unsafe { core::ptr::write(instance.as_mut_ptr() as *mut HandleState, state) };
}

struct FatFileOps;
struct FatDirOps;

static FILE_OPS: FatFileOps = FatFileOps;
static DIR_OPS: FatDirOps = FatDirOps;

impl NodeOps for FatFileOps {
    fn read(&self, node: NodeIndex, instance: &mut [u8; 32], buf: &mut [u8]) -> KernelResult<usize> {
        let data = node_data_of(node);
        if data.start_cluster < 2 || buf.is_empty() {
            return Ok(0);
        }
        let mut state = read_handle_state(instance);
        if state.current_cluster == 0 {
            state.current_cluster = data.start_cluster;
        }

        let bytes_per_cluster = data.fs.bytes_per_cluster();
        let mut cluster_buf = alloc::vec![0u8; bytes_per_cluster as usize];
        let mut out_off = 0usize;
        let mut remaining = buf.len();
        let mut cluster = state.current_cluster;
        let mut offset_in_cluster = state.cluster_pos as usize;

        while remaining > 0 && !data.fs.is_eoc(cluster) {
            data.fs.read_cluster(cluster, &mut cluster_buf)?;

            let avail = bytes_per_cluster as usize - offset_in_cluster;
            let to_copy = remaining.min(avail);
            buf[out_off..out_off + to_copy].copy_from_slice(&cluster_buf[offset_in_cluster..offset_in_cluster + to_copy]);
            out_off += to_copy;
            remaining -= to_copy;

            if to_copy < avail {
                offset_in_cluster += to_copy;
                break;
            }
            offset_in_cluster = 0;

            if remaining > 0 {
                match data.fs.next_cluster(cluster) {
                    Ok(next) if !data.fs.is_eoc(next) => cluster = next,
                    _ => {
                        cluster = u32::MAX;
                        break;
                    }
                }
            }
        }

        write_handle_state(
            instance,
            HandleState {
                current_cluster: cluster,
                cluster_pos: offset_in_cluster as u32,
                seek_pos: state.seek_pos + out_off as u64,
                entry_index: state.entry_index,
            },
        );
        Ok(out_off)
    }

    fn seek(&self, _node: NodeIndex, instance: &mut [u8; 32], offset: i64, whence: SeekWhence) -> KernelResult<i64> {
        // Random-access seeking within a cluster chain needs a chain walk
        // from the start cluster; only SET-to-zero and CUR(0) (tell) are
        // supported without one.
        let state = read_handle_state(instance);
        match (whence, offset) {
            (SeekWhence::Cur, 0) => Ok(state.seek_pos as i64),
            (SeekWhence::Set, 0) => {
                write_handle_state(instance, HandleState::default());
                Ok(0)
            }
            _ => Err(Errno::EINVAL),
        }
    }

    fn load_node(&self, parent: NodeIndex, name: &str, out: NodeIndex) -> KernelResult<()> {
        load_node_impl(parent, name, out)
    }
}

impl NodeOps for FatDirOps {
    fn read(&self, node: NodeIndex, instance: &mut [u8; 32], buf: &mut [u8]) -> KernelResult<usize> {
        const REC: usize = core::mem::size_of::<Dirent>();
        if buf.len() < REC {
            return Err(Errno::EINVAL);
        }
        let data = node_data_of(node);
        let mut state = read_handle_state(instance);
        let mut written = 0usize;

        if data.fixed_root {
            while (buf.len() - written) >= REC && (state.entry_index as u16) < root_entry_count(data.fs) {
                let entry = read_root_entry(data.fs, state.entry_index)?;
                state.entry_index += 1;
                if entry.is_free() {
                    break;
                }
                if entry.is_deleted() || entry.is_long_name() || entry.attr & ATTR_VOLUME_ID != 0 {
                    continue;
                }
                emit_dirent(&entry, buf, &mut written);
            }
        } else {
            let bytes_per_cluster = data.fs.bytes_per_cluster();
            let entries_per_cluster = bytes_per_cluster / 32;
            let mut cluster = if state.current_cluster == 0 { data.start_cluster } else { state.current_cluster };
            let mut cluster_buf = alloc::vec![0u8; bytes_per_cluster as usize];

            'outer: while !data.fs.is_eoc(cluster) {
                data.fs.read_cluster(cluster, &mut cluster_buf)?;
                while state.entry_index < entries_per_cluster {
                    if (buf.len() - written) < REC {
                        break 'outer;
                    }
                    let off = (state.entry_index * 32) as usize;
                    let entry = RawDirEntry::parse(&cluster_buf[off..off + 32]);
                    state.entry_index += 1;
                    if entry.is_free() {
                        break 'outer;
                    }
                    if entry.is_deleted() || entry.is_long_name() || entry.attr & ATTR_VOLUME_ID != 0 {
                        continue;
                    }
                    emit_dirent(&entry, buf, &mut written);
                }
                state.entry_index = 0;
                match data.fs.next_cluster(cluster) {
                    Ok(next) if !data.fs.is_eoc(next) => cluster = next,
                    _ => break,
                }
            }
            state.current_cluster = cluster;
        }

        write_handle_state(instance, state);
        Ok(written)
    }

    fn load_node(&self, parent: NodeIndex, name: &str, out: NodeIndex) -> KernelResult<()> {
        load_node_impl(parent, name, out)
    }
}

fn emit_dirent(entry: &RawDirEntry, buf: &mut [u8], written: &mut usize) {
    const REC: usize = core::mem::size_of::<Dirent>();
    let name = entry.short_name();
    let node_type = if entry.is_directory() { NodeType::Directory } else { NodeType::Regular };
    let dirent = Dirent::new(&name, node_type);
    let dst = &mut buf[*written..*written + REC];
    // SAFETY: `Dirent` is `repr(C)` plain data and exactly `REC` bytes;
    // `dst` was sized to `REC` above.
    unsafe { core::ptr::copy_nonoverlapping((&dirent as *const Dirent) as *const u8, dst.as_mut_ptr(), REC) };
    *written += REC;
}

fn root_entry_count(fs: &Fs) -> u16 {
    ((fs.root_dir_sectors * fs.bytes_per_sector) / 32) as u16
}

fn read_root_entry(fs: &Fs, entry_index: u32) -> KernelResult<RawDirEntry> {
    let sector = fs.root_dir_start_lba + (entry_index * 32) / fs.bytes_per_sector;
    let mut buf = alloc::vec![0u8; fs.bytes_per_sector as usize];
    fs.fat_drive_read(sector, 1, &mut buf)?;
    let off = ((entry_index * 32) % fs.bytes_per_sector) as usize;
    Ok(RawDirEntry::parse(&buf[off..off + 32]))
}

fn load_node_impl(parent: NodeIndex, name: &str, out: NodeIndex) -> KernelResult<()> {
    let parent_data = node_data_of(parent);
    let fs = parent_data.fs;

    let found = if parent_data.fixed_root {
        let mut result = None;
        for i in 0..root_entry_count(fs) as u32 {
            let entry = read_root_entry(fs, i)?;
            if entry.is_free() {
                break;
            }
            if entry.is_deleted() || entry.is_long_name() || entry.attr & ATTR_VOLUME_ID != 0 {
                continue;
            }
            if entry.short_name() == name {
                result = Some(entry);
                break;
            }
        }
        result
    } else {
        let bytes_per_cluster = fs.bytes_per_cluster();
        let entries_per_cluster = bytes_per_cluster / 32;
        let mut cluster = parent_data.start_cluster;
        let mut cluster_buf = alloc::vec![0u8; bytes_per_cluster as usize];
        let mut found = None;
        'outer: while !fs.is_eoc(cluster) {
            fs.read_cluster(cluster, &mut cluster_buf)?;
            for i in 0..entries_per_cluster {
                let off = (i * 32) as usize;
                let entry = RawDirEntry::parse(&cluster_buf[off..off + 32]);
                if entry.is_free() {
                    break 'outer;
                }
                if entry.is_deleted() || entry.is_long_name() || entry.attr & ATTR_VOLUME_ID != 0 {
                    continue;
                }
                if entry.short_name() == name {
                    found = Some(entry);
                    break 'outer;
                }
            }
            match fs.next_cluster(cluster) {
                Ok(next) if !fs.is_eoc(next) => cluster = next,
                _ => break,
            }
        }
        found
    };

    let entry = found.ok_or(Errno::ENOENT)?;
    set_node_data(
        out,
        NodeData {
            fs,
            start_cluster: entry.start_cluster(),
            fixed_root: false,
        },
    );
    fscache::init_node_metadata(out, name, 0o755, 0, 0);
    let node_type = if entry.is_directory() { NodeType::Directory } else { NodeType::Regular };
    fscache::set_node_vtable(out, if entry.is_directory() { &DIR_OPS as &dyn NodeOps } else { &FILE_OPS as &dyn NodeOps });
    fscache::publish_node(out, node_type);
    Ok(())
}

/// Read the boot sector, detect the FAT width, and link a fresh root node
/// (the fixed region for FAT12/16, the `root_cluster` chain for FAT32)
/// under `mount_point`.
pub fn mount(drive: Arc<dyn BlockDevice>, partition_start_lba: u64, mount_point: NodeIndex) -> KernelResult<NodeIndex> {
    let mut sector = alloc::vec![0u8; drive.logical_sector_size().max(512) as usize];
    drive.read_sectors(partition_start_lba, 1, &mut sector)?;
    let bs = BootSector::parse(&sector)?;
    let fat_type = detect_type(&bs);

    if fat_type == FatType::Fat12 {
        let data_sectors = bs.total_sectors()
            - (bs.reserved_sector_count as u32 + bs.num_fats as u32 * bs.fat_size() + bs.root_dir_sectors());
        if data_sectors / bs.sectors_per_cluster as u32 >= 4085 {
            return Err(Errno::EIO);
        }
    }

    let factor = if bs.bytes_per_sector as u32 != drive.logical_sector_size() {
        drive.logical_sector_size() / bs.bytes_per_sector as u32
    } else {
        1
    };

    let fat_start_lba = bs.reserved_sector_count as u32;
    let root_dir_sectors = bs.root_dir_sectors();
    let root_dir_start_lba = fat_start_lba + bs.num_fats as u32 * bs.fat_size();
    let cluster_heap_start_lba = root_dir_start_lba + root_dir_sectors;

    let fs: &'static Fs = Box::leak(Box::new(Fs {
        drive,
        partition_start_lba,
        fat_type,
        bytes_per_sector: bs.bytes_per_sector as u32,
        sectors_per_cluster: bs.sectors_per_cluster as u32,
        factor,
        fat_start_lba,
        root_dir_start_lba,
        root_dir_sectors,
        cluster_heap_start_lba,
        root_cluster: bs.root_cluster,
    }));

    let idx = fscache::allocate_node();
    let fixed_root = fat_type != FatType::Fat32;
    set_node_data(
        idx,
        NodeData {
            fs,
            start_cluster: if fixed_root { 0 } else { fs.root_cluster },
            fixed_root,
        },
    );
    let dir_name = match fat_type {
        FatType::Fat12 => "fat12",
        FatType::Fat16 => "fat16",
        FatType::Fat32 => "fat32",
    };
    fscache::init_node_metadata(idx, dir_name, 0o755, 0, 0);
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
    fn short_name_joins_base_and_extension() {
        let mut raw = [0u8; 32];
        raw[0..11].copy_from_slice(b"FOO     BAR");
        let entry = RawDirEntry::parse(&raw);
        assert_eq!(entry.short_name(), "foo.bar");
    }

    #[test]
    fn short_name_omits_dot_when_extension_empty() {
        let mut raw = [0u8; 32];
        raw[0..11].copy_from_slice(b"README     ");
        let entry = RawDirEntry::parse(&raw);
        assert_eq!(entry.short_name(), "readme");
    }

    #[test]
    fn fat12_cluster_count_below_threshold_selects_fat12() {
        let bs = BootSector {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sector_count: 1,
            num_fats: 2,
            root_entry_count: 224,
            total_sectors_16: 2880,
            fat_size_16: 9,
            total_sectors_32: 0,
            fat_size_32: 0,
            root_cluster: 0,
        };
        assert_eq!(detect_type(&bs), FatType::Fat12);
    }

    #[test]
    fn fat_size_16_zero_selects_fat32() {
        let bs = BootSector {
            bytes_per_sector: 512,
            sectors_per_cluster: 8,
            reserved_sector_count: 32,
            num_fats: 2,
            root_entry_count: 0,
            total_sectors_16: 0,
            fat_size_16: 0,
            total_sectors_32: 2_000_000,
            fat_size_32: 4000,
            root_cluster: 2,
        };
        assert_eq!(detect_type(&bs), FatType::Fat32);
    }
}

//! MBR partition table (spec §6 / §4.10): sector 0, four 16-byte primary
//! partition entries, `0xAA55` signature. Used to locate the partition a
//! back-end should mount; CHS fields are parsed but never consulted (LBA
//! only, per spec's "CHS ignored" note).

use alloc::sync::Arc;

use crate::errno::{Errno, KernelResult};
use crate::fs::blockdev::BlockDevice;
use crate::fs::fscache::NodeIndex;
#[cfg(feature = "fat")]
use crate::fs::fat;
#[cfg(feature = "iso9660")]
use crate::fs::iso9660;

const PARTITION_TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const NUM_ENTRIES: usize = 4;

const PARTITION_TYPE_EMPTY: u8 = 0x00;
const PARTITION_TYPE_FAT12: u8 = 0x01;
const PARTITION_TYPE_FAT16_SMALL: u8 = 0x04;
const PARTITION_TYPE_FAT16: u8 = 0x06;
const PARTITION_TYPE_FAT32_CHS: u8 = 0x0B;
const PARTITION_TYPE_FAT32_LBA: u8 = 0x0C;
const PARTITION_TYPE_FAT16_LBA: u8 = 0x0E;
const PARTITION_TYPE_ISO9660: u8 = 0x96;

#[derive(Debug, Clone, Copy)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            bootable: bytes[0] == 0x80,
            partition_type: bytes[4],
            start_lba: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            sector_count: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    fn is_present(&self) -> bool {
        self.partition_type != PARTITION_TYPE_EMPTY
    }

    fn is_fat(&self) -> bool {
        matches!(
            self.partition_type,
            PARTITION_TYPE_FAT12
                | PARTITION_TYPE_FAT16_SMALL
                | PARTITION_TYPE_FAT16
                | PARTITION_TYPE_FAT32_CHS
                | PARTITION_TYPE_FAT32_LBA
                | PARTITION_TYPE_FAT16_LBA
        )
    }

    fn is_iso9660(&self) -> bool {
        self.partition_type == PARTITION_TYPE_ISO9660
    }
}

/// Read sector 0 and return its (up to four) primary partition entries,
/// skipping empty slots.
pub fn read_partition_table(drive: &dyn BlockDevice) -> KernelResult<alloc::vec::Vec<PartitionEntry>> {
    let sector_size = drive.logical_sector_size().max(512) as usize;
    let mut sector = alloc::vec![0u8; sector_size];
    drive.read_sectors(0, 1, &mut sector)?;

    if sector[510] != 0x55 || sector[511] != 0xAA {
        return Err(Errno::EIO);
    }

    let mut entries = alloc::vec::Vec::with_capacity(NUM_ENTRIES);
    for i in 0..NUM_ENTRIES {
        let off = PARTITION_TABLE_OFFSET + i * ENTRY_SIZE;
        let entry = PartitionEntry::parse(&sector[off..off + ENTRY_SIZE]);
        if entry.is_present() {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Parse the MBR, pick the first present partition, and mount it under
/// `mount_point` using the back-end implied by its type byte.
///
/// Non-goal: extended/logical partitions (spec §4.10 covers primary
/// partitions only).
pub fn mount_first_partition(drive: Arc<dyn BlockDevice>, mount_point: NodeIndex) -> KernelResult<NodeIndex> {
    let entries = read_partition_table(drive.as_ref())?;
    let entry = entries.first().ok_or(Errno::ENOENT)?;
    mount_partition(drive, entry, mount_point)
}

/// Mount a specific already-parsed partition entry, dispatching on its
/// type byte.
pub fn mount_partition(drive: Arc<dyn BlockDevice>, entry: &PartitionEntry, mount_point: NodeIndex) -> KernelResult<NodeIndex> {
    #[cfg(feature = "fat")]
    if entry.is_fat() {
        return fat::mount(drive, entry.start_lba as u64, mount_point);
    }
    #[cfg(feature = "iso9660")]
    if entry.is_iso9660() {
        return iso9660::mount(drive, entry.start_lba as u64, mount_point);
    }
    let _ = (drive, mount_point);
    Err(Errno::ENOSYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_mbr_sector(entries: &[(u8, u8, u32, u32)]) -> alloc::vec::Vec<u8> {
        let mut sector = alloc::vec![0u8; 512];
        for (i, (bootable_flag, ptype, start_lba, count)) in entries.iter().enumerate() {
            let off = PARTITION_TABLE_OFFSET + i * ENTRY_SIZE;
            sector[off] = *bootable_flag;
            sector[off + 4] = *ptype;
            sector[off + 8..off + 12].copy_from_slice(&start_lba.to_le_bytes());
            sector[off + 12..off + 16].copy_from_slice(&count.to_le_bytes());
        }
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    struct FakeDrive {
        sector: alloc::vec::Vec<u8>,
    }

    impl BlockDevice for FakeDrive {
        fn logical_sector_size(&self) -> u32 {
            512
        }
        fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> KernelResult<usize> {
            if lba == 0 {
                buf[..512].copy_from_slice(&self.sector);
                Ok(512 * count as usize)
            } else {
                Ok(0)
            }
        }
        fn write_sectors(&self, _lba: u64, _count: u32, _buf: &[u8]) -> KernelResult<usize> {
            Err(Errno::ENOSYS)
        }
    }

    #[test]
    fn parses_single_fat32_partition() {
        let sector = make_mbr_sector(&[(0x80, PARTITION_TYPE_FAT32_LBA, 2048, 204800)]);
        let drive = FakeDrive { sector };
        let entries = read_partition_table(&drive).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].bootable);
        assert_eq!(entries[0].start_lba, 2048);
        assert!(entries[0].is_fat());
    }

    #[test]
    fn skips_empty_entries() {
        let sector = make_mbr_sector(&[(0, PARTITION_TYPE_EMPTY, 0, 0), (0, PARTITION_TYPE_ISO9660, 0, 4096)]);
        let drive = FakeDrive { sector };
        let entries = read_partition_table(&drive).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_iso9660());
    }

    #[test]
    fn missing_signature_is_rejected() {
        let mut sector = alloc::vec![0u8; 512];
        sector[510] = 0;
        sector[511] = 0;
        let drive = FakeDrive { sector };
        assert_eq!(read_partition_table(&drive), Err(Errno::EIO));
    }
}

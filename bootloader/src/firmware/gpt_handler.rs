//! GUID Partition Table (GPT) Handler
//!
//! Reads and validates the primary GPT header and its partition array.
//! Empty slots are removed from the array in place so the boot path only
//! ever walks real partitions.

use alloc::vec::Vec;
use core::fmt;

use super::crc32::{crc32, crc32_with_zeroed};
use super::disk_reader::{DiskReader, SectorDevice, SECTOR_SIZE};
use crate::error::{BootError, Result};

/// GPT signature ("EFI PART")
pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";

/// Smallest header UEFI allows
pub const GPT_HEADER_MIN_SIZE: usize = 92;

/// Smallest partition entry UEFI allows
pub const GPT_ENTRY_MIN_SIZE: u32 = 128;

/// LBA of the primary header
pub const GPT_HEADER_LBA: u64 = 1;

/// 128-bit GUID in its on-disk byte order
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const ZERO: Guid = Guid([0; 16]);

    /// BIOS boot partition, `21686148-6449-6E6F-744E-656564454649`
    pub const BIOS_BOOT: Guid = Guid::from_fields(
        0x2168_6148,
        0x6449,
        0x6E6F,
        [0x74, 0x4E, 0x65, 0x65, 0x64, 0x45, 0x46, 0x49],
    );

    /// EFI system partition, `C12A7328-F81F-11D2-BA4B-00A0C93EC93B`
    pub const EFI_SYSTEM: Guid = Guid::from_fields(
        0xC12A_7328,
        0xF81F,
        0x11D2,
        [0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B],
    );

    /// Build from the textual fields; the first three are stored little-endian
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        let a = data1.to_le_bytes();
        let b = data2.to_le_bytes();
        let c = data3.to_le_bytes();
        Guid([
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], data4[0], data4[1], data4[2],
            data4[3], data4[4], data4[5], data4[6], data4[7],
        ])
    }

    /// Parse `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`
    pub fn parse_str(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() != 36 || [8, 13, 18, 23].iter().any(|&i| bytes[i] != b'-') {
            return None;
        }
        let mut digits = [0u8; 32];
        let mut count = 0;
        for &ch in bytes.iter().filter(|&&ch| ch != b'-') {
            if count == digits.len() {
                return None;
            }
            digits[count] = match ch {
                b'0'..=b'9' => ch - b'0',
                b'a'..=b'f' => ch - b'a' + 10,
                b'A'..=b'F' => ch - b'A' + 10,
                _ => return None,
            };
            count += 1;
        }
        if count != digits.len() {
            return None;
        }
        let mut raw = [0u8; 16];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = (digits[2 * i] << 4) | digits[2 * i + 1];
        }
        let data1 = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let data2 = u16::from_be_bytes([raw[4], raw[5]]);
        let data3 = u16::from_be_bytes([raw[6], raw[7]]);
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(&raw[8..]);
        Some(Self::from_fields(data1, data2, data3, data4))
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes[..16]);
        Guid(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            u32::from_le_bytes([g[0], g[1], g[2], g[3]]),
            u16::from_le_bytes([g[4], g[5]]),
            u16::from_le_bytes([g[6], g[7]]),
            g[8],
            g[9],
            g[10],
            g[11],
            g[12],
            g[13],
            g[14],
            g[15]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// GPT header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptHeader {
    pub revision: u32,
    pub header_size: u32,
    pub checksum: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Guid,
    pub partition_array_lba: u64,
    pub entries_count: u32,
    pub entry_size: u32,
    pub partition_array_checksum: u32,
}

impl GptHeader {
    /// Decode and validate a header sector
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < GPT_HEADER_MIN_SIZE {
            return Err(BootError::InvalidGptHeader("GPT header truncated"));
        }
        if sector[..8] != GPT_SIGNATURE {
            return Err(BootError::InvalidGptSignature);
        }

        let header_size = le_u32(sector, 12);
        if (header_size as usize) < GPT_HEADER_MIN_SIZE || header_size as usize > sector.len() {
            return Err(BootError::InvalidGptHeader("Invalid GPT header size"));
        }

        let checksum = le_u32(sector, 16);
        if crc32_with_zeroed(&sector[..header_size as usize], 16, 4) != checksum {
            return Err(BootError::GptHeaderChecksum);
        }

        let header = Self {
            revision: le_u32(sector, 8),
            header_size,
            checksum,
            current_lba: le_u64(sector, 24),
            backup_lba: le_u64(sector, 32),
            first_usable_lba: le_u64(sector, 40),
            last_usable_lba: le_u64(sector, 48),
            disk_guid: Guid::from_slice(&sector[56..72]),
            partition_array_lba: le_u64(sector, 72),
            entries_count: le_u32(sector, 80),
            entry_size: le_u32(sector, 84),
            partition_array_checksum: le_u32(sector, 88),
        };

        if header.entry_size < GPT_ENTRY_MIN_SIZE || header.entry_size % 8 != 0 {
            return Err(BootError::InvalidGptHeader("Invalid partition entry size"));
        }
        if header.entries_count == 0 {
            return Err(BootError::InvalidGptHeader("Empty partition array"));
        }
        Ok(header)
    }

    /// Bytes covered by the on-disk partition array
    pub fn array_bytes(&self) -> Option<usize> {
        (self.entries_count as usize).checked_mul(self.entry_size as usize)
    }

    /// Sectors covering the partition array
    pub fn array_sectors(&self) -> Option<usize> {
        Some(self.array_bytes()?.div_ceil(SECTOR_SIZE))
    }
}

/// One partition entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub type_guid: Guid,
    pub unique_guid: Guid,
    pub start_lba: u64,
    pub end_lba: u64,
    pub attributes: u64,
}

impl PartitionEntry {
    /// Logical size of an entry; the on-disk stride may be larger
    pub const SIZE: usize = 56;

    pub fn from_bytes(raw: &[u8]) -> Self {
        Self {
            type_guid: Guid::from_slice(&raw[0..16]),
            unique_guid: Guid::from_slice(&raw[16..32]),
            start_lba: le_u64(raw, 32),
            end_lba: le_u64(raw, 40),
            attributes: le_u64(raw, 48),
        }
    }

    /// Write the entry into the first [`Self::SIZE`] bytes of `raw`
    pub fn write_to(&self, raw: &mut [u8]) {
        raw[0..16].copy_from_slice(self.type_guid.as_bytes());
        raw[16..32].copy_from_slice(self.unique_guid.as_bytes());
        raw[32..40].copy_from_slice(&self.start_lba.to_le_bytes());
        raw[40..48].copy_from_slice(&self.end_lba.to_le_bytes());
        raw[48..56].copy_from_slice(&self.attributes.to_le_bytes());
    }

    pub fn is_empty(&self) -> bool {
        self.type_guid.is_zero()
    }

    /// Partition size in sectors (the end LBA is inclusive)
    pub fn sector_count(&self) -> u64 {
        self.end_lba.saturating_sub(self.start_lba) + 1
    }

    pub fn size_bytes(&self) -> u64 {
        self.sector_count() * SECTOR_SIZE as u64
    }
}

/// Partition entries with every empty slot removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionArray {
    buffer: Vec<u8>,
    count: usize,
    entry_size: usize,
}

impl PartitionArray {
    /// Wrap an already compacted buffer of `count` entries
    pub fn from_compacted(buffer: Vec<u8>, count: usize, entry_size: usize) -> Self {
        Self {
            buffer,
            count,
            entry_size,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// On-disk stride of one entry
    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Raw bytes of entry `index`, including any bytes past [`PartitionEntry::SIZE`]
    pub fn raw(&self, index: usize) -> Option<&[u8]> {
        if index >= self.count {
            return None;
        }
        let start = index * self.entry_size;
        self.buffer.get(start..start + self.entry_size)
    }

    pub fn get(&self, index: usize) -> Option<PartitionEntry> {
        self.raw(index).map(PartitionEntry::from_bytes)
    }

    pub fn iter(&self) -> impl Iterator<Item = PartitionEntry> + '_ {
        self.buffer
            .chunks_exact(self.entry_size)
            .take(self.count)
            .map(PartitionEntry::from_bytes)
    }

    /// Bytes held by the backing buffer
    pub fn capacity_bytes(&self) -> usize {
        self.buffer.capacity()
    }
}

fn slot_is_empty(buffer: &[u8], index: usize, stride: usize) -> bool {
    buffer[index * stride..index * stride + 16].iter().all(|&b| b == 0)
}

/// Move every non-empty entry to the front, preserving order
///
/// Two cursors walk the array: the left one stops on the first empty slot,
/// the right one on the next occupied slot after it. The occupied entry is
/// moved left and its old slot zeroed. Returns the number of occupied
/// entries.
pub fn compact_entries(buffer: &mut [u8], count: usize, stride: usize) -> usize {
    let mut left = 0;
    loop {
        while left < count && !slot_is_empty(buffer, left, stride) {
            left += 1;
        }

        let mut right = left;
        while right < count && slot_is_empty(buffer, right, stride) {
            right += 1;
        }

        if left >= count || right >= count {
            return left;
        }

        buffer.copy_within(right * stride..(right + 1) * stride, left * stride);
        buffer[right * stride..(right + 1) * stride].fill(0);
    }
}

/// Read the primary header from LBA 1
pub fn read_gpt_header<D: SectorDevice>(disk: &mut DiskReader<D>) -> Result<GptHeader> {
    let mut sector = [0u8; SECTOR_SIZE];
    disk.read(GPT_HEADER_LBA, &mut sector)?;
    let header = GptHeader::parse(&sector)?;
    log::debug!(
        "gpt: disk {} array at LBA {} ({} x {} bytes)",
        header.disk_guid,
        header.partition_array_lba,
        header.entries_count,
        header.entry_size
    );
    Ok(header)
}

/// Read, verify and compact the partition array described by `header`
pub fn get_partition_array<D: SectorDevice>(
    header: &GptHeader,
    disk: &mut DiskReader<D>,
) -> Result<PartitionArray> {
    let bytes = header
        .array_bytes()
        .ok_or(BootError::InvalidGptHeader("Partition array too large"))?;
    let sectors = bytes.div_ceil(SECTOR_SIZE);

    let mut buffer = disk.read_sectors(header.partition_array_lba, sectors)?;

    if crc32(&buffer[..bytes]) != header.partition_array_checksum {
        return Err(BootError::GptArrayChecksum);
    }

    let stride = header.entry_size as usize;
    let count = compact_entries(&mut buffer[..bytes], header.entries_count as usize, stride);
    buffer.truncate(count * stride);
    buffer.shrink_to_fit();

    log::info!(
        "gpt: {} of {} partition slots in use",
        count,
        header.entries_count
    );
    Ok(PartitionArray::from_compacted(buffer, count, stride))
}

/// First partition whose type GUID is `type_guid`
pub fn find_partition(array: &PartitionArray, type_guid: &Guid) -> Option<PartitionEntry> {
    array.iter().find(|entry| entry.type_guid == *type_guid)
}

//! Extended disk reads
//!
//! Sector reads go through INT 0x13 AH=0x42 with a Disk Address Packet.
//! The firmware call itself sits behind [`SectorDevice`]; this module splits
//! requests to the per-call limit and works around BIOSes that reject a
//! full 128-sector transfer.

use alloc::vec::Vec;

use static_assertions::const_assert_eq;

use super::gpt_handler::PartitionEntry;
use crate::config::BootConfig;
use crate::error::{BootError, Result};

/// Logical sector size
pub const SECTOR_SIZE: usize = trident_api::layout::SECTOR_SIZE;

/// Largest transfer a single INT 0x13 AH=0x42 call accepts
pub const MAX_SECTORS_PER_CALL: u16 = 128;

/// Some BIOSes fail full-size transfers; those are retried as 127 + 1
const SPLIT_HEAD_SECTORS: usize = 127;

/// Disk error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    ReadFailed,
    InvalidParameters,
    MediaNotReady,
    SectorNotFound,
    DMAOverrun,
    DMABoundary,
    DataCRCError,
    ControllerError,
    TimeoutError,
    Unknown(u8),
}

impl DiskError {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::InvalidParameters,
            0x02 => Self::MediaNotReady,
            0x04 => Self::SectorNotFound,
            0x08 => Self::DMAOverrun,
            0x09 => Self::DMABoundary,
            0x10 => Self::DataCRCError,
            0x20 => Self::ControllerError,
            0x80 => Self::TimeoutError,
            0xFF => Self::ReadFailed,
            other => Self::Unknown(other),
        }
    }

    /// Raw INT 0x13 status code
    pub fn code(&self) -> u8 {
        match self {
            Self::InvalidParameters => 0x01,
            Self::MediaNotReady => 0x02,
            Self::SectorNotFound => 0x04,
            Self::DMAOverrun => 0x08,
            Self::DMABoundary => 0x09,
            Self::DataCRCError => 0x10,
            Self::ControllerError => 0x20,
            Self::TimeoutError => 0x80,
            Self::ReadFailed => 0xFF,
            Self::Unknown(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ReadFailed => "Read failed",
            Self::InvalidParameters => "Invalid parameters",
            Self::MediaNotReady => "Media not ready",
            Self::SectorNotFound => "Sector not found",
            Self::DMAOverrun => "DMA overrun",
            Self::DMABoundary => "DMA crossed 64K boundary",
            Self::DataCRCError => "Data CRC error",
            Self::ControllerError => "Controller error",
            Self::TimeoutError => "Timeout error",
            Self::Unknown(_) => "Unknown error",
        }
    }
}

pub type DiskResult<T> = core::result::Result<T, DiskError>;

/// Disk Address Packet for INT 0x13 AH=0x42
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct DiskAddressPacket {
    pub size: u8,
    pub reserved: u8,
    pub sector_count: u16,
    pub buffer_offset: u16,
    pub buffer_segment: u16,
    pub starting_lba: u64,
}

const_assert_eq!(core::mem::size_of::<DiskAddressPacket>(), 16);

impl DiskAddressPacket {
    pub fn new(lba: u64, sector_count: u16, segment: u16, offset: u16) -> Self {
        Self {
            size: core::mem::size_of::<Self>() as u8,
            reserved: 0,
            sector_count,
            buffer_offset: offset,
            buffer_segment: segment,
            starting_lba: lba,
        }
    }

    /// Packet for a buffer at a linear real-mode address
    ///
    /// Returns `None` when the buffer does not fit below 1 MiB.
    pub fn for_linear(lba: u64, sector_count: u16, address: u32) -> Option<Self> {
        let end = address.checked_add(sector_count as u32 * SECTOR_SIZE as u32)?;
        if end > 0x10_0000 {
            return None;
        }
        Some(Self::new(lba, sector_count, (address >> 4) as u16, (address & 0xF) as u16))
    }

    /// Linear address of the transfer buffer
    pub fn buffer_address(&self) -> u32 {
        ((self.buffer_segment as u32) << 4) + self.buffer_offset as u32
    }

    pub fn validate(&self) -> DiskResult<()> {
        if self.sector_count == 0 || self.sector_count > MAX_SECTORS_PER_CALL {
            return Err(DiskError::InvalidParameters);
        }
        Ok(())
    }
}

/// A device that reads whole sectors
#[cfg_attr(test, mockall::automock)]
pub trait SectorDevice {
    /// Largest number of sectors one `read` may transfer
    fn max_sectors_per_call(&self) -> u16;

    /// Fill `buffer` (a whole number of sectors) starting at `lba`
    fn read(&mut self, lba: u64, buffer: &mut [u8]) -> DiskResult<()>;
}

impl<D: SectorDevice + ?Sized> SectorDevice for &mut D {
    fn max_sectors_per_call(&self) -> u16 {
        (**self).max_sectors_per_call()
    }

    fn read(&mut self, lba: u64, buffer: &mut [u8]) -> DiskResult<()> {
        (**self).read(lba, buffer)
    }
}

/// RAM-backed device over a raw disk image
pub struct MemoryDisk {
    image: Vec<u8>,
}

impl MemoryDisk {
    pub fn new(image: Vec<u8>) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }
}

impl SectorDevice for MemoryDisk {
    fn max_sectors_per_call(&self) -> u16 {
        MAX_SECTORS_PER_CALL
    }

    fn read(&mut self, lba: u64, buffer: &mut [u8]) -> DiskResult<()> {
        let start = usize::try_from(lba)
            .ok()
            .and_then(|lba| lba.checked_mul(SECTOR_SIZE))
            .ok_or(DiskError::SectorNotFound)?;
        let end = start.checked_add(buffer.len()).ok_or(DiskError::SectorNotFound)?;
        let source = self.image.get(start..end).ok_or(DiskError::SectorNotFound)?;
        buffer.copy_from_slice(source);
        Ok(())
    }
}

/// Splits reads into firmware-sized chunks
pub struct DiskReader<D> {
    device: D,
    max_sectors: u16,
    split_full_reads: bool,
}

impl<D: SectorDevice> DiskReader<D> {
    pub fn new(device: D, config: &BootConfig) -> Self {
        Self::with_limits(device, config.max_sectors_per_read, config.split_full_reads)
    }

    pub fn with_limits(device: D, max_sectors: u16, split_full_reads: bool) -> Self {
        let max_sectors = max_sectors.min(device.max_sectors_per_call()).max(1);
        Self {
            device,
            max_sectors,
            split_full_reads,
        }
    }

    pub fn max_sectors(&self) -> u16 {
        self.max_sectors
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    /// Read `buffer.len() / 512` sectors starting at `lba`
    pub fn read(&mut self, lba: u64, buffer: &mut [u8]) -> Result {
        if buffer.len() % SECTOR_SIZE != 0 {
            return Err(DiskError::InvalidParameters.into());
        }
        let chunk_bytes = self.max_sectors as usize * SECTOR_SIZE;
        let mut lba = lba;
        for chunk in buffer.chunks_mut(chunk_bytes) {
            self.read_chunk(lba, chunk)?;
            lba += (chunk.len() / SECTOR_SIZE) as u64;
        }
        Ok(())
    }

    fn read_chunk(&mut self, lba: u64, chunk: &mut [u8]) -> Result {
        match self.device.read(lba, chunk) {
            Ok(()) => Ok(()),
            Err(err)
                if self.split_full_reads
                    && chunk.len() == MAX_SECTORS_PER_CALL as usize * SECTOR_SIZE =>
            {
                log::warn!(
                    "disk: {}-sector read at LBA {} failed ({}), retrying as 127 + 1",
                    MAX_SECTORS_PER_CALL,
                    lba,
                    err.description()
                );
                let (head, tail) = chunk.split_at_mut(SPLIT_HEAD_SECTORS * SECTOR_SIZE);
                self.device.read(lba, head)?;
                self.device.read(lba + SPLIT_HEAD_SECTORS as u64, tail)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read `count` sectors into a freshly allocated buffer
    pub fn read_sectors(&mut self, lba: u64, count: usize) -> Result<Vec<u8>> {
        let bytes = count.checked_mul(SECTOR_SIZE).ok_or(BootError::OutOfMemory)?;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(bytes)
            .map_err(|_| BootError::OutOfMemory)?;
        buffer.resize(bytes, 0);
        self.read(lba, &mut buffer)?;
        Ok(buffer)
    }
}

/// Copy a whole partition into `destination`
///
/// Devices that cannot transfer to the destination directly stage each
/// chunk themselves. Returns the number of bytes loaded.
pub fn load_partition<D: SectorDevice>(
    reader: &mut DiskReader<D>,
    partition: &PartitionEntry,
    destination: &mut [u8],
) -> Result<usize> {
    let sectors = partition.sector_count();
    let total = usize::try_from(sectors)
        .ok()
        .and_then(|s| s.checked_mul(SECTOR_SIZE))
        .ok_or(BootError::PartitionTooLarge)?;
    if total > destination.len() {
        return Err(BootError::PartitionTooLarge);
    }

    reader.read(partition.start_lba, &mut destination[..total])?;

    log::info!(
        "disk: loaded {} sectors from LBA {}..={}",
        sectors,
        partition.start_lba,
        partition.end_lba
    );
    Ok(total)
}

//! Boot Information Builder
//!
//! Flattens the memory map and the discovered drive and video metadata into
//! one heap block in the fixed hand-off layout:
//!
//! ```text
//! | BootInfo (72) | VideoLinearText (8) | MemoryMapEntry x count (24 each) |
//! ```
//!
//! Every address stored in the structure is linear, i.e. the heap pointer
//! plus the base of the data segment it was allocated in.

use alloc::vec::Vec;
use core::mem::size_of;

use trident_api::{BootInfo, MemoryMapEntry, VideoLinearText, VideoType, BOOT_INFO_SIZE};

use crate::bios::e820_detection::MemoryMap;
use crate::error::{BootError, Result};
use crate::firmware::gpt_handler::Guid;

/// Segment of the colour text buffer
pub const TEXT_BUFFER_SEGMENT: u16 = 0xB800;
/// Rows of every BIOS text mode the loader uses
pub const TEXT_ROWS: u16 = 25;

const VIDEO_OFFSET: usize = BOOT_INFO_SIZE as usize;
const MAP_OFFSET: usize = VIDEO_OFFSET + size_of::<VideoLinearText>();

/// Firmware video mode query
pub trait VideoModeQuery {
    /// AX after INT 0x10 AH=0x0F, or `None` when the call failed
    fn current_mode(&mut self) -> Option<u16>;
}

/// Decode the AX value returned by INT 0x10 AH=0x0F
pub fn video_from_mode_query(ax: u16) -> VideoLinearText {
    VideoLinearText {
        mode: ax & 0xFF,
        segment: TEXT_BUFFER_SEGMENT,
        columns: (ax >> 8) & 0xFF,
        rows: TEXT_ROWS,
    }
}

/// Assembled Boot-Info and the arrays it points to
#[derive(Debug)]
pub struct BootInfoBlock {
    storage: Vec<u8>,
    segment_base: u64,
    info: BootInfo,
}

impl BootInfoBlock {
    /// Linear address of the Boot-Info structure
    pub fn address(&self) -> u64 {
        self.storage.as_ptr() as u64 + self.segment_base
    }

    pub fn info(&self) -> &BootInfo {
        &self.info
    }

    /// Record where the flat archive was loaded
    pub fn set_archive(&mut self, address: u64, size: u64) {
        self.info.archive_address = address;
        self.info.archive_size = size;
        self.sync();
    }

    /// Record the ACPI root pointer
    pub fn set_acpi_rsdp(&mut self, address: u64) {
        self.info.acpi_rsdp = address;
        self.sync();
    }

    /// The whole block as handed to the next stage
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    /// Flattened memory map, read back from the block
    pub fn memory_map(&self) -> impl Iterator<Item = MemoryMapEntry> + '_ {
        self.storage[MAP_OFFSET..]
            .chunks_exact(size_of::<MemoryMapEntry>())
            .map(|raw| {
                let mut entry = [0u8; 24];
                entry.copy_from_slice(raw);
                MemoryMapEntry::from_bytes(&entry)
            })
    }

    fn sync(&mut self) {
        self.storage[..VIDEO_OFFSET].copy_from_slice(&self.info.to_bytes());
    }
}

fn encode_entry(entry: &MemoryMapEntry, out: &mut [u8]) {
    out[0..8].copy_from_slice(&entry.base.to_le_bytes());
    out[8..16].copy_from_slice(&entry.limit.to_le_bytes());
    out[16..20].copy_from_slice(&entry.region_type.to_le_bytes());
    out[20..24].copy_from_slice(&entry.acpi_extended_attributes.to_le_bytes());
}

/// Build the Boot-Info block
///
/// `segment_base` is the linear base of the segment the heap lives in;
/// `video` is `None` when the mode query failed.
pub fn assemble(
    drive_guid: &Guid,
    memory_map: &MemoryMap,
    video: Option<VideoLinearText>,
    segment_base: u64,
) -> Result<BootInfoBlock> {
    let stride = size_of::<MemoryMapEntry>();
    let total = MAP_OFFSET + memory_map.len() * stride;

    let mut storage = Vec::new();
    storage
        .try_reserve_exact(total)
        .map_err(|_| BootError::OutOfMemory)?;
    storage.resize(total, 0);

    for (entry, raw) in memory_map.iter().zip(storage[MAP_OFFSET..].chunks_exact_mut(stride)) {
        encode_entry(entry, raw);
    }

    let base = storage.as_ptr() as u64 + segment_base;
    let mut info = BootInfo::new();
    info.boot_drive_guid = *drive_guid.as_bytes();
    info.memory_map_entry_count = memory_map.len() as u32;
    info.memory_map_entry_stride = stride as u32;
    info.memory_map_address = base + MAP_OFFSET as u64;

    match video {
        Some(video) => {
            let raw = &mut storage[VIDEO_OFFSET..MAP_OFFSET];
            raw[0..2].copy_from_slice(&video.mode.to_le_bytes());
            raw[2..4].copy_from_slice(&video.segment.to_le_bytes());
            raw[4..6].copy_from_slice(&video.columns.to_le_bytes());
            raw[6..8].copy_from_slice(&video.rows.to_le_bytes());
            info.video_descriptor_type = VideoType::LinearText as u32;
            info.video_descriptor_address = base + VIDEO_OFFSET as u64;
        }
        None => {
            info.video_descriptor_type = VideoType::None as u32;
            info.video_descriptor_address = 0;
        }
    }

    let mut block = BootInfoBlock {
        storage,
        segment_base,
        info,
    };
    block.sync();
    log::debug!("boot info: {:?}", block.info);
    Ok(block)
}

//! Boot-Info hand-off structures
//!
//! This module defines the structures passed from the Second Stage Loader to
//! the Third Stage Loader and from there to the kernel.
//!
//! Byte layout of [`BootInfo`]:
//!
//! | Offset | Type       | Field                          |
//! |--------|------------|--------------------------------|
//! | 0      | `u32`      | total size of the structure    |
//! | 4      | `[u8; 16]` | boot drive GUID                |
//! | 20     | `u32`      | memory map entry count         |
//! | 24     | `u32`      | memory map entry stride        |
//! | 28     | `u64`      | memory map physical address    |
//! | 36     | `u32`      | video descriptor type          |
//! | 40     | `u64`      | video descriptor address       |
//! | 48     | `u64`      | flat archive physical address  |
//! | 56     | `u64`      | flat archive size in bytes     |
//! | 64     | `u64`      | ACPI RSDP physical address     |

use core::fmt;
use core::mem::size_of;

use static_assertions::{assert_eq_size, const_assert_eq};

/// Size every consumer expects in `total_size`
pub const BOOT_INFO_SIZE: u32 = 72;

/// Memory region types reported by the E820 interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryRegionType {
    Usable = 1,
    Reserved = 2,
    AcpiReclaimable = 3,
    AcpiNvs = 4,
    BadMemory = 5,
}

impl MemoryRegionType {
    /// Decode a raw E820 type; unknown values are treated as reserved
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Usable,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            _ => Self::Reserved,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Usable => "Usable RAM",
            Self::Reserved => "Reserved",
            Self::AcpiReclaimable => "ACPI Reclaimable",
            Self::AcpiNvs => "ACPI NVS",
            Self::BadMemory => "Bad Memory",
        }
    }
}

/// One memory map entry, exactly as returned by INT 15h AX=E820h
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct MemoryMapEntry {
    /// Physical base address
    pub base: u64,
    /// Length of the region in bytes
    pub limit: u64,
    /// Raw region type (see [`MemoryRegionType`])
    pub region_type: u32,
    /// ACPI 3.0 extended attributes
    pub acpi_extended_attributes: u32,
}

impl MemoryMapEntry {
    /// Stride of the entry in the hand-off array
    pub const STRIDE: u32 = size_of::<MemoryMapEntry>() as u32;

    pub const fn new(base: u64, limit: u64, region_type: u32) -> Self {
        Self {
            base,
            limit,
            region_type,
            acpi_extended_attributes: 1,
        }
    }

    pub fn kind(&self) -> MemoryRegionType {
        MemoryRegionType::from_raw(self.region_type)
    }

    pub fn is_usable(&self) -> bool {
        self.kind() == MemoryRegionType::Usable && self.limit > 0
    }

    pub fn end_address(&self) -> u64 {
        self.base.saturating_add(self.limit)
    }

    /// Decode from the raw 24-byte BIOS buffer
    pub fn from_bytes(raw: &[u8; 24]) -> Self {
        let u64_at = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[o..o + 8]);
            u64::from_le_bytes(b)
        };
        let u32_at = |o: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&raw[o..o + 4]);
            u32::from_le_bytes(b)
        };
        Self {
            base: u64_at(0),
            limit: u64_at(8),
            region_type: u32_at(16),
            acpi_extended_attributes: u32_at(20),
        }
    }
}

/// Kind of video descriptor referenced by [`BootInfo::video_descriptor_address`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VideoType {
    /// No usable video output, the address is zero
    None = 0,
    /// Linear text buffer described by [`VideoLinearText`]
    LinearText = 1,
}

impl VideoType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::LinearText),
            _ => None,
        }
    }
}

/// Text mode video descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct VideoLinearText {
    /// BIOS video mode number
    pub mode: u16,
    /// Real-mode segment of the text buffer
    pub segment: u16,
    pub columns: u16,
    pub rows: u16,
}

impl VideoLinearText {
    /// Physical address of the character buffer
    pub fn buffer_address(&self) -> u64 {
        (self.segment as u64) << 4
    }
}

/// Boot information handed from stage to stage
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct BootInfo {
    pub total_size: u32,
    pub boot_drive_guid: [u8; 16],
    pub memory_map_entry_count: u32,
    pub memory_map_entry_stride: u32,
    pub memory_map_address: u64,
    pub video_descriptor_type: u32,
    pub video_descriptor_address: u64,
    pub archive_address: u64,
    pub archive_size: u64,
    pub acpi_rsdp: u64,
}

const_assert_eq!(size_of::<BootInfo>(), BOOT_INFO_SIZE as usize);
assert_eq_size!(MemoryMapEntry, [u8; 24]);
assert_eq_size!(VideoLinearText, u64);

/// Hand-off validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffError {
    /// The producer was built against a different layout
    SizeMismatch { expected: u32, found: u32 },
    /// Fewer bytes than a full structure
    Truncated,
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { expected, found } => write!(
                f,
                "boot info size mismatch (expected {} bytes, found {})",
                expected, found
            ),
            Self::Truncated => write!(f, "boot info truncated"),
        }
    }
}

impl BootInfo {
    /// Create an empty structure with `total_size` filled in
    pub const fn new() -> Self {
        Self {
            total_size: BOOT_INFO_SIZE,
            boot_drive_guid: [0; 16],
            memory_map_entry_count: 0,
            memory_map_entry_stride: MemoryMapEntry::STRIDE,
            memory_map_address: 0,
            video_descriptor_type: VideoType::None as u32,
            video_descriptor_address: 0,
            archive_address: 0,
            archive_size: 0,
            acpi_rsdp: 0,
        }
    }

    /// Check the size stamp against the compiled-in layout
    pub fn check_size(total_size: u32) -> Result<(), HandoffError> {
        if total_size == BOOT_INFO_SIZE {
            Ok(())
        } else {
            Err(HandoffError::SizeMismatch {
                expected: BOOT_INFO_SIZE,
                found: total_size,
            })
        }
    }

    pub fn video_type(&self) -> Option<VideoType> {
        VideoType::from_raw(self.video_descriptor_type)
    }

    pub fn has_acpi(&self) -> bool {
        self.acpi_rsdp != 0
    }

    /// Serialize into the hand-off byte layout
    pub fn to_bytes(&self) -> [u8; BOOT_INFO_SIZE as usize] {
        let mut out = [0u8; BOOT_INFO_SIZE as usize];
        let guid = self.boot_drive_guid;
        out[0..4].copy_from_slice(&{ self.total_size }.to_le_bytes());
        out[4..20].copy_from_slice(&guid);
        out[20..24].copy_from_slice(&{ self.memory_map_entry_count }.to_le_bytes());
        out[24..28].copy_from_slice(&{ self.memory_map_entry_stride }.to_le_bytes());
        out[28..36].copy_from_slice(&{ self.memory_map_address }.to_le_bytes());
        out[36..40].copy_from_slice(&{ self.video_descriptor_type }.to_le_bytes());
        out[40..48].copy_from_slice(&{ self.video_descriptor_address }.to_le_bytes());
        out[48..56].copy_from_slice(&{ self.archive_address }.to_le_bytes());
        out[56..64].copy_from_slice(&{ self.archive_size }.to_le_bytes());
        out[64..72].copy_from_slice(&{ self.acpi_rsdp }.to_le_bytes());
        out
    }

    /// Parse the hand-off byte layout, checking the size stamp first
    pub fn from_bytes(raw: &[u8]) -> Result<Self, HandoffError> {
        if raw.len() < 4 {
            return Err(HandoffError::Truncated);
        }
        let u32_at = |o: usize| u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);
        Self::check_size(u32_at(0))?;
        if raw.len() < BOOT_INFO_SIZE as usize {
            return Err(HandoffError::Truncated);
        }
        let u64_at = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[o..o + 8]);
            u64::from_le_bytes(b)
        };
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&raw[4..20]);
        Ok(Self {
            total_size: u32_at(0),
            boot_drive_guid: guid,
            memory_map_entry_count: u32_at(20),
            memory_map_entry_stride: u32_at(24),
            memory_map_address: u64_at(28),
            video_descriptor_type: u32_at(36),
            video_descriptor_address: u64_at(40),
            archive_address: u64_at(48),
            archive_size: u64_at(56),
            acpi_rsdp: u64_at(64),
        })
    }

    /// Read a Boot-Info structure left in memory by the previous stage
    ///
    /// # Safety
    /// `address` must point to at least four readable bytes, and to
    /// `BOOT_INFO_SIZE` readable bytes whenever the size stamp matches.
    pub unsafe fn read_from(address: usize) -> Result<Self, HandoffError> {
        let stamp = unsafe { core::ptr::read_unaligned(address as *const u32) };
        Self::check_size(stamp)?;
        let raw = unsafe { core::slice::from_raw_parts(address as *const u8, BOOT_INFO_SIZE as usize) };
        Self::from_bytes(raw)
    }
}

impl Default for BootInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BootInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootInfo")
            .field("total_size", &{ self.total_size })
            .field("boot_drive_guid", &{ self.boot_drive_guid })
            .field("memory_map_entry_count", &{ self.memory_map_entry_count })
            .field("memory_map_entry_stride", &{ self.memory_map_entry_stride })
            .field("memory_map_address", &format_args!("{:#x}", { self.memory_map_address }))
            .field("video_descriptor_type", &{ self.video_descriptor_type })
            .field("video_descriptor_address", &format_args!("{:#x}", { self.video_descriptor_address }))
            .field("archive_address", &format_args!("{:#x}", { self.archive_address }))
            .field("archive_size", &{ self.archive_size })
            .field("acpi_rsdp", &format_args!("{:#x}", { self.acpi_rsdp }))
            .finish()
    }
}

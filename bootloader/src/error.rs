//! Bootloader error handling
//!
//! This module defines the error types used throughout the bootloader
//! for consistent error reporting and handling. Every payload is `Copy`
//! so errors can be returned from any layer without touching the heap.

use core::fmt;

use arrayvec::ArrayString;

use crate::firmware::disk_reader::DiskError;

/// Capacity of the identifier carried by lookup errors
pub const NAME_CAPACITY: usize = 64;

/// Identifier (file name, symbol name) attached to a lookup failure
pub type Name = ArrayString<NAME_CAPACITY>;

/// Build a [`Name`], truncating at a character boundary when too long
pub fn name_of(text: &str) -> Name {
    let mut name = Name::new();
    for ch in text.chars() {
        if name.try_push(ch).is_err() {
            break;
        }
    }
    name
}

/// Bootloader error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Resource exhaustion
    OutOfMemory,
    LoadTableFull,
    PartitionTooLarge,
    AddressOutOfRange(u64),

    /// Format validation failures
    InvalidGptSignature,
    InvalidGptHeader(&'static str),
    GptHeaderChecksum,
    GptArrayChecksum,
    InvalidPeImage(&'static str),
    InvalidArchive(&'static str),
    BootInfoSizeMismatch { expected: u32, found: u32 },

    /// Lookup failures
    PartitionNotFound,
    FileNotFound(Name),
    SymbolNotFound(Name),
    MissingExportTable(Name),

    /// Unsupported features
    OrdinalImport,
    ForwardedExport(Name),

    /// Hardware failures
    A20Unavailable,
    DiskReadFailed(DiskError),
    MemoryMapUnavailable,
    CpuUnsupported(&'static str),
    PageMapOverflow,

    /// Boot configuration errors
    ConfigurationError(&'static str),
}

impl BootError {
    /// Convert to an error code suitable for the diagnostic output
    pub fn as_error_code(&self) -> u32 {
        match self {
            BootError::OutOfMemory => 0x2002,
            BootError::LoadTableFull => 0x2003,
            BootError::PartitionTooLarge => 0x2004,
            BootError::AddressOutOfRange(_) => 0x2005,
            BootError::InvalidGptSignature => 0x3000,
            BootError::InvalidGptHeader(_) => 0x3001,
            BootError::GptHeaderChecksum => 0x3002,
            BootError::GptArrayChecksum => 0x3003,
            BootError::InvalidPeImage(_) => 0x3010,
            BootError::InvalidArchive(_) => 0x3020,
            BootError::BootInfoSizeMismatch { .. } => 0x3030,
            BootError::PartitionNotFound => 0x7000,
            BootError::FileNotFound(_) => 0x7001,
            BootError::SymbolNotFound(_) => 0x7002,
            BootError::MissingExportTable(_) => 0x7003,
            BootError::OrdinalImport => 0x9000,
            BootError::ForwardedExport(_) => 0x9001,
            BootError::A20Unavailable => 0x5000,
            BootError::DiskReadFailed(err) => 0x5100 + err.code() as u32,
            BootError::MemoryMapUnavailable => 0x5200,
            BootError::CpuUnsupported(_) => 0xB000,
            BootError::PageMapOverflow => 0xB001,
            BootError::ConfigurationError(_) => 0xA001,
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            BootError::OutOfMemory => "Out of memory",
            BootError::LoadTableFull => "Image load table is full",
            BootError::PartitionTooLarge => "Partition does not fit its destination",
            BootError::AddressOutOfRange(_) => "Physical address outside the usable window",
            BootError::InvalidGptSignature => "Invalid GPT signature",
            BootError::InvalidGptHeader(msg) => msg,
            BootError::GptHeaderChecksum => "GPT header checksum mismatch",
            BootError::GptArrayChecksum => "GPT partition array checksum mismatch",
            BootError::InvalidPeImage(msg) => msg,
            BootError::InvalidArchive(msg) => msg,
            BootError::BootInfoSizeMismatch { .. } => "Boot info size mismatch",
            BootError::PartitionNotFound => "Boot partition not found",
            BootError::FileNotFound(_) => "File not found",
            BootError::SymbolNotFound(_) => "Imported symbol not found",
            BootError::MissingExportTable(_) => "Image has no export table",
            BootError::OrdinalImport => "Import by ordinal is not supported",
            BootError::ForwardedExport(_) => "Forwarded exports are not supported",
            BootError::A20Unavailable => "Failed to enable the A20 line",
            BootError::DiskReadFailed(err) => err.description(),
            BootError::MemoryMapUnavailable => "Failed to read the memory map",
            BootError::CpuUnsupported(feature) => feature,
            BootError::PageMapOverflow => "Identity map out of range",
            BootError::ConfigurationError(msg) => msg,
        }
    }

    /// Identifier attached to lookup failures, if any
    pub fn subject(&self) -> Option<&str> {
        match self {
            BootError::FileNotFound(name)
            | BootError::SymbolNotFound(name)
            | BootError::MissingExportTable(name)
            | BootError::ForwardedExport(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BootError: {}", self.description())?;
        if let Some(subject) = self.subject() {
            write!(f, " '{}'", subject)?;
        }
        match self {
            BootError::BootInfoSizeMismatch { expected, found } => {
                write!(f, " (expected {}, found {})", expected, found)?;
            }
            BootError::AddressOutOfRange(address) => write!(f, " ({:#x})", address)?,
            _ => {}
        }
        write!(f, " (code: {:#x})", self.as_error_code())
    }
}

impl From<DiskError> for BootError {
    fn from(err: DiskError) -> Self {
        BootError::DiskReadFailed(err)
    }
}

impl From<trident_api::HandoffError> for BootError {
    fn from(err: trident_api::HandoffError) -> Self {
        match err {
            trident_api::HandoffError::SizeMismatch { expected, found } => {
                BootError::BootInfoSizeMismatch { expected, found }
            }
            trident_api::HandoffError::Truncated => BootError::BootInfoSizeMismatch {
                expected: trident_api::BOOT_INFO_SIZE,
                found: 0,
            },
        }
    }
}

/// Result type used throughout the bootloader
pub type Result<T = ()> = core::result::Result<T, BootError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_name_truncates() {
        let long = "x".repeat(100);
        assert_eq!(name_of(&long).len(), NAME_CAPACITY);
        assert_eq!(name_of("kernel.pe").as_str(), "kernel.pe");
    }

    #[test]
    fn test_display_names_missing_identifier() {
        let err = BootError::SymbolNotFound(name_of("KeBugCheck"));
        let text = format!("{}", err);
        assert!(text.contains("KeBugCheck"));
        assert!(text.contains("0x7002"));
    }

    #[test]
    fn test_disk_error_conversion() {
        let err: BootError = DiskError::from_code(0x04).into();
        assert_eq!(err, BootError::DiskReadFailed(DiskError::SectorNotFound));
        assert_eq!(err.as_error_code(), 0x5104);
    }

    #[test]
    fn test_handoff_error_conversion() {
        let err: BootError = trident_api::HandoffError::SizeMismatch { expected: 72, found: 64 }.into();
        assert_eq!(err, BootError::BootInfoSizeMismatch { expected: 72, found: 64 });
        assert!(format!("{}", err).contains("found 64"));
    }
}

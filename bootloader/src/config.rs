//! Boot configuration
//!
//! Plain value object with compile-time defaults. The stages build it once
//! at entry; nothing reads configuration from disk.

use log::LevelFilter;

use crate::error::{BootError, Result};
use crate::firmware::disk_reader::MAX_SECTORS_PER_CALL;
use crate::firmware::gpt_handler::Guid;

/// Loader configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Type GUID of the partition holding the flat archive
    pub boot_partition_type: Guid,
    /// Physical address the archive partition is copied to
    pub archive_load_address: u64,
    /// Archive path of the kernel image
    pub kernel_path: &'static str,
    /// Prefix prepended to imported DLL names
    pub dependency_prefix: &'static str,
    /// Size of the statically reserved heap arena
    pub heap_size: usize,
    /// Largest chunk handed to the firmware disk call
    pub max_sectors_per_read: u16,
    /// Retry failed full-size reads as 127 + 1 sectors
    pub split_full_reads: bool,
    pub log_level: LevelFilter,
}

impl BootConfig {
    /// Configuration the stage binaries are built with
    pub const DEFAULT: BootConfig = BootConfig::default();

    pub const fn default() -> Self {
        Self {
            boot_partition_type: Guid::BIOS_BOOT,
            archive_load_address: 0x10_0000,
            kernel_path: "ramfs/kernel.pe",
            dependency_prefix: "ramfs/",
            heap_size: 0x8000,
            max_sectors_per_read: MAX_SECTORS_PER_CALL,
            split_full_reads: true,
            log_level: if cfg!(feature = "verbose_logging") {
                LevelFilter::Trace
            } else {
                LevelFilter::Info
            },
        }
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result {
        if self.boot_partition_type.is_zero() {
            return Err(BootError::ConfigurationError(
                "Boot partition type cannot be the empty GUID",
            ));
        }
        if self.archive_load_address < 0x10_0000 || self.archive_load_address % 0x1000 != 0 {
            return Err(BootError::ConfigurationError(
                "Archive must load page-aligned above 1 MiB",
            ));
        }
        if self.kernel_path.is_empty() || !self.kernel_path.starts_with(self.dependency_prefix) {
            return Err(BootError::ConfigurationError(
                "Kernel path must live under the dependency prefix",
            ));
        }
        if self.max_sectors_per_read == 0 || self.max_sectors_per_read > MAX_SECTORS_PER_CALL {
            return Err(BootError::ConfigurationError("Invalid sectors per read"));
        }
        if self.heap_size < 0x1000 {
            return Err(BootError::ConfigurationError("Heap too small"));
        }
        Ok(())
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

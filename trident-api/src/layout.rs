//! Physical memory layout of the loader stages
//!
//! The boot sector loads both later stages back to back; these addresses are
//! baked into the linker scripts of the stage binaries.

/// Load address of the Second Stage Loader
pub const SSL_ADDRESS: u32 = 0x10000;
/// Real-mode segment of the Second Stage Loader
pub const SSL_SEGMENT: u16 = (SSL_ADDRESS >> 4) as u16;
/// Maximum size of the Second Stage Loader image
pub const SSL_SIZE: u32 = 64 * 1024;

/// Load address of the Third Stage Loader
pub const TSL_ADDRESS: u32 = 0x20000;
/// Real-mode segment of the Third Stage Loader
pub const TSL_SEGMENT: u16 = (TSL_ADDRESS >> 4) as u16;
/// Maximum size of the Third Stage Loader image
pub const TSL_SIZE: u32 = 64 * 1024;

/// Region the boot sector fills with both stages
pub const EXTRA_LOAD_ADDRESS: u32 = SSL_ADDRESS;
pub const EXTRA_LOAD_SIZE: u32 = SSL_SIZE + TSL_SIZE;

/// Low-memory buffer for firmware disk transfers whose destination lies
/// above 1 MiB
pub const BOUNCE_BUFFER_ADDRESS: u32 = TSL_ADDRESS + TSL_SIZE;
/// One full INT 0x13 transfer
pub const BOUNCE_BUFFER_SIZE: u32 = 128 * SECTOR_SIZE as u32;

/// Logical sector size used by every disk structure
pub const SECTOR_SIZE: usize = 512;

/// Page granularity used for identity mapping
pub const PAGE_SIZE: u64 = 0x1000;

/// Round `addr` up to the next page boundary
pub const fn align_page(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

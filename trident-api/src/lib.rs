//! Trident API - Hand-off contract between the boot stages and the kernel
//!
//! The Second Stage Loader, the Third Stage Loader and the kernel are built
//! independently and for different CPU modes. The only thing they share is
//! the byte layout of the structures in this crate, so every type here is
//! `#[repr(C)]` or `#[repr(C, packed)]` and its size is pinned at compile time.
//!
//! # Modules
//!
//! - **boot**: Boot-Info structure, memory-map entries and video descriptors
//! - **layout**: Physical addresses and sizes of the loader stages

#![no_std]

#[cfg(feature = "std")]
extern crate std;

pub mod boot;
pub mod layout;

pub use boot::{
    BootInfo, HandoffError, MemoryMapEntry, MemoryRegionType, VideoLinearText, VideoType,
    BOOT_INFO_SIZE,
};

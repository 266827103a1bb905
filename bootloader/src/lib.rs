//! Trident Bootloader Library
//!
//! Second and Third Stage Loaders of a BIOS/GPT boot chain. The Second
//! Stage runs in real/unreal mode, finds the boot partition and copies the
//! flat archive above 1 MiB; the Third Stage links the PE kernel and its
//! DLLs out of that archive, identity-maps them and enters long mode.
//!
//! Everything below `platform` is written against trait seams and is
//! exercised on the host by the unit and integration tests.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

/// Loader configuration
pub mod config;

/// Error type shared by every stage
pub mod error;

/// Heap arena and block allocator
pub mod core;

/// Extended disk reads, CRC32 and GPT parsing
pub mod firmware;

/// E820 memory map discovery
pub mod bios;

/// Flat archive, PE loader and Boot-Info assembly
pub mod kernel_if;

/// A20 gate, CPU feature checks and processor mode transitions
pub mod cpu_init;

/// GDT and port I/O
pub mod arch;

/// Identity page tables for the long-mode switch
pub mod memory_mgmt;

/// RSDP discovery
pub mod acpi_support;

/// Log sinks, serial, VGA text and PCI
pub mod drivers;

/// Second and Third Stage sequencing
pub mod boot_stage;

/// Privileged instructions and firmware calls (target builds only)
pub mod platform;

/// Panic reporting
pub mod utils;

pub use config::BootConfig;
pub use error::{BootError, Result};

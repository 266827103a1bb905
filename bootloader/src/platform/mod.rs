//! Platform primitives - privileged instructions and firmware calls
//!
//! Only exists in target builds. The boot stages reach these through the
//! trait seams (`PortIo`, `ModeControl`, `SectorDevice`, `E820Source`, ...)
//! so everything above this layer runs unchanged in host tests.

#[cfg(all(target_os = "none", target_arch = "x86"))]
mod cpu;

#[cfg(all(target_os = "none", target_arch = "x86", feature = "stage-ssl"))]
pub mod bios;

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub use cpu::{cpuid_supported, halt, HardwareModeControl};

#[cfg(all(target_os = "none", target_arch = "x86", feature = "stage-ssl"))]
pub use cpu::{data_segment_base, enter_tsl};

#[cfg(all(target_os = "none", target_arch = "x86", feature = "stage-tsl"))]
pub use cpu::enter_kernel;

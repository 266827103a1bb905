//! CPU compatibility check
//!
//! The loader needs PAE, long mode and 1 GiB pages. Anything older is
//! turned away before the loader commits to the mode switches.

use bitflags::bitflags;

use crate::error::{BootError, Result};

pub const LEAF_BASIC_MAX: u32 = 0;
pub const LEAF_FEATURES: u32 = 1;
pub const LEAF_EXTENDED_MAX: u32 = 0x8000_0000;
pub const LEAF_EXTENDED_FEATURES: u32 = 0x8000_0001;

bitflags! {
    /// CPUID leaf 1, EDX
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureEdx: u32 {
        const PSE = 1 << 3;
        const MSR = 1 << 5;
        const PAE = 1 << 6;
        const APIC = 1 << 9;
        const PGE = 1 << 13;
        const PAT = 1 << 16;
        const ACPI = 1 << 22;
    }
}

bitflags! {
    /// CPUID leaf 0x8000_0001, EDX
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtendedFeatureEdx: u32 {
        const SYSCALL = 1 << 11;
        const NX = 1 << 20;
        const PAGE_1G = 1 << 26;
        const LONG_MODE = 1 << 29;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Access to the CPUID instruction
pub trait CpuidSource {
    /// Whether the EFLAGS.ID bit can be toggled
    fn supported(&mut self) -> bool;
    fn cpuid(&mut self, leaf: u32) -> CpuidResult;
}

/// Verify the processor can run the long-mode kernel
pub fn check_cpu_compat<C: CpuidSource + ?Sized>(cpu: &mut C) -> Result {
    if !cpu.supported() {
        return Err(BootError::CpuUnsupported("CPUID instruction not available"));
    }
    if cpu.cpuid(LEAF_BASIC_MAX).eax < LEAF_FEATURES {
        return Err(BootError::CpuUnsupported("CPUID feature leaf not available"));
    }
    if cpu.cpuid(LEAF_EXTENDED_MAX).eax < LEAF_EXTENDED_FEATURES {
        return Err(BootError::CpuUnsupported("CPUID extended feature leaf not available"));
    }

    let features = FeatureEdx::from_bits_truncate(cpu.cpuid(LEAF_FEATURES).edx);
    if !features.contains(FeatureEdx::PAE) {
        return Err(BootError::CpuUnsupported("PAE not supported"));
    }

    let extended = ExtendedFeatureEdx::from_bits_truncate(cpu.cpuid(LEAF_EXTENDED_FEATURES).edx);
    if !extended.contains(ExtendedFeatureEdx::LONG_MODE) {
        return Err(BootError::CpuUnsupported("Long mode not supported"));
    }
    if !extended.contains(ExtendedFeatureEdx::PAGE_1G) {
        return Err(BootError::CpuUnsupported("1 GiB pages not supported"));
    }

    log::debug!("cpu: features={:?} extended={:?}", features, extended);
    Ok(())
}

/// The executing processor
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub struct NativeCpuid;

#[cfg(all(target_os = "none", target_arch = "x86"))]
impl CpuidSource for NativeCpuid {
    fn supported(&mut self) -> bool {
        crate::platform::cpuid_supported()
    }

    fn cpuid(&mut self, leaf: u32) -> CpuidResult {
        use core::arch::x86::__cpuid_count;

        #[allow(unused_unsafe)]
        let raw = unsafe { __cpuid_count(leaf, 0) };
        CpuidResult {
            eax: raw.eax,
            ebx: raw.ebx,
            ecx: raw.ecx,
            edx: raw.edx,
        }
    }
}

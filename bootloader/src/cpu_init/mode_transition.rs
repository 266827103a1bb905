//! Mode Transition Implementation
//!
//! The processor only ever moves forward: Real mode, Unreal mode, Protected
//! mode, Long mode. Each state is a token type and every transition consumes
//! the previous token, so code that needs a given mode asks for its token.

use crate::arch::x86::gdt::{GdtPointer, DATA32};
use crate::cpu_init::a20::A20Enabled;

/// CPU mode type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    RealMode,
    UnrealMode,
    ProtectedMode,
    LongMode,
}

impl CpuMode {
    pub fn description(&self) -> &'static str {
        match self {
            Self::RealMode => "Real Mode (16-bit)",
            Self::UnrealMode => "Unreal Mode (16-bit code, 32-bit data)",
            Self::ProtectedMode => "Protected Mode (32-bit)",
            Self::LongMode => "Long Mode (64-bit)",
        }
    }

    pub fn bit_width(&self) -> u32 {
        match self {
            Self::RealMode | Self::UnrealMode => 16,
            Self::ProtectedMode => 32,
            Self::LongMode => 64,
        }
    }

    pub fn can_access_memory_above_1mb(&self) -> bool {
        !matches!(self, Self::RealMode)
    }
}

/// Privileged primitives behind the transitions
pub trait ModeControl {
    fn disable_interrupts(&mut self);
    fn enable_interrupts(&mut self);
    fn load_gdt(&mut self, pointer: &GdtPointer);
    /// Briefly set CR0.PE, load `data_selector` into DS/ES, clear CR0.PE
    fn enter_unreal(&mut self, data_selector: u16);
    /// Set CR0.PE; the caller's far jump reloads CS
    fn enable_protection(&mut self);
    /// CR4.PAE
    fn enable_pae(&mut self);
    /// CR3
    fn load_page_table(&mut self, pml4: u64);
    /// EFER.LME
    fn enable_long_mode(&mut self);
    /// CR0.PG
    fn enable_paging(&mut self);
}

/// Firmware hand-over state of the second stage
#[derive(Debug)]
pub struct RealMode {
    _private: (),
}

#[derive(Debug)]
pub struct UnrealMode {
    gdt: GdtPointer,
}

#[derive(Debug)]
pub struct ProtectedMode {
    _private: (),
}

#[derive(Debug)]
pub struct LongMode {
    pml4: u64,
}

impl RealMode {
    /// # Safety
    /// The processor must actually be in real mode, and only one token may
    /// exist.
    pub unsafe fn assume() -> Self {
        Self { _private: () }
    }

    pub fn mode(&self) -> CpuMode {
        CpuMode::RealMode
    }

    /// Load `gdt` and cache a flat 4 GiB data segment in DS/ES
    pub fn enter_unreal<C: ModeControl + ?Sized>(self, ctl: &mut C, _a20: &A20Enabled, gdt: GdtPointer) -> UnrealMode {
        ctl.disable_interrupts();
        ctl.load_gdt(&gdt);
        ctl.enter_unreal(DATA32);
        ctl.enable_interrupts();
        log::debug!("cpu: {}", CpuMode::UnrealMode.description());
        UnrealMode { gdt }
    }
}

impl UnrealMode {
    pub fn mode(&self) -> CpuMode {
        CpuMode::UnrealMode
    }

    pub fn gdt(&self) -> GdtPointer {
        self.gdt
    }

    /// Interrupts stay off from here on
    pub fn enter_protected<C: ModeControl + ?Sized>(self, ctl: &mut C) -> ProtectedMode {
        ctl.disable_interrupts();
        ctl.load_gdt(&self.gdt);
        ctl.enable_protection();
        ProtectedMode { _private: () }
    }
}

impl ProtectedMode {
    /// # Safety
    /// The processor must be in 32-bit protected mode with a flat GDT.
    pub unsafe fn assume() -> Self {
        Self { _private: () }
    }

    pub fn mode(&self) -> CpuMode {
        CpuMode::ProtectedMode
    }

    /// PAE, then CR3, then EFER.LME, then CR0.PG
    pub fn enter_long_mode<C: ModeControl + ?Sized>(self, ctl: &mut C, pml4: u64) -> LongMode {
        ctl.disable_interrupts();
        ctl.enable_pae();
        ctl.load_page_table(pml4);
        ctl.enable_long_mode();
        ctl.enable_paging();
        LongMode { pml4 }
    }
}

impl LongMode {
    pub fn mode(&self) -> CpuMode {
        CpuMode::LongMode
    }

    pub fn pml4(&self) -> u64 {
        self.pml4
    }
}

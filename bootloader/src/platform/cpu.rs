// Control registers, descriptor tables and the stage exits

use core::arch::asm;

use x86::controlregs::{cr0, cr0_write, cr4, cr4_write, Cr0, Cr4};
use x86::msr::{rdmsr, wrmsr, IA32_EFER};

use crate::arch::x86::GdtPointer;
use crate::cpu_init::mode_transition::ModeControl;

const EFLAGS_ID: u32 = 1 << 21;
const EFER_LME: u64 = 1 << 8;

/// Stop the processor for good
pub fn halt() -> ! {
    loop {
        unsafe { asm!("cli", "hlt", options(nomem, nostack)) }
    }
}

/// Whether EFLAGS.ID can be toggled, i.e. CPUID exists
pub fn cpuid_supported() -> bool {
    let before: u32;
    let after: u32;
    unsafe {
        asm!(
            "pushfd",
            "pop {before:e}",
            "mov {after:e}, {before:e}",
            "xor {after:e}, {id}",
            "push {after:e}",
            "popfd",
            "pushfd",
            "pop {after:e}",
            "push {before:e}",
            "popfd",
            before = out(reg) before,
            after = out(reg) after,
            id = const EFLAGS_ID,
        );
    }
    (before ^ after) & EFLAGS_ID != 0
}

/// The executing processor
pub struct HardwareModeControl;

impl ModeControl for HardwareModeControl {
    fn disable_interrupts(&mut self) {
        unsafe { asm!("cli", options(nomem, nostack)) }
    }

    fn enable_interrupts(&mut self) {
        unsafe { asm!("sti", options(nomem, nostack)) }
    }

    fn load_gdt(&mut self, pointer: &GdtPointer) {
        unsafe { asm!("lgdt [{0:e}]", in(reg) pointer as *const GdtPointer, options(readonly, nostack)) }
    }

    fn enter_unreal(&mut self, data_selector: u16) {
        // The descriptor cache keeps the 4 GiB limit after DS/ES are
        // reloaded with their real-mode values.
        unsafe {
            asm!(
                "push ds",
                "push es",
                "mov eax, cr0",
                "or al, 1",
                "mov cr0, eax",
                "jmp 2f",
                "2:",
                "mov ds, {sel:x}",
                "mov es, {sel:x}",
                "and al, 0xFE",
                "mov cr0, eax",
                "pop es",
                "pop ds",
                sel = in(reg) data_selector,
                out("eax") _,
            )
        }
    }

    fn enable_protection(&mut self) {
        unsafe { cr0_write(cr0() | Cr0::CR0_PROTECTED_MODE) }
    }

    fn enable_pae(&mut self) {
        unsafe { cr4_write(cr4() | Cr4::CR4_ENABLE_PAE) }
    }

    fn load_page_table(&mut self, pml4: u64) {
        unsafe { asm!("mov cr3, {0:e}", in(reg) pml4 as u32, options(nostack)) }
    }

    fn enable_long_mode(&mut self) {
        unsafe { wrmsr(IA32_EFER, rdmsr(IA32_EFER) | EFER_LME) }
    }

    fn enable_paging(&mut self) {
        unsafe { cr0_write(cr0() | Cr0::CR0_ENABLE_PAGING) }
    }
}

/// Linear base of the current data segment
#[cfg(feature = "stage-ssl")]
pub fn data_segment_base() -> u64 {
    let ds: u16;
    unsafe { asm!("mov {0:x}, ds", out(reg) ds, options(nomem, nostack)) };
    (ds as u64) << 4
}

/// Leave the second stage: far jump into 32-bit code, load flat data
/// segments and call the third stage with the Boot-Info address
///
/// The second stage is linked at offset 0 of its segment, so label offsets
/// are rebased onto the stage's load address.
#[cfg(feature = "stage-ssl")]
pub fn enter_tsl(
    _protected: crate::cpu_init::mode_transition::ProtectedMode,
    boot_info: u64,
) -> ! {
    use crate::arch::x86::gdt::{CODE32, DATA32};
    use trident_api::layout::{SSL_ADDRESS, TSL_ADDRESS};

    unsafe {
        asm!(
            "pushl ${code}",
            "leal 2f, %eax",
            "addl ${base}, %eax",
            "pushl %eax",
            "lretl",
            ".code32",
            "2:",
            "movw ${data}, %ax",
            "movw %ax, %ds",
            "movw %ax, %es",
            "movw %ax, %fs",
            "movw %ax, %gs",
            "movw %ax, %ss",
            "movl ${stack}, %esp",
            "pushl %ecx",
            "pushl $0",
            "movl ${entry}, %eax",
            "jmp *%eax",
            ".code16",
            code = const CODE32,
            base = const SSL_ADDRESS,
            data = const DATA32,
            stack = const SSL_ADDRESS,
            entry = const TSL_ADDRESS,
            in("ecx") boot_info as u32,
            options(att_syntax, noreturn),
        )
    }
}

#[cfg(feature = "stage-tsl")]
#[repr(C, packed)]
struct FarPointer {
    offset: u32,
    selector: u16,
}

/// Far call into the 64-bit kernel with the Boot-Info address in ECX
#[cfg(feature = "stage-tsl")]
pub fn enter_kernel(
    _long: crate::cpu_init::mode_transition::LongMode,
    handoff: &crate::boot_stage::tsl::TslHandoff,
) -> ! {
    let target = FarPointer {
        offset: handoff.entry as u32,
        selector: crate::arch::x86::gdt::CODE64,
    };
    unsafe {
        asm!(
            "movl {stack}, %esp",
            "lcall *({target})",
            "2:",
            "cli",
            "hlt",
            "jmp 2b",
            target = in(reg) &target as *const FarPointer,
            stack = in(reg) handoff.stack_top as u32,
            in("ecx") handoff.boot_info as u32,
            options(att_syntax, noreturn),
        )
    }
}

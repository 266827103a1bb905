//! Second Stage Loader binary
//!
//! Loaded by the boot sector at 1000:0000 with the boot drive in DL.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;

use trident_bootloader::arch::x86::port::HardwarePorts;
use trident_bootloader::arch::x86::BootGdt;
use trident_bootloader::boot_stage::ssl::{self, SslPlatform};
use trident_bootloader::core::BootHeap;
use trident_bootloader::cpu_init::cpuid::NativeCpuid;
use trident_bootloader::cpu_init::mode_transition::RealMode;
use trident_bootloader::drivers::logger::{BootLogger, TextSink};
use trident_bootloader::drivers::serial::{SerialPort, COM1};
use trident_bootloader::kernel_if::physical::SegmentMemory;
use trident_bootloader::platform::bios::{BiosA20, BiosDisk, BiosMemoryMap, BiosTeletype, BiosVideo};
use trident_bootloader::platform::{self, HardwareModeControl};
use trident_bootloader::utils::report_panic;
use trident_bootloader::BootConfig;

const CONFIG: BootConfig = BootConfig::DEFAULT;

#[global_allocator]
static HEAP: BootHeap<{ CONFIG.heap_size }> = BootHeap::new();

static LOGGER: BootLogger = BootLogger::new();

static GDT: BootGdt = BootGdt::new();

// Flat 64 KiB segment at SSL_ADDRESS for code, data and stack
core::arch::global_asm!(
    ".section .text.entry, \"ax\"",
    ".global _start",
    "_start:",
    "cli",
    "movw ${segment}, %ax",
    "movw %ax, %ds",
    "movw %ax, %es",
    "movw %ax, %ss",
    "movl $0xFFF0, %esp",
    "sti",
    "movzbl %dl, %edx",
    "pushl %edx",
    "calll ssl_entry",
    "1:",
    "hlt",
    "jmp 1b",
    segment = const trident_api::layout::SSL_SEGMENT,
    options(att_syntax),
);

#[unsafe(no_mangle)]
extern "C" fn ssl_entry(boot_drive: u32) -> ! {
    if HEAP.init().is_err() {
        platform::halt();
    }

    let mut serial = SerialPort::new(HardwarePorts, COM1);
    serial.init();
    LOGGER.attach(Box::leak(Box::new(serial)));
    LOGGER.attach(Box::leak(Box::new(BiosTeletype)));
    if LOGGER.install(CONFIG.log_level).is_err() {
        platform::halt();
    }
    log::info!("ssl: booting from drive {:#x}", boot_drive as u8);

    let segment_base = platform::data_segment_base();
    let gdt = GDT.pointer(&GDT as *const BootGdt as u32 + segment_base as u32);

    let mut a20 = BiosA20::new();
    let mut cpu = NativeCpuid;
    let mut mode = HardwareModeControl;
    let mut disk = BiosDisk::new(boot_drive as u8, segment_base);
    let mut e820 = BiosMemoryMap;
    let mut video = BiosVideo;
    let mut memory = SegmentMemory { segment_base };
    let mut stage = SslPlatform {
        a20: &mut a20,
        cpu: &mut cpu,
        mode: &mut mode,
        disk: &mut disk,
        e820: &mut e820,
        video: &mut video,
        memory: &mut memory,
        segment_base,
        gdt,
    };

    // SAFETY: the boot sector jumps here in real mode
    let real = unsafe { RealMode::assume() };
    ssl::run(&mut stage, real, &CONFIG, platform::enter_tsl, platform::halt)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    let mut serial = SerialPort::new(HardwarePorts, COM1);
    let mut teletype = BiosTeletype;
    let mut sinks: [&mut dyn TextSink; 2] = [&mut serial, &mut teletype];
    report_panic(info, &mut sinks);
    platform::halt()
}

//! Third Stage Loader binary
//!
//! Called by the second stage in 32-bit protected mode with flat segments;
//! the only argument is the linear address of the Boot-Info block.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;

use spin::Mutex;

use trident_bootloader::arch::x86::port::HardwarePorts;
use trident_bootloader::boot_stage::tsl::{self, TslPlatform};
use trident_bootloader::core::BootHeap;
use trident_bootloader::cpu_init::mode_transition::ProtectedMode;
use trident_bootloader::drivers::logger::{BootLogger, TextSink};
use trident_bootloader::drivers::serial::{SerialPort, COM1};
use trident_bootloader::drivers::vga::VgaText;
use trident_bootloader::kernel_if::physical::SegmentMemory;
use trident_bootloader::memory_mgmt::paging_setup::IdentityMap;
use trident_bootloader::platform::{self, HardwareModeControl};
use trident_bootloader::utils::report_panic;
use trident_bootloader::BootConfig;

const CONFIG: BootConfig = BootConfig::DEFAULT;

#[global_allocator]
static HEAP: BootHeap<{ CONFIG.heap_size }> = BootHeap::new();

static LOGGER: BootLogger = BootLogger::new();

static TABLES: Mutex<IdentityMap> = Mutex::new(IdentityMap::new());

#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.entry")]
extern "C" fn tsl_entry(boot_info: u32) -> ! {
    if HEAP.init().is_err() {
        platform::halt();
    }

    let mut serial = SerialPort::new(HardwarePorts, COM1);
    serial.init();
    LOGGER.attach(Box::leak(Box::new(serial)));
    // SAFETY: the text buffer is identity-addressable and this is its only writer
    LOGGER.attach(Box::leak(Box::new(unsafe { VgaText::hardware() })));
    if LOGGER.install(CONFIG.log_level).is_err() {
        platform::halt();
    }

    let mut ports = HardwarePorts;
    let mut mode = HardwareModeControl;
    let mut memory = SegmentMemory { segment_base: 0 };
    let mut tables = TABLES.lock();
    let mut stage = TslPlatform {
        ports: &mut ports,
        mode: &mut mode,
        memory: &mut memory,
        tables: &mut *tables,
        linear_base: 0,
    };

    // SAFETY: the second stage enters with CR0.PE set and the flat GDT loaded
    let protected = unsafe { ProtectedMode::assume() };
    tsl::run(
        &mut stage,
        protected,
        boot_info as u64,
        &CONFIG,
        platform::enter_kernel,
        platform::halt,
    )
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    let mut serial = SerialPort::new(HardwarePorts, COM1);
    // SAFETY: nothing else runs once the panic handler is reached
    let mut vga = unsafe { VgaText::hardware() };
    let mut sinks: [&mut dyn TextSink; 2] = [&mut serial, &mut vga];
    report_panic(info, &mut sinks);
    platform::halt()
}

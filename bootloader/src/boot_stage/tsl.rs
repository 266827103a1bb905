//! Third Stage Loader
//!
//! Runs in 32-bit protected mode. It links the kernel out of the archive
//! the second stage loaded, identity-maps everything the kernel needs in the
//! first 2 MiB and far-calls the kernel in long mode.

use trident_api::layout::{SSL_ADDRESS, SSL_SIZE, TSL_ADDRESS, TSL_SIZE};
use trident_api::{BootInfo, BOOT_INFO_SIZE};

use crate::acpi_support::rsdp::{find_rsdp, BIOS_AREA_END, BIOS_AREA_START};
use crate::arch::x86::PortIo;
use crate::boot_stage::{fatal, BootPhase, During, StageResult};
use crate::config::BootConfig;
use crate::cpu_init::mode_transition::{LongMode, ModeControl, ProtectedMode};
use crate::drivers::pci;
use crate::error::{BootError, Result};
use crate::kernel_if::archive::Archive;
use crate::kernel_if::image_registry::LoadedImage;
use crate::kernel_if::pe_loader::PeLoader;
use crate::kernel_if::physical::PhysicalMemory;
use crate::memory_mgmt::paging_setup::{align_page, IdentityMap, IDENTITY_LIMIT};

/// Stack handed to a kernel that does not ask for one
pub const DEFAULT_STACK_SIZE: u64 = 0x4000;

/// Hardware and memory the third stage runs against
pub struct TslPlatform<'p> {
    pub ports: &'p mut dyn PortIo,
    pub mode: &'p mut dyn ModeControl,
    pub memory: &'p mut dyn PhysicalMemory,
    pub tables: &'p mut IdentityMap,
    /// Linear base added to the page table addresses
    pub linear_base: u64,
}

/// Register state for the far call into the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TslHandoff {
    pub kernel: LoadedImage,
    pub entry: u64,
    /// Initial stack pointer; the stack occupies the pages below it
    pub stack_top: u64,
    /// Passed to the kernel in ECX
    pub boot_info: u64,
    pub pml4: u64,
    /// 0 when no RSDP was found
    pub acpi_rsdp: u64,
}

fn read_boot_info(memory: &mut dyn PhysicalMemory, address: u64) -> Result<BootInfo> {
    let stamp = memory.window(address, 4)?.read_u32(address)?;
    BootInfo::check_size(stamp)?;
    let window = memory.window(address, BOOT_INFO_SIZE as usize)?;
    Ok(BootInfo::from_bytes(window.read(address, BOOT_INFO_SIZE as usize)?)?)
}

/// `[base, top)` of the kernel stack placed after the loaded images
fn stack_region(images_end: u64, kernel: &LoadedImage) -> (u64, u64) {
    let size = match kernel.stack_commit_size {
        0 => DEFAULT_STACK_SIZE,
        size => align_page(size),
    };
    let base = align_page(images_end);
    (base, base + size)
}

fn build_identity_map(
    tables: &mut IdentityMap,
    archive_address: u64,
    images_end: u64,
    stack: (u64, u64),
) -> Result {
    tables.clear();
    tables.map_range(SSL_ADDRESS as u64, (SSL_ADDRESS + SSL_SIZE) as u64)?;
    tables.map_range(TSL_ADDRESS as u64, (TSL_ADDRESS + TSL_SIZE) as u64)?;
    tables.map_range(archive_address, align_page(images_end))?;
    tables.map_range(stack.0, stack.1)?;
    log::debug!("paging: {} pages identity mapped", tables.mapped_pages());
    Ok(())
}

/// Load the kernel and its dependencies behind the archive
///
/// Returns the kernel and the end of the last loaded image.
fn load_kernel(memory: &mut dyn PhysicalMemory, info: &BootInfo, config: &BootConfig) -> Result<(LoadedImage, u64)> {
    let archive_address = info.archive_address;
    let partition_len =
        usize::try_from(info.archive_size).map_err(|_| BootError::AddressOutOfRange(archive_address))?;

    // The partition may be larger than the archive it holds
    let archive_size = {
        let partition = memory.window(archive_address, partition_len)?.into_bytes();
        Archive::init(partition, archive_address)?.size()
    };
    let images_start = align_page(archive_address + archive_size as u64);
    let window_len = usize::try_from(IDENTITY_LIMIT.max(images_start) - archive_address)
        .map_err(|_| BootError::AddressOutOfRange(archive_address))?;

    let window = memory.window(archive_address, window_len)?;
    let (archive_window, images) = window.split_at(images_start)?;
    let archive_bytes = archive_window.into_bytes();
    let archive = Archive::init(&archive_bytes[..archive_size], archive_address)?;

    let mut loader = PeLoader::new(archive, images, config.dependency_prefix);
    let kernel = loader.load(config.kernel_path)?;
    let (start, end) = loader.memory_range();
    log::info!(
        "tsl: {} images in {:#x}..{:#x}",
        loader.images().count(),
        start,
        end
    );
    Ok((kernel, end))
}

fn locate_rsdp(memory: &mut dyn PhysicalMemory) -> Result<u64> {
    let len = (BIOS_AREA_END - BIOS_AREA_START) as usize;
    let window = memory.window(BIOS_AREA_START, len)?;
    Ok(find_rsdp(window.read(BIOS_AREA_START, len)?, BIOS_AREA_START).map_or(0, |rsdp| rsdp.address))
}

/// Run the third stage up to the long-mode switch
pub fn prepare(platform: &mut TslPlatform<'_>, boot_info_address: u64, config: &BootConfig) -> StageResult<TslHandoff> {
    let mut info = read_boot_info(&mut *platform.memory, boot_info_address).during(BootPhase::BootInfoCheck)?;

    let functions = pci::disable_all(&mut *platform.ports);
    log::info!("tsl: disabled {} PCI functions", functions);

    let archive_address = info.archive_address;
    let (kernel, images_end) = load_kernel(&mut *platform.memory, &info, config).during(BootPhase::KernelLoading)?;

    let stack = stack_region(images_end, &kernel);
    build_identity_map(&mut *platform.tables, archive_address, images_end, stack).during(BootPhase::Paging)?;
    let pml4 = platform.tables.link(platform.linear_base);

    let acpi_rsdp = locate_rsdp(&mut *platform.memory).during(BootPhase::BootInfoSetup)?;
    info.acpi_rsdp = acpi_rsdp;
    platform
        .memory
        .window(boot_info_address, BOOT_INFO_SIZE as usize)
        .and_then(|mut window| window.write(boot_info_address, &info.to_bytes()))
        .during(BootPhase::BootInfoSetup)?;

    Ok(TslHandoff {
        kernel,
        entry: kernel.entry_point,
        stack_top: stack.1,
        boot_info: boot_info_address,
        pml4,
        acpi_rsdp,
    })
}

/// Third stage main sequence
///
/// `enter_kernel` performs the far call through the 64-bit code selector;
/// `halt` stops the machine after a fatal error.
pub fn run(
    platform: &mut TslPlatform<'_>,
    protected: ProtectedMode,
    boot_info_address: u64,
    config: &BootConfig,
    enter_kernel: fn(LongMode, &TslHandoff) -> !,
    halt: fn() -> !,
) -> ! {
    match prepare(platform, boot_info_address, config) {
        Ok(handoff) => {
            log::info!(
                "tsl: entering kernel at {:#x} (stack {:#x}, boot info {:#x})",
                handoff.entry,
                handoff.stack_top,
                handoff.boot_info
            );
            let long = protected.enter_long_mode(&mut *platform.mode, handoff.pml4);
            enter_kernel(long, &handoff)
        }
        Err(err) => fatal(&err, halt),
    }
}

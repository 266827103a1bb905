//! Second Stage Loader
//!
//! Runs in real mode with the firmware still available. It enables A20,
//! switches to Unreal mode so the archive can be copied above 1 MiB, finds
//! the boot partition through the GPT, collects the memory map and leaves a
//! Boot-Info block for the Third Stage Loader.

use trident_api::MemoryMapEntry;

use crate::arch::x86::GdtPointer;
use crate::bios::e820_detection::{E820Source, MemoryMap};
use crate::boot_stage::{fatal, BootPhase, During, StageResult};
use crate::config::BootConfig;
use crate::cpu_init::a20::{enable_a20, A20Line};
use crate::cpu_init::cpuid::{check_cpu_compat, CpuidSource};
use crate::cpu_init::mode_transition::{ModeControl, ProtectedMode, RealMode, UnrealMode};
use crate::error::{BootError, Result};
use crate::firmware::disk_reader::{load_partition, DiskReader, SectorDevice};
use crate::firmware::gpt_handler::{find_partition, get_partition_array, read_gpt_header, PartitionEntry};
use crate::kernel_if::boot_info_builder::{assemble, video_from_mode_query, BootInfoBlock, VideoModeQuery};
use crate::kernel_if::physical::PhysicalMemory;

/// Firmware services and memory the second stage runs against
pub struct SslPlatform<'p> {
    pub a20: &'p mut dyn A20Line,
    pub cpu: &'p mut dyn CpuidSource,
    pub mode: &'p mut dyn ModeControl,
    pub disk: &'p mut dyn SectorDevice,
    pub e820: &'p mut dyn E820Source,
    pub video: &'p mut dyn VideoModeQuery,
    pub memory: &'p mut dyn PhysicalMemory,
    /// Linear base of the data segment heap pointers are relative to
    pub segment_base: u64,
    /// Descriptor of the stage's GDT
    pub gdt: GdtPointer,
}

/// Everything the second stage hands over
#[derive(Debug)]
pub struct SslHandoff {
    pub boot_info: BootInfoBlock,
    pub partition: PartitionEntry,
    /// Bytes copied to the archive load address
    pub archive_size: u64,
    unreal: UnrealMode,
}

impl SslHandoff {
    /// Enter protected mode; the Boot-Info block stays where it is
    pub fn enter_protected<C: ModeControl + ?Sized>(self, ctl: &mut C) -> (ProtectedMode, BootInfoBlock) {
        (self.unreal.enter_protected(ctl), self.boot_info)
    }
}

/// Window the archive partition is copied into
///
/// The partition must fit the usable region containing `load_address`.
fn archive_span(map: &MemoryMap, load_address: u64, partition: &PartitionEntry) -> Result<usize> {
    let region: &MemoryMapEntry = map
        .usable_region_containing(load_address)
        .ok_or(BootError::AddressOutOfRange(load_address))?;
    let size = partition.size_bytes();
    let end = load_address
        .checked_add(size)
        .ok_or(BootError::PartitionTooLarge)?;
    if end > region.end_address() {
        return Err(BootError::PartitionTooLarge);
    }
    usize::try_from(size).map_err(|_| BootError::PartitionTooLarge)
}

/// Run the second stage up to the protected-mode switch
///
/// The heap must already be initialized.
pub fn prepare(platform: &mut SslPlatform<'_>, real: RealMode, config: &BootConfig) -> StageResult<SslHandoff> {
    config.validate().during(BootPhase::Configuration)?;

    let a20 = enable_a20(&mut *platform.a20).during(BootPhase::A20Gate)?;
    check_cpu_compat(&mut *platform.cpu).during(BootPhase::CpuCheck)?;
    let unreal = real.enter_unreal(&mut *platform.mode, &a20, platform.gdt);

    let mut disk = DiskReader::new(&mut *platform.disk, config);
    let partition = {
        let header = read_gpt_header(&mut disk).during(BootPhase::PartitionTable)?;
        let partitions = get_partition_array(&header, &mut disk).during(BootPhase::PartitionTable)?;
        find_partition(&partitions, &config.boot_partition_type)
            .ok_or(BootError::PartitionNotFound)
            .during(BootPhase::PartitionTable)?
    };
    log::info!(
        "ssl: boot partition {} at LBA {}..={}",
        partition.unique_guid,
        partition.start_lba,
        partition.end_lba
    );

    let memory_map = MemoryMap::discover(&mut *platform.e820).during(BootPhase::MemoryDetection)?;
    memory_map.dump();

    let load_address = config.archive_load_address;
    let span = archive_span(&memory_map, load_address, &partition).during(BootPhase::ArchiveLoad)?;
    let archive_size = {
        let mut window = platform
            .memory
            .window(load_address, span)
            .during(BootPhase::ArchiveLoad)?;
        let destination = window.tail_mut(load_address).during(BootPhase::ArchiveLoad)?;
        load_partition(&mut disk, &partition, destination).during(BootPhase::ArchiveLoad)?
    } as u64;

    let video = platform.video.current_mode().map(video_from_mode_query);
    if video.is_none() {
        log::warn!("ssl: video mode query failed");
    }
    let mut boot_info = assemble(&partition.unique_guid, &memory_map, video, platform.segment_base)
        .during(BootPhase::BootInfoSetup)?;
    boot_info.set_archive(load_address, archive_size);

    Ok(SslHandoff {
        boot_info,
        partition,
        archive_size,
        unreal,
    })
}

/// Second stage main sequence
///
/// `enter_tsl` receives the protected-mode token and the linear address of
/// the Boot-Info block; `halt` stops the machine after a fatal error.
pub fn run(
    platform: &mut SslPlatform<'_>,
    real: RealMode,
    config: &BootConfig,
    enter_tsl: fn(ProtectedMode, u64) -> !,
    halt: fn() -> !,
) -> ! {
    match prepare(platform, real, config) {
        Ok(handoff) => {
            let address = handoff.boot_info.address();
            log::info!(
                "ssl: archive {} bytes at {:#x}, boot info at {:#x}",
                handoff.archive_size,
                config.archive_load_address,
                address
            );
            let (protected, _boot_info) = handoff.enter_protected(&mut *platform.mode);
            enter_tsl(protected, address)
        }
        Err(err) => fatal(&err, halt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::gpt_handler::Guid;

    fn partition(start: u64, end: u64) -> PartitionEntry {
        PartitionEntry {
            type_guid: Guid::BIOS_BOOT,
            unique_guid: Guid([7; 16]),
            start_lba: start,
            end_lba: end,
            attributes: 0,
        }
    }

    fn map() -> MemoryMap {
        let mut map = MemoryMap::new();
        map.push(MemoryMapEntry::new(0, 0x9_FC00, 1)).unwrap();
        map.push(MemoryMapEntry::new(0x10_0000, 0x10_0000, 1)).unwrap();
        map
    }

    #[test]
    fn test_archive_span_fits_region() {
        assert_eq!(archive_span(&map(), 0x10_0000, &partition(34, 34 + 99)), Ok(100 * 512));
    }

    #[test]
    fn test_archive_span_rejects_overflow() {
        // 2048 sectors = 1 MiB exactly fills the region
        assert!(archive_span(&map(), 0x10_0000, &partition(0, 2047)).is_ok());
        assert_eq!(
            archive_span(&map(), 0x10_0000, &partition(0, 2048)),
            Err(BootError::PartitionTooLarge)
        );
        assert_eq!(
            archive_span(&map(), 0xA_0000, &partition(0, 1)),
            Err(BootError::AddressOutOfRange(0xA_0000))
        );
    }
}

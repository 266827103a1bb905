//! Builders shared by the integration tests: disk images, archives, PE
//! files and in-memory stand-ins for the firmware seams.

#![allow(dead_code)]

use trident_api::MemoryMapEntry;
use trident_bootloader::arch::x86::{GdtPointer, PortIo};
use trident_bootloader::bios::e820_detection::E820Source;
use trident_bootloader::cpu_init::a20::A20Line;
use trident_bootloader::cpu_init::cpuid::{CpuidResult, CpuidSource};
use trident_bootloader::cpu_init::mode_transition::ModeControl;
use trident_bootloader::firmware::crc32::{crc32, crc32_with_zeroed};
use trident_bootloader::firmware::gpt_handler::{Guid, PartitionEntry};
use trident_bootloader::kernel_if::archive::{align_block, BLOCK_SIZE};
use trident_bootloader::kernel_if::boot_info_builder::VideoModeQuery;
use trident_bootloader::BootError;

pub const SECTOR: usize = 512;
pub const ENTRY_SIZE: usize = 128;
pub const ENTRY_COUNT: usize = 128;
pub const ARRAY_LBA: u64 = 2;
pub const FIRST_USABLE_LBA: u64 = 34;

pub const SECTION_RVA: u32 = 0x1000;
const SECTION_FILE_OFFSET: usize = 0x200;

pub fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// PE32+ file with one section at RVA 0x1000 holding `section`
pub fn pe_file(section: &[u8], virtual_size: u32, export: Option<(u32, u32)>, import: Option<(u32, u32)>) -> Vec<u8> {
    let mut file = vec![0u8; SECTION_FILE_OFFSET];
    put_u16(&mut file, 0, 0x5A4D);
    put_u32(&mut file, 0x3C, 0x80);
    put_u32(&mut file, 0x80, 0x4550);
    put_u16(&mut file, 0x84, 0x8664);
    put_u16(&mut file, 0x86, 1);
    put_u16(&mut file, 0x94, 240);
    let opt = 0x98;
    put_u16(&mut file, opt, 0x20B);
    put_u32(&mut file, opt + 16, SECTION_RVA);
    put_u32(&mut file, opt + 60, SECTION_FILE_OFFSET as u32);
    put_u64(&mut file, opt + 80, 0x2000);
    put_u32(&mut file, opt + 108, 16);
    if let Some((rva, size)) = export {
        put_u32(&mut file, opt + 112, rva);
        put_u32(&mut file, opt + 116, size);
    }
    if let Some((rva, size)) = import {
        put_u32(&mut file, opt + 120, rva);
        put_u32(&mut file, opt + 124, size);
    }
    let table = opt + 240;
    file[table..table + 5].copy_from_slice(b".text");
    put_u32(&mut file, table + 8, virtual_size);
    put_u32(&mut file, table + 12, SECTION_RVA);
    put_u32(&mut file, table + 16, section.len() as u32);
    put_u32(&mut file, table + 20, SECTION_FILE_OFFSET as u32);
    file.extend_from_slice(section);
    file
}

/// RVA of the export at ordinal index `i` in [`hal_dll`]
pub fn hal_export_rva(i: usize) -> u64 {
    0x1100 + 0x10 * i as u64
}

/// DLL exporting `HalInit` (ordinal index 0) and `HalPrint` (ordinal index 3)
pub fn hal_dll() -> Vec<u8> {
    let mut s = vec![0u8; 0x200];
    put_u32(&mut s, 16, 1);
    put_u32(&mut s, 20, 5);
    put_u32(&mut s, 24, 2);
    put_u32(&mut s, 28, 0x1040);
    put_u32(&mut s, 32, 0x1060);
    put_u32(&mut s, 36, 0x1070);
    for i in 0..5 {
        put_u32(&mut s, 0x40 + 4 * i, hal_export_rva(i) as u32);
    }
    put_u32(&mut s, 0x60, 0x1080);
    put_u32(&mut s, 0x64, 0x1090);
    put_u16(&mut s, 0x70, 0);
    put_u16(&mut s, 0x72, 3);
    s[0x80..0x88].copy_from_slice(b"HalInit\0");
    s[0x90..0x99].copy_from_slice(b"HalPrint\0");
    pe_file(&s, 0x200, Some((0x1000, 0x28)), None)
}

/// RVA of the import address table slot in [`kernel`]
pub const KERNEL_IAT_RVA: u64 = 0x1060;

/// Kernel importing `symbol` from `dll` with the given hint
pub fn kernel(dll: &str, hint: u16, symbol: &str) -> Vec<u8> {
    let mut s = vec![0u8; 0x200];
    put_u32(&mut s, 0, 0x1040);
    put_u32(&mut s, 12, 0x1080);
    put_u32(&mut s, 16, KERNEL_IAT_RVA as u32);
    put_u64(&mut s, 0x40, 0x10A0);
    put_u64(&mut s, 0x60, 0x10A0);
    s[0x80..0x80 + dll.len()].copy_from_slice(dll.as_bytes());
    put_u16(&mut s, 0xA0, hint);
    s[0xA2..0xA2 + symbol.len()].copy_from_slice(symbol.as_bytes());
    pe_file(&s, 0x800, None, Some((0x1000, 40)))
}

/// ustar archive holding `files`, terminated by two zero blocks
pub fn archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut image = Vec::new();
    for (name, data) in files {
        let mut header = [0u8; BLOCK_SIZE];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[124..136].copy_from_slice(format!("{:011o}\0", data.len()).as_bytes());
        header[257..263].copy_from_slice(b"ustar\0");
        image.extend_from_slice(&header);
        image.extend_from_slice(data);
        image.resize(align_block(image.len()), 0);
    }
    image.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
    image
}

/// Archive with a kernel importing `HalPrint` and the DLL exporting it
pub fn boot_archive() -> Vec<u8> {
    archive(&[
        ("ramfs/kernel.pe", &kernel("hal.dll", 1, "HalPrint")),
        ("ramfs/hal.dll", &hal_dll()),
    ])
}

/// Raw partition array of `ENTRY_COUNT` slots
pub fn partition_array(slots: &[Option<PartitionEntry>]) -> Vec<u8> {
    let mut array = vec![0u8; ENTRY_COUNT * ENTRY_SIZE];
    for (i, slot) in slots.iter().enumerate() {
        if let Some(entry) = slot {
            entry.write_to(&mut array[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE]);
        }
    }
    array
}

/// Primary GPT header sector describing `array`
pub fn gpt_header(array: &[u8], entries: u32, last_lba: u64) -> [u8; SECTOR] {
    let mut sector = [0u8; SECTOR];
    sector[..8].copy_from_slice(b"EFI PART");
    put_u32(&mut sector, 8, 0x0001_0000);
    put_u32(&mut sector, 12, 92);
    put_u64(&mut sector, 24, 1);
    put_u64(&mut sector, 32, last_lba);
    put_u64(&mut sector, 40, FIRST_USABLE_LBA);
    put_u64(&mut sector, 48, last_lba - 33);
    sector[56..72].copy_from_slice(&[0x5A; 16]);
    put_u64(&mut sector, 72, ARRAY_LBA);
    put_u32(&mut sector, 80, entries);
    put_u32(&mut sector, 84, ENTRY_SIZE as u32);
    put_u32(&mut sector, 88, crc32(&array[..entries as usize * ENTRY_SIZE]));
    let checksum = crc32_with_zeroed(&sector[..92], 16, 4);
    put_u32(&mut sector, 16, checksum);
    sector
}

pub const ARCHIVE_UNIQUE_GUID: Guid = Guid([0xA7; 16]);

/// GPT disk whose BIOS-boot partition holds `payload`
///
/// An EFI system partition and an empty slot precede the boot partition.
pub fn gpt_disk(payload: &[u8]) -> (Vec<u8>, PartitionEntry) {
    gpt_disk_sized(payload, payload.len().div_ceil(SECTOR))
}

/// Same disk with a `sectors`-long boot partition, payload at its start
pub fn gpt_disk_sized(payload: &[u8], sectors: usize) -> (Vec<u8>, PartitionEntry) {
    assert!(payload.len() <= sectors * SECTOR);
    let sectors = sectors.max(1) as u64;
    let boot = PartitionEntry {
        type_guid: Guid::BIOS_BOOT,
        unique_guid: ARCHIVE_UNIQUE_GUID,
        start_lba: 64,
        end_lba: 64 + sectors - 1,
        attributes: 0,
    };
    let esp = PartitionEntry {
        type_guid: Guid::EFI_SYSTEM,
        unique_guid: Guid([0x11; 16]),
        start_lba: FIRST_USABLE_LBA,
        end_lba: 63,
        attributes: 0,
    };
    let total = boot.end_lba + 34;
    let array = partition_array(&[Some(esp), None, Some(boot)]);

    let mut image = vec![0u8; total as usize * SECTOR];
    image[SECTOR..2 * SECTOR].copy_from_slice(&gpt_header(&array, ENTRY_COUNT as u32, total - 1));
    let array_at = ARRAY_LBA as usize * SECTOR;
    image[array_at..array_at + array.len()].copy_from_slice(&array);
    let payload_at = boot.start_lba as usize * SECTOR;
    image[payload_at..payload_at + payload.len()].copy_from_slice(payload);
    (image, boot)
}

/// Machine with a usable region from 1 MiB to 16 MiB
pub fn memory_map() -> Vec<MemoryMapEntry> {
    vec![
        MemoryMapEntry::new(0, 0x9_FC00, 1),
        MemoryMapEntry::new(0x9_FC00, 0x400, 2),
        MemoryMapEntry::new(0xF_0000, 0x1_0000, 2),
        MemoryMapEntry::new(0x10_0000, 0xF0_0000, 1),
    ]
}

/// E820 records served in order
pub struct ScriptedE820 {
    pub entries: Vec<MemoryMapEntry>,
    pub fail_at: Option<u32>,
}

impl E820Source for ScriptedE820 {
    fn query(&mut self, continuation: u32) -> trident_bootloader::Result<(MemoryMapEntry, u32)> {
        if self.fail_at == Some(continuation) {
            return Err(BootError::MemoryMapUnavailable);
        }
        let entry = *self
            .entries
            .get(continuation as usize)
            .ok_or(BootError::MemoryMapUnavailable)?;
        let next = continuation + 1;
        Ok((entry, if next as usize == self.entries.len() { 0 } else { next }))
    }
}

/// CPU with every feature the loader checks for
pub struct LongModeCpu {
    pub long_mode: bool,
}

impl CpuidSource for LongModeCpu {
    fn supported(&mut self) -> bool {
        true
    }

    fn cpuid(&mut self, leaf: u32) -> CpuidResult {
        let edx = match leaf {
            0x1 => 1 << 6,
            0x8000_0001 if self.long_mode => (1 << 29) | (1 << 26),
            0x8000_0001 => 1 << 26,
            _ => 0,
        };
        let eax = match leaf {
            0x0 => 0xD,
            0x8000_0000 => 0x8000_0008,
            _ => 0,
        };
        CpuidResult { eax, ebx: 0, ecx: 0, edx }
    }
}

/// A20 gate the firmware already opened
pub struct OpenGate;

impl PortIo for OpenGate {
    fn inb(&mut self, _port: u16) -> u8 {
        0
    }
    fn outb(&mut self, _port: u16, _value: u8) {}
    fn inl(&mut self, _port: u16) -> u32 {
        u32::MAX
    }
    fn outl(&mut self, _port: u16, _value: u32) {}
}

impl A20Line for OpenGate {
    fn is_enabled(&mut self) -> bool {
        true
    }
    fn bios_enable(&mut self) -> bool {
        true
    }
}

/// Port space without any PCI device behind it
pub struct EmptyBus {
    pub config_writes: usize,
}

impl PortIo for EmptyBus {
    fn inb(&mut self, _port: u16) -> u8 {
        0xFF
    }
    fn outb(&mut self, _port: u16, _value: u8) {}
    fn inl(&mut self, _port: u16) -> u32 {
        u32::MAX
    }
    fn outl(&mut self, port: u16, _value: u32) {
        if port == 0xCFC {
            self.config_writes += 1;
        }
    }
}

pub struct TextMode80x25;

impl VideoModeQuery for TextMode80x25 {
    fn current_mode(&mut self) -> Option<u16> {
        Some(0x5003)
    }
}

/// Records every privileged primitive in call order
#[derive(Default)]
pub struct Recorder {
    pub calls: Vec<String>,
}

impl ModeControl for Recorder {
    fn disable_interrupts(&mut self) {
        self.calls.push("cli".into());
    }
    fn enable_interrupts(&mut self) {
        self.calls.push("sti".into());
    }
    fn load_gdt(&mut self, pointer: &GdtPointer) {
        let limit = { pointer.limit };
        self.calls.push(format!("lgdt {}", limit));
    }
    fn enter_unreal(&mut self, data_selector: u16) {
        self.calls.push(format!("unreal {:#x}", data_selector));
    }
    fn enable_protection(&mut self) {
        self.calls.push("pe".into());
    }
    fn enable_pae(&mut self) {
        self.calls.push("pae".into());
    }
    fn load_page_table(&mut self, pml4: u64) {
        self.calls.push(format!("cr3 {:#x}", pml4));
    }
    fn enable_long_mode(&mut self) {
        self.calls.push("lme".into());
    }
    fn enable_paging(&mut self) {
        self.calls.push("pg".into());
    }
}

/// Valid ACPI 1.0 RSDP
pub fn rsdp() -> [u8; 20] {
    let mut raw = [0u8; 20];
    raw[..8].copy_from_slice(b"RSD PTR ");
    raw[9..15].copy_from_slice(b"TRIDNT");
    put_u32(&mut raw, 16, 0x7FE_1000);
    let sum = raw.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    raw[8] = 0u8.wrapping_sub(sum);
    raw
}

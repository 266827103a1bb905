// Real-mode firmware services used by the second stage
//
// LLVM reserves ESI on 32-bit x86, so calls that take a pointer in SI swap
// it through a scratch register.

use core::arch::asm;

use trident_api::layout::{BOUNCE_BUFFER_ADDRESS, BOUNCE_BUFFER_SIZE};
use trident_api::MemoryMapEntry;

use crate::arch::x86::port::HardwarePorts;
use crate::arch::x86::PortIo;
use crate::bios::e820_detection::E820Source;
use crate::cpu_init::a20::A20Line;
use crate::drivers::logger::TextSink;
use crate::error::{BootError, Result};
use crate::firmware::disk_reader::{
    DiskAddressPacket, DiskError, DiskResult, SectorDevice, MAX_SECTORS_PER_CALL, SECTOR_SIZE,
};
use crate::kernel_if::boot_info_builder::VideoModeQuery;

const SMAP: u32 = 0x534D_4150;
const E820_RECORD_SIZE: u32 = 24;

/// INT 0x13 extended reads from the boot drive
///
/// Transfers whose destination is out of reach of the firmware (above
/// 1 MiB) go through the low bounce buffer.
pub struct BiosDisk {
    drive: u8,
    segment_base: u64,
}

impl BiosDisk {
    pub fn new(drive: u8, segment_base: u64) -> Self {
        Self { drive, segment_base }
    }

    fn extended_read(&mut self, packet: &DiskAddressPacket) -> DiskResult<()> {
        let status: u16;
        let carry: u8;
        unsafe {
            asm!(
                "xchg {dap:e}, esi",
                "int 0x13",
                "setc {cf}",
                "xchg {dap:e}, esi",
                dap = inout(reg) packet as *const DiskAddressPacket as u32 => _,
                cf = out(reg_byte) carry,
                inout("ax") 0x4200u16 => status,
                in("dl") self.drive,
            );
        }
        match (carry, (status >> 8) as u8) {
            (0, 0) => Ok(()),
            (_, 0) => Err(DiskError::ReadFailed),
            (_, code) => Err(DiskError::from_code(code)),
        }
    }

    fn linear(&self, buffer: &[u8]) -> u64 {
        buffer.as_ptr() as u64 + self.segment_base
    }
}

impl SectorDevice for BiosDisk {
    fn max_sectors_per_call(&self) -> u16 {
        MAX_SECTORS_PER_CALL
    }

    fn read(&mut self, lba: u64, buffer: &mut [u8]) -> DiskResult<()> {
        let sectors = u16::try_from(buffer.len() / SECTOR_SIZE).map_err(|_| DiskError::InvalidParameters)?;
        if sectors > MAX_SECTORS_PER_CALL {
            return Err(DiskError::InvalidParameters);
        }
        let direct = u32::try_from(self.linear(buffer))
            .ok()
            .and_then(|address| DiskAddressPacket::for_linear(lba, sectors, address));
        if let Some(packet) = direct {
            return self.extended_read(&packet);
        }

        let packet = DiskAddressPacket::for_linear(lba, sectors, BOUNCE_BUFFER_ADDRESS)
            .ok_or(DiskError::InvalidParameters)?;
        self.extended_read(&packet)?;
        // Unreal mode: the bounce buffer is addressable through DS
        let bounce = unsafe {
            core::slice::from_raw_parts(
                (BOUNCE_BUFFER_ADDRESS as u64 - self.segment_base) as usize as *const u8,
                BOUNCE_BUFFER_SIZE as usize,
            )
        };
        buffer.copy_from_slice(&bounce[..buffer.len()]);
        Ok(())
    }
}

/// INT 0x15 E820 enumeration
pub struct BiosMemoryMap;

impl E820Source for BiosMemoryMap {
    fn query(&mut self, continuation: u32) -> Result<(MemoryMapEntry, u32)> {
        let mut record = MemoryMapEntry::new(0, 0, 0);
        let signature: u32;
        let next: u32;
        let carry: u8;
        unsafe {
            asm!(
                "int 0x15",
                "setc {cf}",
                cf = out(reg_byte) carry,
                inout("eax") 0xE820u32 => signature,
                inout("ebx") continuation => next,
                inout("ecx") E820_RECORD_SIZE => _,
                in("edx") SMAP,
                in("edi") &mut record as *mut MemoryMapEntry as u32,
            );
        }
        if carry != 0 || signature != SMAP {
            return Err(BootError::MemoryMapUnavailable);
        }
        Ok((record, next))
    }
}

/// A20 probing through the real-mode wrap-around plus the BIOS gate call
pub struct BiosA20 {
    ports: HardwarePorts,
}

impl BiosA20 {
    pub fn new() -> Self {
        Self { ports: HardwarePorts }
    }
}

impl Default for BiosA20 {
    fn default() -> Self {
        Self::new()
    }
}

impl PortIo for BiosA20 {
    fn inb(&mut self, port: u16) -> u8 {
        self.ports.inb(port)
    }

    fn outb(&mut self, port: u16, value: u8) {
        self.ports.outb(port, value)
    }

    fn inl(&mut self, port: u16) -> u32 {
        self.ports.inl(port)
    }

    fn outl(&mut self, port: u16, value: u32) {
        self.ports.outl(port, value)
    }
}

impl A20Line for BiosA20 {
    fn is_enabled(&mut self) -> bool {
        // 0000:0500 and FFFF:0510 alias each other while A20 is off
        let probe: u8;
        unsafe {
            asm!(
                "push fs",
                "push gs",
                "xor {seg:e}, {seg:e}",
                "mov fs, {seg:x}",
                "not {seg:e}",
                "mov gs, {seg:x}",
                "mov {low}, byte ptr fs:[0x500]",
                "mov {high}, byte ptr gs:[0x510]",
                "mov byte ptr fs:[0x500], 0x00",
                "mov byte ptr gs:[0x510], 0xFF",
                "mov {probe}, byte ptr fs:[0x500]",
                "mov byte ptr gs:[0x510], {high}",
                "mov byte ptr fs:[0x500], {low}",
                "pop gs",
                "pop fs",
                seg = out(reg) _,
                low = out(reg_byte) _,
                high = out(reg_byte) _,
                probe = out(reg_byte) probe,
            );
        }
        probe == 0x00
    }

    fn bios_enable(&mut self) -> bool {
        let status: u16;
        let carry: u8;
        unsafe {
            asm!(
                "int 0x15",
                "setc {cf}",
                cf = out(reg_byte) carry,
                inout("ax") 0x2401u16 => status,
            );
        }
        carry == 0 && status >> 8 == 0
    }
}

/// INT 0x10 AH=0x0F
pub struct BiosVideo;

impl VideoModeQuery for BiosVideo {
    fn current_mode(&mut self) -> Option<u16> {
        let ax: u16;
        let carry: u8;
        unsafe {
            asm!(
                "int 0x10",
                "setc {cf}",
                cf = out(reg_byte) carry,
                inout("ax") 0x0F00u16 => ax,
                out("bx") _,
            );
        }
        (carry == 0).then_some(ax)
    }
}

/// INT 0x10 AH=0x0E teletype output
pub struct BiosTeletype;

impl BiosTeletype {
    fn put(byte: u8) {
        unsafe {
            asm!(
                "int 0x10",
                inout("ax") 0x0E00u16 | byte as u16 => _,
                inout("bx") 0x0007u16 => _,
            );
        }
    }
}

impl TextSink for BiosTeletype {
    fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                Self::put(b'\r');
            }
            Self::put(byte);
        }
    }
}

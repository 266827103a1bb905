//! RSDP discovery
//!
//! The ACPI Root System Description Pointer sits on a 16-byte boundary in
//! the BIOS area below 1 MiB. Its first 20 bytes (the ACPI 1.0 part) sum to
//! zero modulo 256.

/// Start of the BIOS area searched for the RSDP
pub const BIOS_AREA_START: u64 = 0xE_0000;
/// End (exclusive) of the BIOS area
pub const BIOS_AREA_END: u64 = 0x10_0000;

pub const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";
const RSDP_V1_LEN: usize = 20;
const RSDP_ALIGN: usize = 16;
const REVISION_OFFSET: usize = 15;
const RSDT_OFFSET: usize = 16;

/// A located RSDP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rsdp {
    pub address: u64,
    pub revision: u8,
    pub rsdt_address: u32,
}

fn checksum_ok(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b)) == 0
}

/// Scan `region`, whose first byte is at physical `region_base`
pub fn find_rsdp(region: &[u8], region_base: u64) -> Option<Rsdp> {
    let skew = (RSDP_ALIGN - (region_base as usize % RSDP_ALIGN)) % RSDP_ALIGN;
    let found = (skew..region.len())
        .step_by(RSDP_ALIGN)
        .filter_map(|offset| region.get(offset..offset + RSDP_V1_LEN).map(|raw| (offset, raw)))
        .find(|(_, raw)| raw.starts_with(RSDP_SIGNATURE) && checksum_ok(raw));

    match found {
        Some((offset, raw)) => {
            let rsdp = Rsdp {
                address: region_base + offset as u64,
                revision: raw[REVISION_OFFSET],
                rsdt_address: u32::from_le_bytes([
                    raw[RSDT_OFFSET],
                    raw[RSDT_OFFSET + 1],
                    raw[RSDT_OFFSET + 2],
                    raw[RSDT_OFFSET + 3],
                ]),
            };
            log::info!("acpi: RSDP rev {} at {:#x}", rsdp.revision, rsdp.address);
            Some(rsdp)
        }
        None => {
            log::warn!("acpi: RSDP not found");
            None
        }
    }
}

/// Search the real BIOS area
///
/// # Safety
/// `0xE0000..0x100000` must be identity-mapped and readable.
pub unsafe fn find_rsdp_in_bios_area() -> Option<Rsdp> {
    let len = (BIOS_AREA_END - BIOS_AREA_START) as usize;
    let region = unsafe { core::slice::from_raw_parts(BIOS_AREA_START as usize as *const u8, len) };
    find_rsdp(region, BIOS_AREA_START)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn place(region: &mut [u8], offset: usize, valid: bool) {
        let raw = &mut region[offset..offset + RSDP_V1_LEN];
        raw[..8].copy_from_slice(RSDP_SIGNATURE);
        raw[9..15].copy_from_slice(b"BOCHS ");
        raw[REVISION_OFFSET] = 0;
        raw[RSDT_OFFSET..RSDT_OFFSET + 4].copy_from_slice(&0x07FE_14A5u32.to_le_bytes());
        let sum = raw.iter().fold(0u8, |s, &b| s.wrapping_add(b));
        raw[8] = 0u8.wrapping_sub(sum).wrapping_add(if valid { 0 } else { 1 });
    }

    #[test]
    fn test_finds_checksummed_pointer() {
        let mut region = vec![0u8; 0x2_0000];
        place(&mut region, 0xF6A0, false);
        place(&mut region, 0xF6B0, true);
        let rsdp = find_rsdp(&region, BIOS_AREA_START).unwrap();
        assert_eq!(rsdp.address, BIOS_AREA_START + 0xF6B0);
        assert_eq!(rsdp.rsdt_address, 0x07FE_14A5);
    }

    #[test]
    fn test_unaligned_signature_is_ignored() {
        let mut region = vec![0u8; 0x1000];
        place(&mut region, 0x108, true);
        assert_eq!(find_rsdp(&region, BIOS_AREA_START), None);
    }

    #[test]
    fn test_region_base_alignment_is_respected() {
        let mut region = vec![0u8; 0x1000];
        place(&mut region, 0x8, true);
        let rsdp = find_rsdp(&region, BIOS_AREA_START + 8).unwrap();
        assert_eq!(rsdp.address, BIOS_AREA_START + 0x10);
    }
}

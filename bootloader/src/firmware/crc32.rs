//! CRC32 (IEEE 802.3) as used by GPT headers and partition arrays

const POLYNOMIAL: u32 = 0xEDB8_8320;

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLYNOMIAL } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = make_table();

#[inline]
fn step(crc: u32, byte: u8) -> u32 {
    TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
}

/// Checksum of `bytes`
pub fn crc32(bytes: &[u8]) -> u32 {
    !bytes.iter().fold(!0u32, |crc, &b| step(crc, b))
}

/// Checksum of `bytes` as if `[offset, offset + len)` held zeroes
///
/// GPT stores the header checksum inside the header it covers.
pub fn crc32_with_zeroed(bytes: &[u8], offset: usize, len: usize) -> u32 {
    let end = offset.saturating_add(len);
    !bytes.iter().enumerate().fold(!0u32, |crc, (i, &b)| {
        let byte = if i >= offset && i < end { 0 } else { b };
        step(crc, byte)
    })
}

//! Physical memory window
//!
//! The loaders address memory by physical address. A window pairs a byte
//! slice with the physical address of its first byte and bounds-checks every
//! access, so host tests can run the same code against a plain buffer.

use core::ops::Range;

use crate::error::{BootError, Result};

/// Bounds-checked view of physical memory `[base, base + len)`
pub struct PhysicalWindow<'a> {
    base: u64,
    bytes: &'a mut [u8],
}

impl<'a> PhysicalWindow<'a> {
    pub fn new(base: u64, bytes: &'a mut [u8]) -> Self {
        Self { base, bytes }
    }

    /// Window over identity-mapped memory
    ///
    /// # Safety
    /// `[base, base + len)` must be mapped, writable and unused by anything
    /// else while the window lives.
    pub unsafe fn from_raw(base: u64, len: usize) -> PhysicalWindow<'static> {
        let bytes = unsafe { core::slice::from_raw_parts_mut(base as usize as *mut u8, len) };
        PhysicalWindow { base, bytes }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// First address past the window
    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn contains(&self, address: u64, len: u64) -> bool {
        self.range(address, len as usize).is_ok()
    }

    fn range(&self, address: u64, len: usize) -> Result<Range<usize>> {
        let start = address
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(BootError::AddressOutOfRange(address))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(BootError::AddressOutOfRange(address))?;
        Ok(start..end)
    }

    pub fn read(&self, address: u64, len: usize) -> Result<&[u8]> {
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    pub fn slice_mut(&mut self, address: u64, len: usize) -> Result<&mut [u8]> {
        let range = self.range(address, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Everything from `address` to the end of the window
    pub fn tail_mut(&mut self, address: u64) -> Result<&mut [u8]> {
        let start = self.range(address, 0)?.start;
        Ok(&mut self.bytes[start..])
    }

    pub fn write(&mut self, address: u64, data: &[u8]) -> Result {
        self.slice_mut(address, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, address: u64, len: usize, value: u8) -> Result {
        self.slice_mut(address, len)?.fill(value);
        Ok(())
    }

    pub fn read_u16(&self, address: u64) -> Result<u16> {
        let raw = self.read(address, 2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    pub fn read_u32(&self, address: u64) -> Result<u32> {
        let raw = self.read(address, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn read_u64(&self, address: u64) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read(address, 8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> Result {
        self.write(address, &value.to_le_bytes())
    }

    /// Split into `[base, address)` and `[address, end)`
    pub fn split_at(self, address: u64) -> Result<(PhysicalWindow<'a>, PhysicalWindow<'a>)> {
        let mid = self.range(address, 0)?.start;
        let base = self.base;
        let (low, high) = self.bytes.split_at_mut(mid);
        Ok((PhysicalWindow::new(base, low), PhysicalWindow::new(address, high)))
    }

    pub fn into_bytes(self) -> &'a mut [u8] {
        self.bytes
    }

    /// NUL-terminated string at `address`, without the terminator
    pub fn c_str(&self, address: u64) -> Result<&[u8]> {
        let start = self.range(address, 0)?.start;
        let tail = &self.bytes[start..];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(BootError::AddressOutOfRange(address))?;
        Ok(&tail[..len])
    }
}

/// Source of physical memory windows
pub trait PhysicalMemory {
    fn window(&mut self, base: u64, len: usize) -> Result<PhysicalWindow<'_>>;
}

impl PhysicalMemory for PhysicalWindow<'_> {
    fn window(&mut self, base: u64, len: usize) -> Result<PhysicalWindow<'_>> {
        let range = self.range(base, len)?;
        Ok(PhysicalWindow::new(base, &mut self.bytes[range]))
    }
}

/// Memory reached through a data segment based at `segment_base`
///
/// Protected mode uses a flat segment (base 0); Unreal mode keeps the
/// real-mode segment base of the running stage.
#[cfg(target_os = "none")]
pub struct SegmentMemory {
    pub segment_base: u64,
}

#[cfg(target_os = "none")]
impl PhysicalMemory for SegmentMemory {
    fn window(&mut self, base: u64, len: usize) -> Result<PhysicalWindow<'_>> {
        let offset = base
            .checked_sub(self.segment_base)
            .filter(|offset| offset.checked_add(len as u64).is_some_and(|end| end <= u32::MAX as u64 + 1))
            .ok_or(BootError::AddressOutOfRange(base))?;
        // SAFETY: the stage owns all memory outside its own image and the
        // callers never hold two windows at once.
        let bytes = unsafe { core::slice::from_raw_parts_mut(offset as usize as *mut u8, len) };
        Ok(PhysicalWindow::new(base, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_enforced() {
        let mut backing = [0u8; 64];
        let mut window = PhysicalWindow::new(0x1000, &mut backing);
        assert_eq!(window.end(), 0x1040);
        assert!(window.write_u64(0x1038, 0xDEAD_BEEF).is_ok());
        assert_eq!(window.read_u64(0x1038).unwrap(), 0xDEAD_BEEF);
        assert_eq!(window.read_u64(0x1039), Err(BootError::AddressOutOfRange(0x1039)));
        assert_eq!(window.read(0xFFF, 1), Err(BootError::AddressOutOfRange(0xFFF)));
        assert!(window.tail_mut(0x1040).unwrap().is_empty());
    }

    #[test]
    fn test_c_str() {
        let mut backing = *b"ntoskrnl.exe\0hal\0";
        let window = PhysicalWindow::new(0, &mut backing);
        assert_eq!(window.c_str(0).unwrap(), b"ntoskrnl.exe");
        assert_eq!(window.c_str(13).unwrap(), b"hal");
        let mut unterminated = *b"abc";
        let window = PhysicalWindow::new(0, &mut unterminated);
        assert!(window.c_str(0).is_err());
    }

    #[test]
    fn test_split_and_subwindows() {
        let mut backing = [0u8; 0x100];
        let mut window = PhysicalWindow::new(0x10_0000, &mut backing);
        {
            let mut sub = window.window(0x10_0010, 0x10).unwrap();
            sub.write_u64(0x10_0010, 7).unwrap();
            assert_eq!(sub.read_u64(0x10_0018), Ok(0));
            assert!(sub.read_u64(0x10_0019).is_err());
        }
        assert!(window.window(0x10_00F8, 0x10).is_err());

        let (low, high) = window.split_at(0x10_0080).unwrap();
        assert_eq!((low.base(), low.end()), (0x10_0000, 0x10_0080));
        assert_eq!((high.base(), high.end()), (0x10_0080, 0x10_0100));
        assert_eq!(low.into_bytes()[0x10], 7);
    }
}

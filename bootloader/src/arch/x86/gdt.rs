// x86 Global Descriptor Table

use bitflags::bitflags;
use core::mem::size_of;
use static_assertions::assert_eq_size;

bitflags! {
    /// Access byte of a segment descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GdtAccess: u8 {
        const ACCESSED = 1 << 0;
        const READ_WRITE = 1 << 1;
        const CONFORMING = 1 << 2;
        const EXECUTABLE = 1 << 3;
        const CODE_DATA = 1 << 4;
        const RING3 = 3 << 5;
        const PRESENT = 1 << 7;
    }
}

bitflags! {
    /// Upper nibble of the granularity byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GdtFlags: u8 {
        const LONG_MODE = 1 << 1;
        const SIZE_32 = 1 << 2;
        const GRANULARITY_4K = 1 << 3;
    }
}

/// Selector of the flat 32-bit code segment
pub const CODE32: u16 = 0x08;
/// Selector of the flat 32-bit data segment
pub const DATA32: u16 = 0x10;
/// Selector of the 64-bit code segment the kernel is entered through
pub const CODE64: u16 = 0x18;

const FLAT_LIMIT: u32 = 0xF_FFFF;

/// One 8-byte segment descriptor
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GdtEntry(u64);

impl GdtEntry {
    pub const NULL: Self = Self(0);

    pub const fn new(base: u32, limit: u32, flags: GdtFlags, access: GdtAccess) -> Self {
        let raw = (limit as u64 & 0xFFFF)
            | ((base as u64 & 0xFF_FFFF) << 16)
            | ((access.bits() as u64) << 40)
            | (((limit as u64 >> 16) & 0x0F) << 48)
            | (((flags.bits() as u64) & 0x0F) << 52)
            | (((base as u64 >> 24) & 0xFF) << 56);
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub fn base(&self) -> u32 {
        (((self.0 >> 16) & 0xFF_FFFF) | (((self.0 >> 56) & 0xFF) << 24)) as u32
    }

    pub fn limit(&self) -> u32 {
        ((self.0 & 0xFFFF) | (((self.0 >> 48) & 0x0F) << 16)) as u32
    }

    pub fn access(&self) -> GdtAccess {
        GdtAccess::from_bits_retain((self.0 >> 40) as u8)
    }

    pub fn flags(&self) -> GdtFlags {
        GdtFlags::from_bits_retain(((self.0 >> 52) & 0x0F) as u8)
    }
}

/// GDTR image: limit then linear base
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GdtPointer {
    pub limit: u16,
    pub base: u32,
}

assert_eq_size!(GdtPointer, [u8; 6]);

impl GdtPointer {
    pub fn new(table_linear_address: u32, count: usize) -> Self {
        Self {
            limit: (size_of::<GdtEntry>() * count - 1) as u16,
            base: table_linear_address,
        }
    }
}

/// Descriptor table shared by the Unreal-mode switch, the protected-mode
/// stage and the long-mode kernel entry
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootGdt {
    pub entries: [GdtEntry; 4],
}

impl BootGdt {
    pub const fn new() -> Self {
        let code = GdtAccess::PRESENT
            .union(GdtAccess::CODE_DATA)
            .union(GdtAccess::EXECUTABLE)
            .union(GdtAccess::READ_WRITE);
        let data = GdtAccess::PRESENT
            .union(GdtAccess::CODE_DATA)
            .union(GdtAccess::READ_WRITE);
        let flat32 = GdtFlags::GRANULARITY_4K.union(GdtFlags::SIZE_32);
        let long = GdtFlags::GRANULARITY_4K.union(GdtFlags::LONG_MODE);
        Self {
            entries: [
                GdtEntry::NULL,
                GdtEntry::new(0, FLAT_LIMIT, flat32, code),
                GdtEntry::new(0, FLAT_LIMIT, flat32, data),
                GdtEntry::new(0, FLAT_LIMIT, long, code),
            ],
        }
    }

    /// GDTR value for this table located at `linear_address`
    pub fn pointer(&self, linear_address: u32) -> GdtPointer {
        GdtPointer::new(linear_address, self.entries.len())
    }
}

impl Default for BootGdt {
    fn default() -> Self {
        Self::new()
    }
}

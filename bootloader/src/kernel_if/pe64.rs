//! PE32+ header views
//!
//! Field decoding for the parts of the Portable Executable format the loader
//! touches: DOS stub, COFF file header, PE32+ optional header, section table
//! and the import/export directories. Everything is read little-endian from
//! byte slices with bounds checks; nothing is reinterpreted in place.

use crate::error::{BootError, Result};
use crate::kernel_if::physical::PhysicalWindow;

pub const DOS_MAGIC: u16 = 0x5A4D;
pub const PE_SIGNATURE: u32 = 0x0000_4550;
pub const PE32_PLUS_MAGIC: u16 = 0x020B;

pub const DIRECTORY_EXPORT: usize = 0;
pub const DIRECTORY_IMPORT: usize = 1;
pub const MAX_DIRECTORIES: usize = 16;

pub const SECTION_HEADER_SIZE: usize = 40;
pub const IMPORT_DESCRIPTOR_SIZE: u64 = 20;
pub const EXPORT_DIRECTORY_SIZE: usize = 40;

const DOS_HEADER_SIZE: usize = 0x40;
const LFANEW_OFFSET: usize = 0x3C;
const FILE_HEADER_SIZE: usize = 20;
const DIRECTORIES_OFFSET: usize = 112;

const TRUNCATED: BootError = BootError::InvalidPeImage("Truncated PE image");

fn field<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    let raw = offset
        .checked_add(N)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(TRUNCATED)?;
    let mut out = [0u8; N];
    out.copy_from_slice(raw);
    Ok(out)
}

fn le_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    field(bytes, offset).map(u16::from_le_bytes)
}

fn le_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    field(bytes, offset).map(u32::from_le_bytes)
}

fn le_u64(bytes: &[u8], offset: usize) -> Result<u64> {
    field(bytes, offset).map(u64::from_le_bytes)
}

/// RVA and size of one optional-header data directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.size != 0
    }

    /// Whether `rva` points inside this directory
    pub fn contains(&self, rva: u32) -> bool {
        rva >= self.rva && (rva - self.rva) < self.size
    }
}

/// Section table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    fn parse(raw: &[u8]) -> Result<Self> {
        Ok(Self {
            name: field(raw, 0)?,
            virtual_size: le_u32(raw, 8)?,
            virtual_address: le_u32(raw, 12)?,
            size_of_raw_data: le_u32(raw, 16)?,
            pointer_to_raw_data: le_u32(raw, 20)?,
            characteristics: le_u32(raw, 36)?,
        })
    }

    /// Bytes the section occupies once mapped
    ///
    /// Some linkers leave the virtual size at zero; the raw size stands in.
    pub fn extent(&self) -> u32 {
        if self.virtual_size == 0 {
            self.size_of_raw_data
        } else {
            self.virtual_size
        }
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }
}

/// Validated headers of a PE32+ file
#[derive(Debug, Clone)]
pub struct PeHeaders<'a> {
    bytes: &'a [u8],
    pub machine: u16,
    pub number_of_sections: u16,
    pub entry_point_rva: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub stack_commit_size: u64,
    directories: [DataDirectory; MAX_DIRECTORIES],
    directory_count: usize,
    section_table: usize,
}

impl<'a> PeHeaders<'a> {
    /// Check the three magic values and decode the headers of `bytes`
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < DOS_HEADER_SIZE || le_u16(bytes, 0)? != DOS_MAGIC {
            return Err(BootError::InvalidPeImage("Missing DOS header magic"));
        }
        let pe = le_u32(bytes, LFANEW_OFFSET)? as usize;
        if le_u32(bytes, pe)? != PE_SIGNATURE {
            return Err(BootError::InvalidPeImage("Missing PE signature"));
        }

        let file_header = pe + 4;
        let machine = le_u16(bytes, file_header)?;
        let number_of_sections = le_u16(bytes, file_header + 2)?;
        let size_of_optional_header = le_u16(bytes, file_header + 16)? as usize;

        let opt = file_header + FILE_HEADER_SIZE;
        if le_u16(bytes, opt)? != PE32_PLUS_MAGIC {
            return Err(BootError::InvalidPeImage("Not a PE32+ image"));
        }

        let declared = le_u32(bytes, opt + 108)? as usize;
        let directory_count = declared.min(MAX_DIRECTORIES);
        if DIRECTORIES_OFFSET + directory_count * 8 > size_of_optional_header {
            return Err(BootError::InvalidPeImage("Data directories exceed optional header"));
        }
        let mut directories = [DataDirectory::default(); MAX_DIRECTORIES];
        for (index, directory) in directories.iter_mut().take(directory_count).enumerate() {
            let at = opt + DIRECTORIES_OFFSET + index * 8;
            *directory = DataDirectory {
                rva: le_u32(bytes, at)?,
                size: le_u32(bytes, at + 4)?,
            };
        }

        let section_table = opt + size_of_optional_header;
        let table_end = section_table + number_of_sections as usize * SECTION_HEADER_SIZE;
        if table_end > bytes.len() {
            return Err(BootError::InvalidPeImage("Section table exceeds file"));
        }

        let size_of_headers = le_u32(bytes, opt + 60)?;
        if size_of_headers as usize > bytes.len() {
            return Err(BootError::InvalidPeImage("Headers exceed file"));
        }

        Ok(Self {
            bytes,
            machine,
            number_of_sections,
            entry_point_rva: le_u32(bytes, opt + 16)?,
            image_base: le_u64(bytes, opt + 24)?,
            section_alignment: le_u32(bytes, opt + 32)?,
            file_alignment: le_u32(bytes, opt + 36)?,
            size_of_image: le_u32(bytes, opt + 56)?,
            size_of_headers,
            stack_commit_size: le_u64(bytes, opt + 80)?,
            directories,
            directory_count,
            section_table,
        })
    }

    /// The file the headers were parsed from
    pub fn file(&self) -> &'a [u8] {
        self.bytes
    }

    /// Data directory `index`, if declared and non-empty
    pub fn directory(&self, index: usize) -> Option<DataDirectory> {
        if index >= self.directory_count {
            return None;
        }
        Some(self.directories[index]).filter(DataDirectory::is_present)
    }

    pub fn sections(&self) -> impl Iterator<Item = SectionHeader> + '_ {
        (0..self.number_of_sections as usize).filter_map(move |index| {
            let start = self.section_table + index * SECTION_HEADER_SIZE;
            SectionHeader::parse(&self.bytes[start..start + SECTION_HEADER_SIZE]).ok()
        })
    }

    /// Span of the mapped image: headers plus the furthest section end
    pub fn mapped_size(&self) -> u64 {
        self.sections()
            .map(|s| s.virtual_address as u64 + s.extent() as u64)
            .fold(self.size_of_headers as u64, u64::max)
    }
}

/// Import directory entry, read from a mapped image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportDescriptor {
    pub import_lookup_rva: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub import_address_rva: u32,
}

impl ImportDescriptor {
    pub fn read(memory: &PhysicalWindow<'_>, address: u64) -> Result<Self> {
        Ok(Self {
            import_lookup_rva: memory.read_u32(address)?,
            time_date_stamp: memory.read_u32(address + 4)?,
            forwarder_chain: memory.read_u32(address + 8)?,
            name_rva: memory.read_u32(address + 12)?,
            import_address_rva: memory.read_u32(address + 16)?,
        })
    }

    /// The all-zero entry closing the directory
    pub fn is_terminator(&self) -> bool {
        self.import_lookup_rva == 0
    }
}

/// Export directory table, read from a mapped image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDirectory {
    pub name_rva: u32,
    pub ordinal_base: u32,
    pub address_table_count: u32,
    pub number_of_name_pointers: u32,
    pub address_table_rva: u32,
    pub name_pointer_rva: u32,
    pub ordinal_table_rva: u32,
}

impl ExportDirectory {
    pub fn read(memory: &PhysicalWindow<'_>, address: u64) -> Result<Self> {
        let raw = memory.read(address, EXPORT_DIRECTORY_SIZE)?;
        Ok(Self {
            name_rva: le_u32(raw, 12)?,
            ordinal_base: le_u32(raw, 16)?,
            address_table_count: le_u32(raw, 20)?,
            number_of_name_pointers: le_u32(raw, 24)?,
            address_table_rva: le_u32(raw, 28)?,
            name_pointer_rva: le_u32(raw, 32)?,
            ordinal_table_rva: le_u32(raw, 36)?,
        })
    }
}

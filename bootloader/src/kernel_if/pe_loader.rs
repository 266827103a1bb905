//! PE32+ loader and import linker
//!
//! Images are taken from the flat archive, mapped back to back into a
//! physical window and linked by name against the export tables of their
//! dependencies. Dependencies are loaded on demand, so a dependency's
//! exports always exist before its importer is bound. The image registry
//! memoizes loads by archive path.
//!
//! Images are not relocated: each one runs at the address the placer gives
//! it.

use core::str;

use crate::error::{name_of, BootError, Result};
use crate::kernel_if::archive::Archive;
use crate::kernel_if::image_registry::{BumpPlacer, ImageName, ImageRegistry, LoadedImage};
use crate::kernel_if::pe64::{
    DataDirectory, ExportDirectory, ImportDescriptor, PeHeaders, DIRECTORY_EXPORT, DIRECTORY_IMPORT,
    IMPORT_DESCRIPTOR_SIZE,
};
use crate::kernel_if::physical::PhysicalWindow;

/// Import lookup entries with this bit set name an ordinal
pub const ORDINAL_FLAG: u64 = 1 << 63;

const THUNK_SIZE: u64 = 8;

/// Copy headers and sections of `headers` to `load_address`
///
/// The whole mapped span is zeroed first, so the tail of every section past
/// its raw data reads as zero. Returns the mapped size.
pub fn map_image(headers: &PeHeaders<'_>, memory: &mut PhysicalWindow<'_>, load_address: u64) -> Result<u64> {
    let file = headers.file();
    let size = headers.mapped_size();
    let span = usize::try_from(size).map_err(|_| BootError::InvalidPeImage("Image too large"))?;
    let dest = memory.slice_mut(load_address, span)?;
    dest.fill(0);

    let header_len = headers.size_of_headers as usize;
    dest[..header_len].copy_from_slice(&file[..header_len]);

    for section in headers.sections() {
        let copy = section.size_of_raw_data.min(section.extent()) as usize;
        let from = section.pointer_to_raw_data as usize;
        let src = file
            .get(from..from + copy)
            .ok_or(BootError::InvalidPeImage("Section data exceeds file"))?;
        let at = section.virtual_address as usize;
        dest[at..at + copy].copy_from_slice(src);
        log::trace!(
            "pe: section {:<8} va={:#x} raw={:#x} extent={:#x}",
            section.name_str(),
            section.virtual_address,
            section.size_of_raw_data,
            section.extent()
        );
    }
    Ok(size)
}

/// One import address table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportThunk<'n> {
    /// Still pointing at a hint/name pair of the importer
    Unresolved { hint: u16, name: &'n [u8] },
    /// Bound to an absolute address in the exporter
    Resolved { address: u64 },
}

impl<'n> ImportThunk<'n> {
    /// Decode the unbound slot value `raw` of the image at `image_base`
    pub fn decode(memory: &'n PhysicalWindow<'_>, image_base: u64, raw: u64) -> Result<Self> {
        if raw & ORDINAL_FLAG != 0 {
            return Err(BootError::OrdinalImport);
        }
        let hint_name = image_base + (raw & 0xFFFF_FFFF);
        Ok(ImportThunk::Unresolved {
            hint: memory.read_u16(hint_name)?,
            name: memory.c_str(hint_name + 2)?,
        })
    }

    /// Slot value once bound
    pub fn encode(&self) -> Option<u64> {
        match *self {
            ImportThunk::Resolved { address } => Some(address),
            ImportThunk::Unresolved { .. } => None,
        }
    }
}

/// Export tables of a loaded image
#[derive(Debug, Clone, Copy)]
pub struct ExportTable {
    base: u64,
    directory: DataDirectory,
    table: ExportDirectory,
}

impl ExportTable {
    pub fn open(memory: &PhysicalWindow<'_>, image: &LoadedImage) -> Result<Self> {
        let directory = image
            .export_directory
            .ok_or_else(|| BootError::MissingExportTable(name_of(image.name.as_str())))?;
        let table = ExportDirectory::read(memory, image.load_address + directory.rva as u64)?;
        Ok(Self {
            base: image.load_address,
            directory,
            table,
        })
    }

    fn name_at<'m>(&self, memory: &'m PhysicalWindow<'_>, index: u32) -> Result<&'m [u8]> {
        let pointer = self.base + self.table.name_pointer_rva as u64 + 4 * index as u64;
        let rva = memory.read_u32(pointer)?;
        memory.c_str(self.base + rva as u64)
    }

    fn index_of(&self, memory: &PhysicalWindow<'_>, hint: u16, name: &[u8]) -> Result<Option<u32>> {
        let count = self.table.number_of_name_pointers;
        if (hint as u32) < count && self.name_at(memory, hint as u32)? == name {
            return Ok(Some(hint as u32));
        }
        for index in 0..count {
            if self.name_at(memory, index)? == name {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Absolute address of the export called `name`
    ///
    /// The name-pointer entry at `hint` is tried first, then every entry.
    pub fn resolve(&self, memory: &PhysicalWindow<'_>, hint: u16, name: &[u8]) -> Result<u64> {
        let symbol = || name_of(str::from_utf8(name).unwrap_or("?"));
        let index = self
            .index_of(memory, hint, name)?
            .ok_or_else(|| BootError::SymbolNotFound(symbol()))?;

        let ordinal_entry = self.base + self.table.ordinal_table_rva as u64 + 2 * index as u64;
        let ordinal = memory.read_u16(ordinal_entry)? as u32;
        if ordinal >= self.table.address_table_count {
            return Err(BootError::InvalidPeImage("Export ordinal out of range"));
        }
        let rva = memory.read_u32(self.base + self.table.address_table_rva as u64 + 4 * ordinal as u64)?;
        if self.directory.contains(rva) {
            return Err(BootError::ForwardedExport(symbol()));
        }
        Ok(self.base + rva as u64)
    }
}

/// Loads images out of an archive into a physical window
pub struct PeLoader<'a, 'm> {
    archive: Archive<'a>,
    memory: PhysicalWindow<'m>,
    registry: ImageRegistry,
    placer: BumpPlacer,
    dependency_prefix: &'static str,
}

impl<'a, 'm> PeLoader<'a, 'm> {
    /// Images are placed from the start of `memory` upwards; imported DLL
    /// names are looked up as `dependency_prefix` + name.
    pub fn new(archive: Archive<'a>, memory: PhysicalWindow<'m>, dependency_prefix: &'static str) -> Self {
        let start = memory.base();
        Self {
            archive,
            memory,
            registry: ImageRegistry::new(),
            placer: BumpPlacer::new(start),
            dependency_prefix,
        }
    }

    /// Load the image stored under `name` together with its dependencies
    ///
    /// Loading a name twice returns the first load.
    pub fn load(&mut self, name: &str) -> Result<LoadedImage> {
        if let Some(image) = self.registry.get(name) {
            return Ok(*image);
        }
        if self.registry.is_full() {
            return Err(BootError::LoadTableFull);
        }
        let key = ImageName::from(name).map_err(|_| BootError::FileNotFound(name_of(name)))?;
        let entry = self
            .archive
            .lookup(name)
            .ok_or_else(|| BootError::FileNotFound(name_of(name)))?;
        let headers = PeHeaders::parse(entry.data)?;

        let load_address = self.placer.next_address();
        let image_size = map_image(&headers, &mut self.memory, load_address)?;
        self.placer.place(image_size)?;

        // Registered before its imports so cyclic imports terminate
        let image = *self.registry.insert(LoadedImage {
            name: key,
            load_address,
            image_size,
            entry_point: load_address + headers.entry_point_rva as u64,
            stack_commit_size: headers.stack_commit_size,
            export_directory: headers.directory(DIRECTORY_EXPORT),
        })?;
        log::info!(
            "pe: loaded {} at {:#x}..{:#x} entry={:#x}",
            name,
            image.load_address,
            image.end_address(),
            image.entry_point
        );

        if let Some(imports) = headers.directory(DIRECTORY_IMPORT) {
            self.bind_imports(&image, imports)?;
        }
        Ok(image)
    }

    fn bind_imports(&mut self, image: &LoadedImage, imports: DataDirectory) -> Result {
        let mut descriptor_address = image.load_address + imports.rva as u64;
        loop {
            let descriptor = ImportDescriptor::read(&self.memory, descriptor_address)?;
            if descriptor.is_terminator() {
                return Ok(());
            }

            let path = self.dependency_path(image.load_address + descriptor.name_rva as u64)?;
            let dll = self.load(&path)?;
            let exports = ExportTable::open(&self.memory, &dll)?;

            let mut slot = image.load_address + descriptor.import_address_rva as u64;
            loop {
                let raw = self.memory.read_u64(slot)?;
                if raw == 0 {
                    break;
                }
                let bound = match ImportThunk::decode(&self.memory, image.load_address, raw)? {
                    ImportThunk::Unresolved { hint, name } => {
                        let address = exports.resolve(&self.memory, hint, name)?;
                        log::debug!(
                            "pe: {} imports {}!{} = {:#x}",
                            image.name,
                            dll.name,
                            str::from_utf8(name).unwrap_or("?"),
                            address
                        );
                        ImportThunk::Resolved { address }
                    }
                    resolved => resolved,
                };
                if let Some(address) = bound.encode() {
                    self.memory.write_u64(slot, address)?;
                }
                slot += THUNK_SIZE;
            }
            descriptor_address += IMPORT_DESCRIPTOR_SIZE;
        }
    }

    fn dependency_path(&self, name_address: u64) -> Result<ImageName> {
        let dll = str::from_utf8(self.memory.c_str(name_address)?)
            .map_err(|_| BootError::InvalidPeImage("Import name is not UTF-8"))?;
        let mut path = ImageName::new();
        if path.try_push_str(self.dependency_prefix).is_err() || path.try_push_str(dll).is_err() {
            return Err(BootError::FileNotFound(name_of(dll)));
        }
        Ok(path)
    }

    /// `(first load address, end of the last loaded image)`
    pub fn memory_range(&self) -> (u64, u64) {
        self.placer.range()
    }

    pub fn image(&self, name: &str) -> Option<&LoadedImage> {
        self.registry.get(name)
    }

    pub fn images(&self) -> impl Iterator<Item = &LoadedImage> {
        self.registry.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_if::archive::{align_block, BLOCK_SIZE};
    use alloc::format;
    use alloc::vec;
    use alloc::vec::Vec;

    const SECTION_RVA: u32 = 0x1000;
    const SECTION_FILE_OFFSET: usize = 0x200;
    const WINDOW_BASE: u64 = 0x12_0000;

    fn put_u16(buf: &mut [u8], at: usize, value: u16) {
        buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], at: usize, value: u32) {
        buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(buf: &mut [u8], at: usize, value: u64) {
        buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// PE32+ file with one section at RVA 0x1000 holding `section`
    fn pe_file(section: &[u8], virtual_size: u32, export: Option<(u32, u32)>, import: Option<(u32, u32)>) -> Vec<u8> {
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
        file[table..table + 5].copy_from_slice(b".data");
        put_u32(&mut file, table + 8, virtual_size);
        put_u32(&mut file, table + 12, SECTION_RVA);
        put_u32(&mut file, table + 16, section.len() as u32);
        put_u32(&mut file, table + 20, SECTION_FILE_OFFSET as u32);
        file.extend_from_slice(section);
        file
    }

    /// DLL exporting `HalInit` (ordinal index 0) and `HalPrint` (ordinal index 3)
    fn hal_dll() -> Vec<u8> {
        let mut s = vec![0u8; 0x200];
        put_u32(&mut s, 16, 1);
        put_u32(&mut s, 20, 5);
        put_u32(&mut s, 24, 2);
        put_u32(&mut s, 28, 0x1040);
        put_u32(&mut s, 32, 0x1060);
        put_u32(&mut s, 36, 0x1070);
        for (i, rva) in [0x1100u32, 0x1110, 0x1120, 0x1130, 0x1140].iter().enumerate() {
            put_u32(&mut s, 0x40 + 4 * i, *rva);
        }
        put_u32(&mut s, 0x60, 0x1080);
        put_u32(&mut s, 0x64, 0x1090);
        put_u16(&mut s, 0x70, 0);
        put_u16(&mut s, 0x72, 3);
        s[0x80..0x88].copy_from_slice(b"HalInit\0");
        s[0x90..0x99].copy_from_slice(b"HalPrint\0");
        pe_file(&s, 0x200, Some((0x1000, 0x28)), None)
    }

    /// Kernel importing `symbol` from `dll` with the given hint
    fn kernel(dll: &str, hint: u16, symbol: &str, thunk: u64) -> Vec<u8> {
        let mut s = vec![0u8; 0x200];
        put_u32(&mut s, 0, 0x1040);
        put_u32(&mut s, 12, 0x1080);
        put_u32(&mut s, 16, 0x1060);
        put_u64(&mut s, 0x40, thunk);
        put_u64(&mut s, 0x60, thunk);
        s[0x80..0x80 + dll.len()].copy_from_slice(dll.as_bytes());
        put_u16(&mut s, 0xA0, hint);
        s[0xA2..0xA2 + symbol.len()].copy_from_slice(symbol.as_bytes());
        pe_file(&s, 0x800, None, Some((0x1000, 40)))
    }

    fn archive(files: &[(&str, &[u8])]) -> Vec<u8> {
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

    fn slot_after_load(kernel_file: &[u8]) -> Result<(u64, u64)> {
        let files = archive(&[("ramfs/kernel.pe", kernel_file), ("ramfs/hal.dll", &hal_dll())]);
        let archive = Archive::init(&files, 0x10_0000)?;
        let mut backing = vec![0u8; 0x1_0000];
        let mut loader = PeLoader::new(archive, PhysicalWindow::new(WINDOW_BASE, &mut backing), "ramfs/");
        let kernel = loader.load("ramfs/kernel.pe")?;
        let hal = *loader.image("ramfs/hal.dll").ok_or(BootError::PartitionNotFound)?;
        let slot = loader.memory.read_u64(kernel.load_address + 0x1060)?;
        Ok((slot, hal.load_address))
    }

    #[test]
    fn test_import_binds_to_ordinal_three_export() {
        let (slot, hal_base) = slot_after_load(&kernel("hal.dll", 1, "HalPrint", 0x10A0)).unwrap();
        assert_eq!(slot, hal_base + 0x1130);
    }

    #[test]
    fn test_hint_miss_falls_back_to_scan() {
        let hinted = slot_after_load(&kernel("hal.dll", 1, "HalPrint", 0x10A0)).unwrap();
        let stale = slot_after_load(&kernel("hal.dll", 0, "HalPrint", 0x10A0)).unwrap();
        let wild = slot_after_load(&kernel("hal.dll", 900, "HalPrint", 0x10A0)).unwrap();
        assert_eq!(hinted, stale);
        assert_eq!(hinted, wild);
    }

    #[test]
    fn test_images_are_packed_back_to_back() {
        let files = archive(&[
            ("ramfs/kernel.pe", &kernel("hal.dll", 1, "HalPrint", 0x10A0)),
            ("ramfs/hal.dll", &hal_dll()),
        ]);
        let archive = Archive::init(&files, 0x10_0000).unwrap();
        let mut backing = vec![0u8; 0x1_0000];
        let mut loader = PeLoader::new(archive, PhysicalWindow::new(WINDOW_BASE, &mut backing), "ramfs/");
        let kernel = loader.load("ramfs/kernel.pe").unwrap();

        assert_eq!(kernel.load_address, WINDOW_BASE);
        assert_eq!(kernel.image_size, 0x1800);
        assert_eq!(kernel.entry_point, WINDOW_BASE + 0x1000);
        assert_eq!(kernel.stack_commit_size, 0x2000);
        let hal = *loader.image("ramfs/hal.dll").unwrap();
        assert_eq!(hal.load_address, kernel.end_address());
        assert_eq!(loader.memory_range(), (WINDOW_BASE, hal.end_address()));

        let again = loader.load("ramfs/hal.dll").unwrap();
        assert_eq!(again, hal);
        assert_eq!(loader.images().count(), 2);
    }

    #[test]
    fn test_bss_tail_is_zeroed() {
        let files = archive(&[("ramfs/kernel.pe", &kernel("hal.dll", 1, "HalPrint", 0x10A0)), ("ramfs/hal.dll", &hal_dll())]);
        let archive = Archive::init(&files, 0x10_0000).unwrap();
        let mut backing = vec![0xAAu8; 0x1_0000];
        let mut loader = PeLoader::new(archive, PhysicalWindow::new(WINDOW_BASE, &mut backing), "ramfs/");
        let kernel = loader.load("ramfs/kernel.pe").unwrap();
        let bss = loader.memory.read(kernel.load_address + 0x1200, 0x600).unwrap();
        assert!(bss.iter().all(|&b| b == 0));
        let headers = loader.memory.read(kernel.load_address, 2).unwrap();
        assert_eq!(headers, b"MZ");
    }

    #[test]
    fn test_import_failures() {
        assert_eq!(
            slot_after_load(&kernel("hal.dll", 0, "HalMissing", 0x10A0)),
            Err(BootError::SymbolNotFound(name_of("HalMissing")))
        );
        assert_eq!(
            slot_after_load(&kernel("hal.dll", 0, "HalPrint", ORDINAL_FLAG | 3)),
            Err(BootError::OrdinalImport)
        );
        assert_eq!(
            slot_after_load(&kernel("acpi.dll", 0, "HalPrint", 0x10A0)),
            Err(BootError::FileNotFound(name_of("ramfs/acpi.dll")))
        );
    }

    #[test]
    fn test_dependency_without_exports() {
        let files = archive(&[
            ("ramfs/kernel.pe", &kernel("hal.dll", 0, "HalPrint", 0x10A0)),
            ("ramfs/hal.dll", &pe_file(&[0u8; 0x10], 0x10, None, None)),
        ]);
        let archive = Archive::init(&files, 0x10_0000).unwrap();
        let mut backing = vec![0u8; 0x1_0000];
        let mut loader = PeLoader::new(archive, PhysicalWindow::new(WINDOW_BASE, &mut backing), "ramfs/");
        assert_eq!(
            loader.load("ramfs/kernel.pe"),
            Err(BootError::MissingExportTable(name_of("ramfs/hal.dll")))
        );
    }

    #[test]
    fn test_image_outside_window_is_rejected() {
        let files = archive(&[("ramfs/hal.dll", &hal_dll())]);
        let archive = Archive::init(&files, 0x10_0000).unwrap();
        let mut backing = vec![0u8; 0x800];
        let mut loader = PeLoader::new(archive, PhysicalWindow::new(WINDOW_BASE, &mut backing), "ramfs/");
        assert_eq!(loader.load("ramfs/hal.dll"), Err(BootError::AddressOutOfRange(WINDOW_BASE)));
        assert_eq!(loader.load("ramfs/none.dll"), Err(BootError::FileNotFound(name_of("ramfs/none.dll"))));
    }
}

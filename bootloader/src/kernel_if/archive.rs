//! Flat archive reader
//!
//! The boot partition holds a ustar-style archive: 512-byte headers, each
//! followed by its payload padded to 512 bytes. The walk stops at the
//! first block without the `ustar` magic.

use crate::error::{BootError, Result};

/// Header and padding granularity
pub const BLOCK_SIZE: usize = 512;

const NAME_LEN: usize = 100;
const SIZE_OFFSET: usize = 124;
const SIZE_LEN: usize = 12;
const MAGIC_OFFSET: usize = 257;
const MAGIC: &[u8; 5] = b"ustar";

/// Round up to the archive block size
pub const fn align_block(value: usize) -> usize {
    value.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Decode an octal size field terminated by NUL or space
pub fn parse_octal(field: &[u8]) -> Result<usize> {
    let digits = field.iter().skip_while(|&&b| b == b' ');
    let mut value: usize = 0;
    for &b in digits {
        match b {
            b'0'..=b'7' => {
                value = value
                    .checked_mul(8)
                    .and_then(|v| v.checked_add((b - b'0') as usize))
                    .ok_or(BootError::InvalidArchive("Archive size field overflows"))?;
            }
            0 | b' ' => break,
            _ => return Err(BootError::InvalidArchive("Invalid archive size field")),
        }
    }
    Ok(value)
}

/// End of the payload and start of the next header for an entry at `offset`
fn entry_bounds(offset: usize, size: usize) -> Result<(usize, usize)> {
    let overflow = BootError::InvalidArchive("entry size overflow");
    let start = offset.checked_add(BLOCK_SIZE).ok_or(overflow)?;
    let end = start.checked_add(size).ok_or(overflow)?;
    let next = size
        .checked_next_multiple_of(BLOCK_SIZE)
        .and_then(|padded| start.checked_add(padded))
        .ok_or(overflow)?;
    Ok((end, next))
}

fn has_magic(header: &[u8]) -> bool {
    header.len() >= BLOCK_SIZE && &header[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()] == MAGIC
}

fn stored_name(header: &[u8]) -> &[u8] {
    let field = &header[..NAME_LEN];
    let len = field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    &field[..len]
}

/// One file of the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveEntry<'a> {
    pub name: &'a [u8],
    pub data: &'a [u8],
    /// Physical address of the first data byte
    pub address: u64,
}

impl<'a> ArchiveEntry<'a> {
    pub fn name_str(&self) -> Option<&'a str> {
        core::str::from_utf8(self.name).ok()
    }
}

/// Validated view of an in-memory archive
#[derive(Debug, Clone, Copy)]
pub struct Archive<'a> {
    image: &'a [u8],
    base: u64,
    size: usize,
}

impl<'a> Archive<'a> {
    /// Walk the headers of the archive at physical address `base`
    ///
    /// `image` may extend past the archive; the walk determines the real
    /// size.
    pub fn init(image: &'a [u8], base: u64) -> Result<Self> {
        let mut offset = 0;
        let mut files = 0;
        while let Some(header) = image.get(offset..offset + BLOCK_SIZE) {
            if !has_magic(header) {
                break;
            }
            let size = parse_octal(&header[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN])?;
            let (end, next) = entry_bounds(offset, size)?;
            if end > image.len() {
                return Err(BootError::InvalidArchive("Archive entry exceeds image"));
            }
            offset = next.min(image.len());
            files += 1;
        }
        log::info!("archive: {} files, {} bytes at {:#x}", files, offset, base);
        Ok(Self {
            image: &image[..offset],
            base,
            size: offset,
        })
    }

    /// Bytes covered by headers and payloads
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// First physical address past the archive
    pub fn end_address(&self) -> u64 {
        self.base + self.size as u64
    }

    pub fn entries(&self) -> Entries<'a> {
        Entries {
            image: self.image,
            base: self.base,
            offset: 0,
        }
    }

    /// Find a file by its exact stored name
    pub fn lookup(&self, name: &str) -> Option<ArchiveEntry<'a>> {
        self.entries().find(|entry| entry.name == name.as_bytes())
    }
}

/// Iterator over the files of an [`Archive`]
pub struct Entries<'a> {
    image: &'a [u8],
    base: u64,
    offset: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = ArchiveEntry<'a>;

    fn next(&mut self) -> Option<ArchiveEntry<'a>> {
        let header = self.image.get(self.offset..self.offset + BLOCK_SIZE)?;
        let size = parse_octal(&header[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN]).ok()?;
        let (end, next) = entry_bounds(self.offset, size).ok()?;
        let start = self.offset + BLOCK_SIZE;
        let data = self.image.get(start..end)?;
        let entry = ArchiveEntry {
            name: stored_name(header),
            data,
            address: self.base + start as u64,
        };
        self.offset = next;
        Some(entry)
    }
}

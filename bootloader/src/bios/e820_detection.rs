//! E820 Memory Detection via BIOS INT 0x15
//!
//! Enumerates the system memory map using the E820h interface. Entries are
//! kept in the order the firmware reports them, which is not necessarily
//! address order.

use alloc::vec::Vec;

use trident_api::{MemoryMapEntry, MemoryRegionType};

use crate::error::{BootError, Result};

/// Source of E820 records
pub trait E820Source {
    /// Fetch the record for `continuation` (0 for the first one)
    ///
    /// Returns the record and the next continuation value; 0 means the
    /// record was the last one.
    fn query(&mut self, continuation: u32) -> Result<(MemoryMapEntry, u32)>;
}

/// Memory map in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMap {
    entries: Vec<MemoryMapEntry>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Run the E820 enumeration to completion
    ///
    /// Any failure discards everything collected so far.
    pub fn discover<S: E820Source + ?Sized>(source: &mut S) -> Result<Self> {
        let mut map = Self::new();
        let mut continuation = 0u32;
        loop {
            let (entry, next) = source
                .query(continuation)
                .map_err(|_| BootError::MemoryMapUnavailable)?;
            map.push(entry)?;
            if next == 0 {
                break;
            }
            continuation = next;
        }
        log::info!(
            "e820: {} entries, {} KiB usable",
            map.len(),
            map.usable_bytes() / 1024
        );
        Ok(map)
    }

    /// Append an entry
    pub fn push(&mut self, entry: MemoryMapEntry) -> Result {
        self.entries
            .try_reserve(1)
            .map_err(|_| BootError::OutOfMemory)?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryMapEntry> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[MemoryMapEntry] {
        &self.entries
    }

    /// Get total usable RAM in bytes
    pub fn usable_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.is_usable())
            .map(|e| e.limit)
            .sum()
    }

    /// Usable region containing `address`, if any
    pub fn usable_region_containing(&self, address: u64) -> Option<&MemoryMapEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_usable())
            .find(|e| address >= e.base && address < e.end_address())
    }

    /// Log every entry at debug level
    pub fn dump(&self) {
        for entry in &self.entries {
            log::debug!(
                "e820: base={:#018x} limit={:#018x} type={} ({}) acpi={}",
                entry.base,
                entry.limit,
                entry.region_type,
                MemoryRegionType::from_raw(entry.region_type).name(),
                entry.acpi_extended_attributes
            );
        }
    }
}

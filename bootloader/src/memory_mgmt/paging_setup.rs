// Identity paging for the long-mode hand-off

use x86_64::structures::paging::PageTableFlags;

use crate::error::{BootError, Result};

pub const PAGE_SIZE: u64 = 0x1000;
/// Everything the loader maps lives below this address (one page table)
pub const IDENTITY_LIMIT: u64 = ENTRIES as u64 * PAGE_SIZE;

const ENTRIES: usize = 512;
const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

pub const fn align_page(value: u64) -> u64 {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// One 4 KiB paging structure
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageTable {
    entries: [u64; ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        Self { entries: [0; ENTRIES] }
    }

    pub fn clear(&mut self) {
        self.entries.fill(0);
    }

    pub fn entry(&self, index: usize) -> (u64, PageTableFlags) {
        let raw = self.entries[index];
        (raw & ADDRESS_MASK, PageTableFlags::from_bits_truncate(raw))
    }

    fn set(&mut self, index: usize, address: u64, flags: PageTableFlags) {
        self.entries[index] = (address & ADDRESS_MASK) | flags.bits();
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Four-level identity map of the first 2 MiB with 4 KiB pages
#[repr(C)]
#[derive(Default)]
pub struct IdentityMap {
    pml4: PageTable,
    pdpt: PageTable,
    pd: PageTable,
    pt: PageTable,
}

impl IdentityMap {
    pub const fn new() -> Self {
        Self {
            pml4: PageTable::new(),
            pdpt: PageTable::new(),
            pd: PageTable::new(),
            pt: PageTable::new(),
        }
    }

    pub fn clear(&mut self) {
        self.pml4.clear();
        self.pdpt.clear();
        self.pd.clear();
        self.pt.clear();
    }

    /// Identity-map every page touching `[start, end)`
    pub fn map_range(&mut self, start: u64, end: u64) -> Result {
        let end = align_page(end);
        if end > IDENTITY_LIMIT {
            return Err(BootError::PageMapOverflow);
        }
        let mut page = start & !(PAGE_SIZE - 1);
        while page < end {
            self.pt
                .set((page / PAGE_SIZE) as usize, page, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
            page += PAGE_SIZE;
        }
        log::trace!("paging: mapped {:#x}..{:#x}", start & !(PAGE_SIZE - 1), end);
        Ok(())
    }

    pub fn is_mapped(&self, address: u64) -> bool {
        address < IDENTITY_LIMIT
            && self.pt.entry((address / PAGE_SIZE) as usize).1.contains(PageTableFlags::PRESENT)
    }

    pub fn mapped_pages(&self) -> usize {
        self.pt.entries.iter().filter(|&&raw| raw != 0).count()
    }

    /// Chain the upper levels to the page table and return the PML4 address
    ///
    /// `linear_base` is added to every table's address; it is 0 once
    /// segmentation is flat.
    pub fn link(&mut self, linear_base: u64) -> u64 {
        let address_of = |table: &PageTable| table as *const PageTable as u64 + linear_base;
        let upper = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        let pt = address_of(&self.pt);
        let pd = address_of(&self.pd);
        let pdpt = address_of(&self.pdpt);
        self.pd.set(0, pt, upper);
        self.pdpt.set(0, pd, upper);
        self.pml4.set(0, pdpt, upper);
        address_of(&self.pml4)
    }

    pub fn pml4(&self) -> &PageTable {
        &self.pml4
    }

    pub fn page_table(&self) -> &PageTable {
        &self.pt
    }
}

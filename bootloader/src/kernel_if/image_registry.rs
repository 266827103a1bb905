//! Loaded image bookkeeping
//!
//! A bounded name → image table that doubles as the de-duplication cache for
//! dependency loading, plus the bump placer handing out load addresses.

use arrayvec::{ArrayString, ArrayVec};

use crate::error::{BootError, Result};
use crate::kernel_if::pe64::DataDirectory;

/// Images one boot can load (kernel plus dependencies)
pub const MAX_IMAGES: usize = 16;
/// Longest archive path an image can be registered under
pub const IMAGE_NAME_CAPACITY: usize = 256;

pub type ImageName = ArrayString<IMAGE_NAME_CAPACITY>;

/// A PE image mapped into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub name: ImageName,
    pub load_address: u64,
    pub image_size: u64,
    /// Absolute entry point address
    pub entry_point: u64,
    pub stack_commit_size: u64,
    pub export_directory: Option<DataDirectory>,
}

impl LoadedImage {
    pub fn end_address(&self) -> u64 {
        self.load_address + self.image_size
    }
}

/// Registry of loaded images, in load order
#[derive(Debug, Default)]
pub struct ImageRegistry {
    images: ArrayVec<LoadedImage, MAX_IMAGES>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self {
            images: ArrayVec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LoadedImage> {
        self.images.iter().find(|image| image.name.as_str() == name)
    }

    pub fn insert(&mut self, image: LoadedImage) -> Result<&LoadedImage> {
        let index = self.images.len();
        self.images
            .try_push(image)
            .map_err(|_| BootError::LoadTableFull)?;
        Ok(&self.images[index])
    }

    pub fn is_full(&self) -> bool {
        self.images.is_full()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadedImage> {
        self.images.iter()
    }
}

/// Packs images back to back: each starts where the previous one ended
#[derive(Debug, Clone, Copy)]
pub struct BumpPlacer {
    start: u64,
    next: u64,
}

impl BumpPlacer {
    pub fn new(start: u64) -> Self {
        Self { start, next: start }
    }

    pub fn next_address(&self) -> u64 {
        self.next
    }

    /// Reserve `size` bytes and return their start
    pub fn place(&mut self, size: u64) -> Result<u64> {
        let address = self.next;
        self.next = address
            .checked_add(size)
            .ok_or(BootError::AddressOutOfRange(address))?;
        Ok(address)
    }

    /// `(first load address, end of the last placement)`
    pub fn range(&self) -> (u64, u64) {
        (self.start, self.next)
    }
}

//! First-fit block allocator for the loader heap
//!
//! The arena is one intrusive, doubly-linked list of blocks in address
//! order. Every block starts with a 16-byte header immediately followed by
//! its payload, so the overhead of each allocation is fixed:
//!
//! ```text
//! | hdr | payload ... | hdr | payload ... | hdr | payload ...        |
//!   ^ offset 0         ^ next              ^ next
//! ```
//!
//! Links are byte offsets from the arena base rather than raw pointers.
//! Allocation failure is reported as `None`; the allocator itself never
//! panics on exhaustion.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crate::error::{BootError, Result};

/// Size of the header preceding every payload
pub const HEADER_SIZE: usize = 16;
/// Payload granularity and smallest payload a split may leave behind
pub const MIN_PAYLOAD: usize = 16;
/// Alignment of every payload address
pub const BLOCK_ALIGN: usize = 16;

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
struct BlockHeader {
    size: u32,
    next: u32,
    prev: u32,
    free: u32,
}

static_assertions::assert_eq_size!(BlockHeader, [u8; HEADER_SIZE]);

/// Snapshot of one block, as reported by [`BlockAllocator::blocks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header from the arena base
    pub offset: usize,
    /// Payload size in bytes
    pub size: usize,
    pub free: bool,
}

impl BlockInfo {
    /// Offset of the first byte past this block
    pub fn end(&self) -> usize {
        self.offset + HEADER_SIZE + self.size
    }
}

#[inline]
fn align16(value: usize) -> Option<usize> {
    Some(value.checked_add(BLOCK_ALIGN - 1)? & !(BLOCK_ALIGN - 1))
}

/// First-fit heap over a caller-provided arena
pub struct BlockAllocator<'a> {
    base: NonNull<u8>,
    len: usize,
    max_free: usize,
    _arena: PhantomData<&'a mut [u8]>,
}

impl<'a> BlockAllocator<'a> {
    /// Set up a single free block covering the whole arena
    ///
    /// The start is rounded up to 16 bytes and the usable length down to a
    /// multiple of 16.
    pub fn init(arena: &'a mut [u8]) -> Result<Self> {
        // SAFETY: the slice is exclusively borrowed for 'a.
        unsafe { Self::from_raw(arena.as_mut_ptr(), arena.len()) }
    }

    /// Set up an allocator over raw memory
    ///
    /// # Safety
    /// `start..start + len` must be writable memory that nothing else uses
    /// for as long as the allocator (or any pointer it hands out) lives.
    pub unsafe fn from_raw(start: *mut u8, len: usize) -> Result<Self> {
        let skew = start.align_offset(BLOCK_ALIGN);
        if skew >= len {
            return Err(BootError::OutOfMemory);
        }
        let usable = (len - skew) & !(BLOCK_ALIGN - 1);
        if usable < HEADER_SIZE + MIN_PAYLOAD || usable > NIL as usize {
            return Err(BootError::OutOfMemory);
        }
        let base = NonNull::new(unsafe { start.add(skew) }).ok_or(BootError::OutOfMemory)?;

        let mut allocator = Self {
            base,
            len: usable,
            max_free: usable - HEADER_SIZE,
            _arena: PhantomData,
        };
        allocator.write(
            0,
            BlockHeader {
                size: (usable - HEADER_SIZE) as u32,
                next: NIL,
                prev: NIL,
                free: 1,
            },
        );
        Ok(allocator)
    }

    /// Usable arena length after alignment
    pub fn arena_size(&self) -> usize {
        self.len
    }

    /// Address of the first header
    pub fn base(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Largest payload a single allocation can currently get
    pub fn max_free(&self) -> usize {
        self.max_free
    }

    /// Check whether `ptr` lies inside the arena
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + self.len
    }

    fn read(&self, offset: u32) -> BlockHeader {
        // SAFETY: offsets always name a header inside the arena and are
        // 16-byte aligned relative to a 16-byte aligned base.
        unsafe { self.base.as_ptr().add(offset as usize).cast::<BlockHeader>().read() }
    }

    fn write(&mut self, offset: u32, header: BlockHeader) {
        // SAFETY: see `read`.
        unsafe {
            self.base
                .as_ptr()
                .add(offset as usize)
                .cast::<BlockHeader>()
                .write(header)
        }
    }

    fn payload(&self, offset: u32) -> NonNull<u8> {
        // SAFETY: the payload directly follows an in-arena header.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset as usize + HEADER_SIZE)) }
    }

    fn header_of(&self, ptr: NonNull<u8>) -> u32 {
        (ptr.as_ptr() as usize - self.base.as_ptr() as usize - HEADER_SIZE) as u32
    }

    /// Carve a free block of `size` payload bytes right after `after`
    fn carve(&mut self, after: u32, size: usize) -> u32 {
        let mut prev = self.read(after);
        let offset = after + (HEADER_SIZE as u32) + prev.size;
        let block = BlockHeader {
            size: size as u32,
            next: prev.next,
            prev: after,
            free: 1,
        };
        prev.next = offset;
        self.write(after, prev);
        self.write(offset, block);
        if block.next != NIL {
            let mut next = self.read(block.next);
            next.prev = offset;
            self.write(block.next, next);
        }
        offset
    }

    /// Fold `down` into the block preceding it
    fn merge(&mut self, up: u32, down: u32) -> u32 {
        let lower = self.read(down);
        let mut upper = self.read(up);
        upper.size += HEADER_SIZE as u32 + lower.size;
        upper.next = lower.next;
        self.write(up, upper);
        if lower.next != NIL {
            let mut next = self.read(lower.next);
            next.prev = up;
            self.write(lower.next, next);
        }
        up
    }

    fn refresh_max_free(&mut self) {
        self.max_free = self
            .blocks()
            .filter(|block| block.free)
            .map(|block| block.size)
            .max()
            .unwrap_or(0);
    }

    /// Allocate `count` bytes, rounded up to 16
    pub fn allocate(&mut self, count: usize) -> Option<NonNull<u8>> {
        let count = align16(count.max(MIN_PAYLOAD))?;
        if count > self.max_free {
            return None;
        }

        let mut offset = 0;
        let mut header = loop {
            if offset == NIL {
                return None;
            }
            let header = self.read(offset);
            if header.free != 0 && header.size as usize >= count {
                break header;
            }
            offset = header.next;
        };

        let left = header.size as usize - count;
        header.free = 0;
        if left < HEADER_SIZE + MIN_PAYLOAD {
            self.write(offset, header);
        } else {
            header.size = count as u32;
            self.write(offset, header);
            self.carve(offset, left - HEADER_SIZE);
        }

        self.refresh_max_free();
        Some(self.payload(offset))
    }

    /// Resize an allocation
    ///
    /// Shrinking stays in place and returns the trailing space to the free
    /// list. Growing moves the data to a fresh block.
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator and not released.
    pub unsafe fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let new_size = align16(new_size.max(MIN_PAYLOAD))?;
        let offset = self.header_of(ptr);
        let mut header = self.read(offset);
        let size = header.size as usize;

        if size > new_size {
            let left = size - new_size;
            if left < HEADER_SIZE + MIN_PAYLOAD {
                return Some(ptr);
            }
            header.size = new_size as u32;
            self.write(offset, header);
            let tail = self.carve(offset, left - HEADER_SIZE);
            let after = self.read(tail).next;
            if after != NIL && self.read(after).free != 0 {
                self.merge(tail, after);
            }
            self.refresh_max_free();
            Some(ptr)
        } else if size < new_size {
            let moved = self.allocate(new_size)?;
            // SAFETY: both payloads are live, distinct blocks of at least `size` bytes.
            unsafe {
                ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), size);
                self.release(ptr);
            }
            Some(moved)
        } else {
            Some(ptr)
        }
    }

    /// Return an allocation to the free list, coalescing left then right
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator and not released.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        let mut offset = self.header_of(ptr);
        let mut header = self.read(offset);
        header.free = 1;
        self.write(offset, header);

        if header.prev != NIL && self.read(header.prev).free != 0 {
            offset = self.merge(header.prev, offset);
        }
        let next = self.read(offset).next;
        if next != NIL && self.read(next).free != 0 {
            offset = self.merge(offset, next);
        }

        let size = self.read(offset).size as usize;
        if size > self.max_free {
            self.max_free = size;
        }
    }

    /// Payload size of a live allocation
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator and not released.
    pub unsafe fn size_of(&self, ptr: NonNull<u8>) -> usize {
        self.read(self.header_of(ptr)).size as usize
    }

    /// Walk every block in address order
    pub fn blocks(&self) -> Blocks<'_, 'a> {
        Blocks {
            allocator: self,
            cursor: 0,
        }
    }

    /// Log the block list at debug level
    pub fn dump(&self) {
        log::debug!(
            "heap: base={:p} size={} max_free={} header={}",
            self.base.as_ptr(),
            self.len,
            self.max_free,
            HEADER_SIZE
        );
        for (index, block) in self.blocks().enumerate() {
            log::debug!(
                "  block {}: offset={:#x} size={} free={}",
                index,
                block.offset,
                block.size,
                block.free
            );
        }
    }
}

/// Iterator over the blocks of a [`BlockAllocator`]
pub struct Blocks<'h, 'a> {
    allocator: &'h BlockAllocator<'a>,
    cursor: u32,
}

impl Iterator for Blocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cursor == NIL {
            return None;
        }
        let header = self.allocator.read(self.cursor);
        let info = BlockInfo {
            offset: self.cursor as usize,
            size: header.size as usize,
            free: header.free != 0,
        };
        self.cursor = header.next;
        Some(info)
    }
}

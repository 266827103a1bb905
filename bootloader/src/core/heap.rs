//! Global allocator backed by the block allocator
//!
//! The loader is single-threaded and never services interrupts while the
//! heap is in use, so the allocator state lives in an `UnsafeCell` without
//! a lock.

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};

use super::allocator::{BlockAllocator, BLOCK_ALIGN};
use crate::error::{BootError, Result};

/// Heap over a statically reserved arena of `N` bytes
pub struct BootHeap<const N: usize> {
    arena: UnsafeCell<[u8; N]>,
    inner: UnsafeCell<Option<BlockAllocator<'static>>>,
}

// SAFETY: the loader runs exactly one thread of control.
unsafe impl<const N: usize> Sync for BootHeap<N> {}

impl<const N: usize> BootHeap<N> {
    /// Create an uninitialized heap
    pub const fn new() -> Self {
        Self {
            arena: UnsafeCell::new([0; N]),
            inner: UnsafeCell::new(None),
        }
    }

    /// Establish the initial free block
    ///
    /// Calling it again resets the heap, invalidating every allocation.
    pub fn init(&'static self) -> Result {
        // SAFETY: the arena is owned by this 'static heap and only handed to
        // the block allocator; single-threaded access.
        let allocator = unsafe { BlockAllocator::from_raw(self.arena.get().cast::<u8>(), N)? };
        log::debug!("heap: {} bytes at {:p}", allocator.arena_size(), allocator.base());
        unsafe { *self.inner.get() = Some(allocator) };
        Ok(())
    }

    /// Run `f` against the underlying allocator
    pub fn with<R>(&self, f: impl FnOnce(&mut BlockAllocator<'static>) -> R) -> Result<R> {
        // SAFETY: single-threaded and never reentered from `f`'s callers.
        let inner = unsafe { &mut *self.inner.get() };
        inner.as_mut().map(f).ok_or(BootError::OutOfMemory)
    }

    /// Largest allocation currently possible
    pub fn max_free(&self) -> usize {
        self.with(|heap| heap.max_free()).unwrap_or(0)
    }
}

impl<const N: usize> Default for BootHeap<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for BootHeap<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > BLOCK_ALIGN {
            return ptr::null_mut();
        }
        self.with(|heap| heap.allocate(layout.size()))
            .ok()
            .flatten()
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            let _ = self.with(|heap| unsafe { heap.release(ptr) });
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > BLOCK_ALIGN {
            return ptr::null_mut();
        }
        match NonNull::new(ptr) {
            Some(ptr) => self
                .with(|heap| unsafe { heap.reallocate(ptr, new_size) })
                .ok()
                .flatten()
                .map_or(ptr::null_mut(), NonNull::as_ptr),
            None => unsafe { self.alloc(Layout::from_size_align_unchecked(new_size, layout.align())) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn leaked<const N: usize>() -> &'static BootHeap<N> {
        Box::leak(Box::new(BootHeap::<N>::new()))
    }

    #[test]
    fn test_uninitialized_heap_fails_allocation() {
        let heap = leaked::<256>();
        let ptr = unsafe { heap.alloc(Layout::from_size_align(16, 8).unwrap()) };
        assert!(ptr.is_null());
        assert_eq!(heap.max_free(), 0);
    }

    #[test]
    fn test_global_alloc_round_trip() {
        let heap = leaked::<1024>();
        heap.init().unwrap();
        let layout = Layout::from_size_align(100, 8).unwrap();
        let ptr = unsafe { heap.alloc(layout) };
        assert!(!ptr.is_null());
        let grown = unsafe { heap.realloc(ptr, layout, 300) };
        assert!(!grown.is_null());
        unsafe { heap.dealloc(grown, Layout::from_size_align(300, 8).unwrap()) };
        assert_eq!(heap.max_free(), heap.with(|h| h.arena_size()).unwrap() - 16);
    }

    #[test]
    fn test_overaligned_layout_rejected() {
        let heap = leaked::<1024>();
        heap.init().unwrap();
        let ptr = unsafe { heap.alloc(Layout::from_size_align(64, 64).unwrap()) };
        assert!(ptr.is_null());
    }
}

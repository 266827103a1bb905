//! Core - loader heap

pub mod allocator;
pub mod heap;

pub use heap::BootHeap;

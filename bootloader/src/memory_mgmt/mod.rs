//! Memory Management - identity paging

pub mod paging_setup;

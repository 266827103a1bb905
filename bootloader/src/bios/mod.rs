//! BIOS Layer - memory map discovery

pub mod e820_detection;

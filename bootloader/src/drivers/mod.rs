//! Device Drivers - log sinks, serial, VGA text, PCI

pub mod logger;
pub mod pci;
pub mod serial;
pub mod vga;

pub use logger::{BootLogger, TextSink};

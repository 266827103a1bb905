//! x86 architecture support shared by both loader stages

pub mod gdt;
pub mod port;

pub use gdt::{BootGdt, GdtAccess, GdtEntry, GdtFlags, GdtPointer};
pub use port::PortIo;

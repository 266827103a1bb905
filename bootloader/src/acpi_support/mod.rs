//! ACPI support

pub mod rsdp;

pub use rsdp::{find_rsdp, Rsdp};

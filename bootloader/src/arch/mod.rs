//! Architecture support - x86 descriptors and port I/O

pub mod x86;

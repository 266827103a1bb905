//! Utility Library - panic reporting

pub mod error_recovery;

pub use error_recovery::{report_panic, write_panic_report};

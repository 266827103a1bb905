//! CPU Initialization - A20, feature checks, mode transitions

pub mod a20;
pub mod cpuid;
pub mod mode_transition;

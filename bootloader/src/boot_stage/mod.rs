//! Boot Stage Orchestration
//!
//! Drives the Second Stage Loader (real/unreal mode) and the Third Stage
//! Loader (protected mode) through their fixed sequence of phases. Every
//! failure is tagged with the phase it happened in, reported once and then
//! the machine halts; nothing is retried.

use core::fmt;

use crate::error::{BootError, Result};

pub mod ssl;
pub mod tsl;

/// Boot phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    Configuration,
    A20Gate,
    CpuCheck,
    PartitionTable,
    MemoryDetection,
    ArchiveLoad,
    BootInfoSetup,
    BootInfoCheck,
    KernelLoading,
    Paging,
}

impl BootPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration",
            Self::A20Gate => "A20 Gate",
            Self::CpuCheck => "CPU Check",
            Self::PartitionTable => "Partition Table",
            Self::MemoryDetection => "Memory Detection",
            Self::ArchiveLoad => "Archive Load",
            Self::BootInfoSetup => "Boot Info Setup",
            Self::BootInfoCheck => "Boot Info Check",
            Self::KernelLoading => "Kernel Loading",
            Self::Paging => "Paging",
        }
    }
}

/// A boot error and the phase that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageError {
    pub phase: BootPhase,
    pub error: BootError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase.as_str(), self.error)
    }
}

pub type StageResult<T> = core::result::Result<T, StageError>;

/// Attach a [`BootPhase`] to a boot result
pub trait During<T> {
    fn during(self, phase: BootPhase) -> StageResult<T>;
}

impl<T> During<T> for Result<T> {
    fn during(self, phase: BootPhase) -> StageResult<T> {
        self.map_err(|error| StageError { phase, error })
    }
}

/// Report `err` and stop the machine
pub fn fatal(err: &StageError, halt: fn() -> !) -> ! {
    log::error!("{}", err);
    halt()
}

//! Boot Logger
//!
//! Backend for the `log` facade. Every record is rendered once per attached
//! sink as `[LEVEL] target: message`.

use core::fmt::{self, Write};

use arrayvec::ArrayVec;
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::error::{BootError, Result};

/// Upper bound on attached sinks
pub const MAX_SINKS: usize = 4;

/// Destination for rendered log lines
pub trait TextSink: Send {
    fn write_str(&mut self, text: &str);
}

pub(crate) struct SinkWriter<'s>(pub(crate) &'s mut dyn TextSink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

pub struct BootLogger {
    sinks: Mutex<ArrayVec<&'static mut dyn TextSink, MAX_SINKS>>,
    level: Mutex<LevelFilter>,
}

impl BootLogger {
    pub const fn new() -> Self {
        Self {
            sinks: Mutex::new(ArrayVec::new_const()),
            level: Mutex::new(LevelFilter::Info),
        }
    }

    /// Returns false once all slots are taken
    pub fn attach(&self, sink: &'static mut dyn TextSink) -> bool {
        self.sinks.lock().try_push(sink).is_ok()
    }

    pub fn set_level(&self, level: LevelFilter) {
        *self.level.lock() = level;
        log::set_max_level(level);
    }

    pub fn level(&self) -> LevelFilter {
        *self.level.lock()
    }

    /// Register as the global logger
    pub fn install(&'static self, level: LevelFilter) -> Result {
        log::set_logger(self).map_err(|_| BootError::ConfigurationError("Logger already installed"))?;
        self.set_level(level);
        Ok(())
    }
}

impl Default for BootLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for BootLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *self.level.lock()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut sinks = self.sinks.lock();
        for sink in sinks.iter_mut() {
            let mut out = SinkWriter(&mut **sink);
            let _ = writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

//! Panic reporting
//!
//! A panic in either stage is terminal. The report is written straight to
//! the sinks the panicking stage owns, bypassing the logger whose lock may
//! be held by the code that panicked.

use core::fmt::{Display, Write};
use core::panic::Location;

use crate::drivers::logger::{SinkWriter, TextSink};

/// Write the panic banner, location and message to `sink`
pub fn write_panic_report(sink: &mut dyn TextSink, location: Option<&Location<'_>>, message: &dyn Display) {
    sink.write_str("\n=== BOOTLOADER PANIC ===\n");
    sink.write_str("Location: ");
    match location {
        Some(location) => {
            sink.write_str(location.file());
            sink.write_str(":");
            sink.write_str(itoa::Buffer::new().format(location.line()));
        }
        None => sink.write_str("unknown location"),
    }
    sink.write_str("\nMessage: ");
    let _ = write!(SinkWriter(sink), "{}", message);
    sink.write_str("\n");
}

/// Report `info` on every sink
pub fn report_panic(info: &core::panic::PanicInfo<'_>, sinks: &mut [&mut dyn TextSink]) {
    let message = info.message();
    for sink in sinks.iter_mut() {
        write_panic_report(&mut **sink, info.location(), &message);
    }
}

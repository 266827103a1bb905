//! A20 gate
//!
//! Memory above 1 MiB is only reachable once the A20 address line is
//! enabled. Three methods are tried in turn, re-checking the wrap-around
//! after each one.

use crate::arch::x86::PortIo;
use crate::error::{BootError, Result};

const KBC_DATA: u16 = 0x60;
const KBC_STATUS: u16 = 0x64;
const KBC_COMMAND: u16 = 0x64;
const SYSTEM_CONTROL_A: u16 = 0x92;

const KBC_OUTPUT_FULL: u8 = 1 << 0;
const KBC_INPUT_FULL: u8 = 1 << 1;

const KBC_DISABLE_KEYBOARD: u8 = 0xAD;
const KBC_ENABLE_KEYBOARD: u8 = 0xAE;
const KBC_READ_OUTPUT_PORT: u8 = 0xD0;
const KBC_WRITE_OUTPUT_PORT: u8 = 0xD1;

const A20_BIT: u8 = 1 << 1;

/// Firmware side of the A20 gate
pub trait A20Line: PortIo {
    /// Whether addresses above 1 MiB no longer wrap
    fn is_enabled(&mut self) -> bool;
    /// INT 15h AX=2401; false when the BIOS reports failure
    fn bios_enable(&mut self) -> bool;
}

/// How A20 ended up enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A20Method {
    AlreadyEnabled,
    Bios,
    KeyboardController,
    FastGate,
}

/// Proof that the A20 line is on
#[derive(Debug)]
pub struct A20Enabled {
    method: A20Method,
}

impl A20Enabled {
    pub fn method(&self) -> A20Method {
        self.method
    }
}

fn wait_input_empty<P: PortIo + ?Sized>(ports: &mut P) {
    while ports.inb(KBC_STATUS) & KBC_INPUT_FULL != 0 {
        core::hint::spin_loop();
    }
}

fn wait_output_full<P: PortIo + ?Sized>(ports: &mut P) {
    while ports.inb(KBC_STATUS) & KBC_OUTPUT_FULL == 0 {
        core::hint::spin_loop();
    }
}

fn keyboard_controller<P: PortIo + ?Sized>(ports: &mut P) {
    wait_input_empty(ports);
    ports.outb(KBC_COMMAND, KBC_DISABLE_KEYBOARD);

    wait_input_empty(ports);
    ports.outb(KBC_COMMAND, KBC_READ_OUTPUT_PORT);

    wait_output_full(ports);
    let output = ports.inb(KBC_DATA);

    wait_input_empty(ports);
    ports.outb(KBC_COMMAND, KBC_WRITE_OUTPUT_PORT);

    wait_input_empty(ports);
    ports.outb(KBC_DATA, output | A20_BIT);

    wait_input_empty(ports);
    ports.outb(KBC_COMMAND, KBC_ENABLE_KEYBOARD);

    wait_input_empty(ports);
}

fn fast_gate<P: PortIo + ?Sized>(ports: &mut P) {
    let value = ports.inb(SYSTEM_CONTROL_A);
    ports.outb(SYSTEM_CONTROL_A, value | A20_BIT);
}

fn try_methods<L: A20Line + ?Sized>(line: &mut L) -> Option<A20Method> {
    if line.is_enabled() {
        return Some(A20Method::AlreadyEnabled);
    }
    if line.bios_enable() && line.is_enabled() {
        return Some(A20Method::Bios);
    }
    keyboard_controller(line);
    if line.is_enabled() {
        return Some(A20Method::KeyboardController);
    }
    fast_gate(line);
    if line.is_enabled() {
        return Some(A20Method::FastGate);
    }
    None
}

/// Enable the A20 line
pub fn enable_a20<L: A20Line + ?Sized>(line: &mut L) -> Result<A20Enabled> {
    let Some(method) = try_methods(line) else {
        log::error!("a20: all methods failed");
        return Err(BootError::A20Unavailable);
    };
    log::debug!("a20: enabled ({:?})", method);
    Ok(A20Enabled { method })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86::port::fake::FakePorts;

    /// Gate that opens when the A20 bit is written to `opens_on`
    struct Gate {
        ports: FakePorts,
        bios_works: bool,
        enabled: bool,
        opens_on: Option<u16>,
    }

    impl PortIo for Gate {
        fn inb(&mut self, port: u16) -> u8 {
            self.ports.inb(port)
        }
        fn outb(&mut self, port: u16, value: u8) {
            self.ports.outb(port, value);
        }
        fn inl(&mut self, port: u16) -> u32 {
            self.ports.inl(port)
        }
        fn outl(&mut self, port: u16, value: u32) {
            self.ports.outl(port, value);
        }
    }

    impl A20Line for Gate {
        fn is_enabled(&mut self) -> bool {
            let opened = self.opens_on.is_some_and(|port| {
                self.ports.writes_to(port).iter().any(|v| v & A20_BIT as u32 != 0)
            });
            self.enabled || opened
        }
        fn bios_enable(&mut self) -> bool {
            if self.bios_works {
                self.enabled = true;
            }
            self.bios_works
        }
    }

    fn gate(bios_works: bool, opens_on: Option<u16>) -> Gate {
        let mut ports = FakePorts::default();
        ports.set(KBC_STATUS, KBC_OUTPUT_FULL as u32);
        ports.set(KBC_DATA, 0x01);
        Gate { ports, bios_works, enabled: false, opens_on }
    }

    #[test]
    fn test_already_enabled_touches_nothing() {
        let mut line = gate(false, None);
        line.enabled = true;
        assert_eq!(enable_a20(&mut line).unwrap().method(), A20Method::AlreadyEnabled);
        assert!(line.ports.writes.is_empty());
    }

    #[test]
    fn test_bios_method() {
        let mut line = gate(true, None);
        assert_eq!(enable_a20(&mut line).unwrap().method(), A20Method::Bios);
        assert!(line.ports.writes.is_empty());
    }

    #[test]
    fn test_keyboard_controller_sequence() {
        let mut line = gate(false, Some(KBC_DATA));
        assert_eq!(enable_a20(&mut line).unwrap().method(), A20Method::KeyboardController);
        assert_eq!(
            line.ports.writes_to(KBC_COMMAND),
            [
                KBC_DISABLE_KEYBOARD as u32,
                KBC_READ_OUTPUT_PORT as u32,
                KBC_WRITE_OUTPUT_PORT as u32,
                KBC_ENABLE_KEYBOARD as u32
            ]
        );
        assert_eq!(line.ports.writes_to(KBC_DATA), [0x03]);
        assert!(line.ports.writes_to(SYSTEM_CONTROL_A).is_empty());
    }

    #[test]
    fn test_fast_gate_fallback() {
        let mut line = gate(false, Some(SYSTEM_CONTROL_A));
        line.ports.set(SYSTEM_CONTROL_A, 0x01);
        assert_eq!(enable_a20(&mut line).unwrap().method(), A20Method::FastGate);
        assert_eq!(line.ports.writes_to(SYSTEM_CONTROL_A), [0x03]);
    }

    #[test]
    fn test_keyboard_controller_waits_for_status() {
        let mut line = gate(false, None);
        line.ports.queue(KBC_STATUS, &[0x02, 0x02, 0x00]);
        keyboard_controller(&mut line);
        let polls = line.ports.reads.iter().filter(|&&p| p == KBC_STATUS).count();
        assert!(polls >= 9);
        assert_eq!(line.ports.writes_to(KBC_COMMAND)[0], KBC_DISABLE_KEYBOARD as u32);
    }

    #[test]
    fn test_all_methods_fail() {
        struct Stuck(FakePorts);
        impl PortIo for Stuck {
            fn inb(&mut self, port: u16) -> u8 {
                self.0.inb(port)
            }
            fn outb(&mut self, port: u16, value: u8) {
                self.0.outb(port, value);
            }
            fn inl(&mut self, port: u16) -> u32 {
                self.0.inl(port)
            }
            fn outl(&mut self, port: u16, value: u32) {
                self.0.outl(port, value);
            }
        }
        impl A20Line for Stuck {
            fn is_enabled(&mut self) -> bool {
                false
            }
            fn bios_enable(&mut self) -> bool {
                true
            }
        }
        let mut ports = FakePorts::default();
        ports.set(KBC_STATUS, KBC_OUTPUT_FULL as u32);
        let mut line = Stuck(ports);
        assert_eq!(enable_a20(&mut line).err(), Some(BootError::A20Unavailable));
        assert_eq!(line.0.writes_to(SYSTEM_CONTROL_A), [0x02]);
    }
}

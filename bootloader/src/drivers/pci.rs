//! PCI quiesce
//!
//! Before the kernel takes over, every PCI function reachable through
//! configuration mechanism #1 has its I/O-space and memory-space decoding
//! switched off so no device is left answering at firmware-assigned
//! addresses.

use crate::arch::x86::PortIo;

pub const CONFIG_ADDRESS: u16 = 0xCF8;
pub const CONFIG_DATA: u16 = 0xCFC;

const ENABLE: u32 = 1 << 31;
const REG_VENDOR: u8 = 0x0;
const REG_COMMAND: u8 = 0x1;
const REG_HEADER: u8 = 0x3;
const NO_VENDOR: u16 = 0xFFFF;
const MULTI_FUNCTION: u8 = 0x80;
/// Command register bits 0 (I/O space) and 1 (memory space)
const DECODE_ENABLE: u32 = 0b11;

pub const BUSES: u16 = 256;
pub const DEVICES: u8 = 32;
pub const FUNCTIONS: u8 = 8;

/// Bus/device/function triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    /// CONFIG_ADDRESS value selecting dword register `reg`
    pub fn config_address(&self, reg: u8) -> u32 {
        ENABLE
            | (self.bus as u32) << 16
            | (self.device as u32) << 11
            | (self.function as u32) << 8
            | (reg as u32) * 4
    }
}

pub struct ConfigSpace<'p, P: PortIo + ?Sized> {
    ports: &'p mut P,
}

impl<'p, P: PortIo + ?Sized> ConfigSpace<'p, P> {
    pub fn new(ports: &'p mut P) -> Self {
        Self { ports }
    }

    pub fn read(&mut self, address: PciAddress, reg: u8) -> u32 {
        self.ports.outl(CONFIG_ADDRESS, address.config_address(reg));
        self.ports.inl(CONFIG_DATA)
    }

    pub fn write(&mut self, address: PciAddress, reg: u8, value: u32) {
        self.ports.outl(CONFIG_ADDRESS, address.config_address(reg));
        self.ports.outl(CONFIG_DATA, value);
    }

    pub fn vendor(&mut self, address: PciAddress) -> u16 {
        (self.read(address, REG_VENDOR) & 0xFFFF) as u16
    }

    pub fn header_type(&mut self, address: PciAddress) -> u8 {
        ((self.read(address, REG_HEADER) >> 16) & 0xFF) as u8
    }

    fn disable_decoding(&mut self, address: PciAddress) {
        let command = self.read(address, REG_COMMAND);
        self.write(address, REG_COMMAND, command & !DECODE_ENABLE);
    }
}

/// Switch off decoding on every present function; returns how many
pub fn disable_all<P: PortIo + ?Sized>(ports: &mut P) -> usize {
    let mut config = ConfigSpace::new(ports);
    let mut disabled = 0;
    for bus in 0..BUSES {
        for device in 0..DEVICES {
            let base = PciAddress { bus: bus as u8, device, function: 0 };
            if config.vendor(base) == NO_VENDOR {
                continue;
            }
            config.disable_decoding(base);
            disabled += 1;

            if config.header_type(base) & MULTI_FUNCTION == 0 {
                continue;
            }
            for function in 1..FUNCTIONS {
                let address = PciAddress { function, ..base };
                if config.vendor(address) != NO_VENDOR {
                    config.disable_decoding(address);
                    disabled += 1;
                }
            }
        }
    }
    log::info!("pci: decoding disabled on {} functions", disabled);
    disabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::vec::Vec;

    /// Config space keyed by CONFIG_ADDRESS values; absent registers read
    /// as all ones
    #[derive(Default)]
    struct Bus {
        registers: BTreeMap<u32, u32>,
        selected: u32,
        writes: Vec<(u32, u32)>,
    }

    impl Bus {
        fn add(&mut self, address: PciAddress, multi: bool) {
            self.registers.insert(address.config_address(REG_VENDOR), 0x1234_8086);
            self.registers.insert(address.config_address(REG_COMMAND), 0x0010_0007);
            let header = if multi { 0x0080_0000 } else { 0 };
            self.registers.insert(address.config_address(REG_HEADER), header);
        }
    }

    impl PortIo for Bus {
        fn inb(&mut self, _: u16) -> u8 {
            0xFF
        }
        fn outb(&mut self, _: u16, _: u8) {}
        fn inl(&mut self, port: u16) -> u32 {
            assert_eq!(port, CONFIG_DATA);
            self.registers.get(&self.selected).copied().unwrap_or(u32::MAX)
        }
        fn outl(&mut self, port: u16, value: u32) {
            match port {
                CONFIG_ADDRESS => self.selected = value,
                _ => {
                    self.writes.push((self.selected, value));
                    self.registers.insert(self.selected, value);
                }
            }
        }
    }

    #[test]
    fn test_config_address_encoding() {
        let address = PciAddress { bus: 3, device: 0x1F, function: 7 };
        assert_eq!(address.config_address(REG_COMMAND), 0x8003_FF04);
    }

    #[test]
    fn test_disable_all_clears_decode_bits() {
        let host = PciAddress { bus: 0, device: 0, function: 0 };
        let bridge = PciAddress { bus: 0, device: 0x1F, function: 0 };
        let bridge_fn3 = PciAddress { function: 3, ..bridge };
        let mut bus = Bus::default();
        bus.add(host, false);
        bus.add(bridge, true);
        bus.add(bridge_fn3, false);
        // a function 1 on a single-function device is never visited
        bus.add(PciAddress { function: 1, ..host }, false);

        assert_eq!(disable_all(&mut bus), 3);
        for address in [host, bridge, bridge_fn3] {
            assert_eq!(bus.registers[&address.config_address(REG_COMMAND)], 0x0010_0004);
        }
        let untouched = PciAddress { function: 1, ..host }.config_address(REG_COMMAND);
        assert_eq!(bus.registers[&untouched], 0x0010_0007);
        assert_eq!(bus.writes.len(), 3);
    }
}

// 16550 UART on COM1

use crate::arch::x86::PortIo;
use crate::drivers::logger::TextSink;

pub const COM1: u16 = 0x3F8;

const DATA: u16 = 0;
const INTERRUPT_ENABLE: u16 = 1;
const FIFO_CONTROL: u16 = 2;
const LINE_CONTROL: u16 = 3;
const MODEM_CONTROL: u16 = 4;
const LINE_STATUS: u16 = 5;

const TRANSMIT_EMPTY: u8 = 1 << 5;
const DLAB: u8 = 1 << 7;

/// Serial port polled through `P`
pub struct SerialPort<P: PortIo> {
    ports: P,
    base: u16,
}

impl<P: PortIo> SerialPort<P> {
    pub const fn new(ports: P, base: u16) -> Self {
        Self { ports, base }
    }

    /// 38400 baud, 8N1, FIFO on, interrupts off
    pub fn init(&mut self) {
        self.ports.outb(self.base + INTERRUPT_ENABLE, 0x00);
        self.ports.outb(self.base + LINE_CONTROL, DLAB);
        self.ports.outb(self.base + DATA, 0x03);
        self.ports.outb(self.base + INTERRUPT_ENABLE, 0x00);
        self.ports.outb(self.base + LINE_CONTROL, 0x03);
        self.ports.outb(self.base + FIFO_CONTROL, 0xC7);
        self.ports.outb(self.base + MODEM_CONTROL, 0x0B);
    }

    /// Busy-waits for the transmit holding register, with no timeout
    pub fn write_byte(&mut self, byte: u8) {
        while self.ports.inb(self.base + LINE_STATUS) & TRANSMIT_EMPTY == 0 {
            core::hint::spin_loop();
        }
        self.ports.outb(self.base + DATA, byte);
    }

    pub fn into_inner(self) -> P {
        self.ports
    }
}

impl<P: PortIo + Send> TextSink for SerialPort<P> {
    fn write_str(&mut self, text: &str) {
        for byte in text.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

// x86 I/O port access

/// Byte and dword port I/O
///
/// Every device poll in the loader goes through this seam so the polling
/// sequences can be replayed against a fake on the host.
pub trait PortIo {
    fn inb(&mut self, port: u16) -> u8;
    fn outb(&mut self, port: u16, value: u8);
    fn inl(&mut self, port: u16) -> u32;
    fn outl(&mut self, port: u16, value: u32);
}

/// The CPU's own I/O space
#[cfg(target_os = "none")]
pub struct HardwarePorts;

#[cfg(target_os = "none")]
impl PortIo for HardwarePorts {
    fn inb(&mut self, port: u16) -> u8 {
        unsafe { x86::io::inb(port) }
    }

    fn outb(&mut self, port: u16, value: u8) {
        unsafe { x86::io::outb(port, value) }
    }

    fn inl(&mut self, port: u16) -> u32 {
        unsafe { x86::io::inl(port) }
    }

    fn outl(&mut self, port: u16, value: u32) {
        unsafe { x86::io::outl(port, value) }
    }
}

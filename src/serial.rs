//! PL011 UART console backend.
//!
//! The reference board's console UART is memory-mapped at [`crate::config::UART_BASE`].
//! This driver does a direct, unbuffered byte write with no FIFO status
//! check, mirroring the teacher's `Pl011Uart` (adequate for a boot console
//! that is not expected to race with a real OS driver for the same port).

use core::fmt;

/// Minimal PL011 UART writer.
pub struct Pl011Uart {
    base_addr: usize,
}

impl Pl011Uart {
    pub const fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }
}

impl fmt::Write for Pl011Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        const UARTDR: usize = 0x000;
        for &b in s.as_bytes() {
            // SAFETY: `base_addr` is the platform's fixed PL011 MMIO base
            // (config::UART_BASE); UARTDR is a valid one-byte-wide data
            // register offset within that region.
            unsafe {
                core::ptr::write_volatile((self.base_addr + UARTDR) as *mut u8, b);
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let mut uart = Pl011Uart::new(crate::config::UART_BASE);
    let _ = uart.write_fmt(args);
}

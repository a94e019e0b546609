//! UART gate: only the guest currently granted ownership may have its
//! accesses reach the physical console UART. Prevents two guests sharing
//! one physical UART from interleaving garbled output.
//!
//! Grounded on `hardware/arm32ve/vdev/vdev_uart.c`'s gating concept and on
//! the teacher's `VirtualUart` for the `VirtualDevice` impl shape.

use crate::error::HvResult;
use crate::vdev::VirtualDevice;
use crate::vm::context::ArchRegs;
use crate::vm::Vmid;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::config::INVALID_VMID;

/// Owning guest, or `INVALID_VMID` if no guest currently holds the gate.
static OWNER: AtomicU8 = AtomicU8::new(INVALID_VMID);

/// Grant UART ownership to `vmid`.
pub fn acquire(vmid: Vmid) {
    OWNER.store(vmid.as_u8(), Ordering::Release);
}

/// Release UART ownership, if currently held by `vmid`.
pub fn release(vmid: Vmid) {
    let _ = OWNER.compare_exchange(
        vmid.as_u8(),
        INVALID_VMID,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
}

pub fn owner() -> Option<Vmid> {
    let raw = OWNER.load(Ordering::Acquire);
    if raw == INVALID_VMID {
        None
    } else {
        Some(Vmid::new(raw))
    }
}

const UARTDR: usize = 0x000;

/// Trap handler for a guest-visible UART MMIO window. Writes are forwarded
/// to the physical console only when the writing guest owns the gate;
/// otherwise they are silently absorbed.
pub struct UartGate {
    base: usize,
    size: usize,
}

impl UartGate {
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }
}

impl VirtualDevice for UartGate {
    fn check(&self, fault_addr: usize) -> bool {
        fault_addr >= self.base && fault_addr < self.base + self.size
    }

    fn read(&mut self, _vmid: Vmid, _offset: usize, _size: usize) -> HvResult<u32> {
        Ok(0)
    }

    fn write(
        &mut self,
        vmid: Vmid,
        offset: usize,
        _size: usize,
        value: u32,
        regs: &mut ArchRegs,
    ) -> HvResult<()> {
        if offset == UARTDR && owner() == Some(vmid) {
            #[cfg(all(target_arch = "arm", target_os = "none"))]
            // SAFETY: `self.base` is the platform's fixed UART MMIO base
            // (config::UART_BASE); UARTDR is the one-byte data register.
            unsafe {
                core::ptr::write_volatile((self.base + UARTDR) as *mut u8, value as u8);
            }
        }
        self.post(regs);
        Ok(())
    }

    fn name(&self) -> &str {
        "uart-gate"
    }

    fn base(&self) -> usize {
        self.base
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_transitions() {
        assert_eq!(owner(), None);
        acquire(Vmid::new(0));
        assert_eq!(owner(), Some(Vmid::new(0)));
        // A release by the non-owner is a no-op.
        release(Vmid::new(1));
        assert_eq!(owner(), Some(Vmid::new(0)));
        release(Vmid::new(0));
        assert_eq!(owner(), None);
    }
}

//! Virtual device framework: trap-and-emulate dispatch for guest MMIO
//! faults, grounded on the teacher's `virt::devices` address-range
//! dispatcher and generalized with a module priority tier and a `post`
//! step that advances the faulting `pc`.

pub mod uart_gate;
pub mod vgic_cpu_iface;

use crate::error::HvResult;
use crate::vm::context::ArchRegs;
use crate::vm::Vmid;

#[cfg(feature = "alloc")]
use alloc::{boxed::Box, vec::Vec};

/// Priority tier a vdev module is registered at; higher tiers are searched
/// first during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Mid,
    High,
}

/// A module that emulates one guest-visible MMIO region.
pub trait VirtualDevice: Send {
    /// Does this fault address belong to this module?
    fn check(&self, fault_addr: usize) -> bool;
    /// Handle an emulated read; `size` is the access width in bytes.
    fn read(&mut self, vmid: Vmid, offset: usize, size: usize) -> HvResult<u32>;
    /// Handle an emulated write. `regs` is the faulting guest's trap frame;
    /// most implementations ignore it and let the caller advance `pc` via
    /// [`VirtualDevice::post`], but a write that injects a VIRQ (the vGIC
    /// CPU interface's EOIR handler draining its pending queue) needs it to
    /// redirect `pc`/`cpsr` into the guest's IRQ vector instead.
    fn write(
        &mut self,
        vmid: Vmid,
        offset: usize,
        size: usize,
        value: u32,
        regs: &mut ArchRegs,
    ) -> HvResult<()>;
    /// Advance the faulting guest's `pc` past the trapped instruction.
    fn post(&self, regs: &mut ArchRegs) {
        let thumb = regs.cpsr & crate::arch::arm::psr::T_BIT != 0;
        regs.pc = regs.pc.wrapping_add(if thumb { 2 } else { 4 });
    }
    fn name(&self) -> &str;
    fn base(&self) -> usize;
    fn size(&self) -> usize;
}

#[cfg(feature = "alloc")]
struct Registration {
    priority: Priority,
    device: Box<dyn VirtualDevice>,
}

/// Ordered list of registered vdev modules, searched highest-priority
/// first, first address match wins within a tier.
#[cfg(feature = "alloc")]
pub struct VdevRegistry {
    modules: Vec<Registration>,
}

#[cfg(feature = "alloc")]
impl VdevRegistry {
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    pub fn register(&mut self, priority: Priority, device: Box<dyn VirtualDevice>) {
        self.modules.push(Registration { priority, device });
        self.modules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn find(&mut self, fault_addr: usize) -> Option<&mut (dyn VirtualDevice + 'static)> {
        self.modules
            .iter_mut()
            .find(|r| r.device.check(fault_addr))
            .map(|r| &mut *r.device)
    }

    /// Dispatch a guest MMIO fault: locate the owning module, perform the
    /// read, then advance `pc`. `offset` is computed from the matched
    /// module's own base, since the caller (a data-abort trampoline) only
    /// knows the raw faulting address, not which module will claim it.
    pub fn dispatch_read(
        &mut self,
        vmid: Vmid,
        fault_addr: usize,
        size: usize,
        regs: &mut ArchRegs,
    ) -> HvResult<u32> {
        let dev = self
            .find(fault_addr)
            .ok_or(crate::error::HvError::NotFound {
                resource: "vdev",
                id: fault_addr as u32,
            })?;
        let offset = fault_addr - dev.base();
        let value = dev.read(vmid, offset, size)?;
        dev.post(regs);
        Ok(value)
    }

    /// Dispatch a guest MMIO write. Unlike [`Self::dispatch_read`], `pc`
    /// advancement is left to the module's `write` implementation: a write
    /// that injects a VIRQ redirects `regs` into the guest's IRQ vector
    /// instead of just stepping past the trapped instruction.
    pub fn dispatch_write(
        &mut self,
        vmid: Vmid,
        fault_addr: usize,
        size: usize,
        value: u32,
        regs: &mut ArchRegs,
    ) -> HvResult<()> {
        let dev = self
            .find(fault_addr)
            .ok_or(crate::error::HvError::NotFound {
                resource: "vdev",
                id: fault_addr as u32,
            })?;
        let offset = fault_addr - dev.base();
        dev.write(vmid, offset, size, value, regs)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

#[cfg(feature = "alloc")]
impl Default for VdevRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "alloc")]
static REGISTRY: crate::sync::once_lock::GlobalState<spin::Mutex<VdevRegistry>> =
    crate::sync::once_lock::GlobalState::new();

/// Build the registry with the board's fixed set of trapped MMIO windows:
/// the virtualized GIC CPU interface and the gated console UART.
#[cfg(feature = "alloc")]
pub fn init() {
    let mut registry = VdevRegistry::new();
    registry.register(
        Priority::High,
        Box::new(vgic_cpu_iface::VgicCpuInterface::new(
            crate::config::GICC_BASE,
            crate::config::CPU_INTERFACE_SIZE,
        )),
    );
    registry.register(
        Priority::Mid,
        Box::new(uart_gate::UartGate::new(crate::config::UART_BASE, 0x1000)),
    );
    let _ = REGISTRY.init(spin::Mutex::new(registry));
}

#[cfg(feature = "alloc")]
pub fn dispatch_read(
    vmid: Vmid,
    fault_addr: usize,
    size: usize,
    regs: &mut ArchRegs,
) -> HvResult<u32> {
    REGISTRY
        .with(|r| r.lock().dispatch_read(vmid, fault_addr, size, regs))
        .ok_or(crate::error::HvError::NotInitialized { subsystem: "vdev" })?
}

#[cfg(feature = "alloc")]
pub fn dispatch_write(
    vmid: Vmid,
    fault_addr: usize,
    size: usize,
    value: u32,
    regs: &mut ArchRegs,
) -> HvResult<()> {
    REGISTRY
        .with(|r| r.lock().dispatch_write(vmid, fault_addr, size, value, regs))
        .ok_or(crate::error::HvError::NotInitialized { subsystem: "vdev" })?
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    struct Probe {
        base: usize,
        size: usize,
        last_write: Option<u32>,
    }

    impl VirtualDevice for Probe {
        fn check(&self, fault_addr: usize) -> bool {
            fault_addr >= self.base && fault_addr < self.base + self.size
        }
        fn read(&mut self, _vmid: Vmid, _offset: usize, _size: usize) -> HvResult<u32> {
            Ok(0xAAAA_AAAA)
        }
        fn write(
            &mut self,
            _vmid: Vmid,
            _offset: usize,
            _size: usize,
            value: u32,
            regs: &mut ArchRegs,
        ) -> HvResult<()> {
            self.last_write = Some(value);
            self.post(regs);
            Ok(())
        }
        fn name(&self) -> &str {
            "probe"
        }
        fn base(&self) -> usize {
            self.base
        }
        fn size(&self) -> usize {
            self.size
        }
    }

    #[test]
    fn dispatch_finds_owning_module_and_advances_pc() {
        let mut registry = VdevRegistry::new();
        registry.register(
            Priority::Mid,
            Box::new(Probe {
                base: 0x1000,
                size: 0x100,
                last_write: None,
            }),
        );
        let mut regs = ArchRegs::default();
        regs.pc = 0x8000;
        let value = registry
            .dispatch_read(Vmid::new(0), 0x1050, 4, &mut regs)
            .unwrap();
        assert_eq!(value, 0xAAAA_AAAA);
        assert_eq!(regs.pc, 0x8004);
    }

    #[test]
    fn dispatch_misses_return_not_found() {
        let mut registry = VdevRegistry::new();
        let mut regs = ArchRegs::default();
        let err = registry
            .dispatch_read(Vmid::new(0), 0x9999, 4, &mut regs)
            .unwrap_err();
        assert!(matches!(err, crate::error::HvError::NotFound { .. }));
    }

    #[test]
    fn dispatch_write_reaches_the_owning_module() {
        let mut registry = VdevRegistry::new();
        registry.register(
            Priority::Mid,
            Box::new(Probe {
                base: 0x1000,
                size: 0x100,
                last_write: None,
            }),
        );
        let mut regs = ArchRegs::default();
        regs.pc = 0x8000;
        registry
            .dispatch_write(Vmid::new(0), 0x1050, 4, 0x42, &mut regs)
            .unwrap();
        assert_eq!(regs.pc, 0x8004);
    }

    #[test]
    fn global_registry_routes_gicc_window_to_vgic() {
        crate::vm::table::init();
        init();
        let mut regs = ArchRegs::default();
        let value = dispatch_read(
            Vmid::new(0),
            crate::config::GICC_BASE + 0x0004,
            4,
            &mut regs,
        )
        .unwrap();
        // Default PMR shadow value set by VgicShadow::new().
        assert_eq!(value, 0xFF);
    }
}

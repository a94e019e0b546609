//! The virtualized GIC CPU interface: per-guest shadow registers, the
//! "one VIRQ in flight" invariant (`iar_current`), and the bounded
//! per-guest pending-VIRQ queue.
//!
//! Grounded on the GICC register layout in
//! `hardware/arm32ve/vdev/vdev_cpu_interface.c`, with the source's single
//! `execute(type, ...)` multiplexer replaced by the named operations below
//! (`inject`, `push_pending`, `pop_pending`, `has_pending`,
//! `push_pending_for`, `pop_pending_for`).

use crate::arch::arm::{psr, regs};
use crate::config::{GIC_SPURIOUS_IRQ, IRQ_VECTOR_ADDR, PENDING_MAX};
use crate::error::HvResult;
use crate::vdev::VirtualDevice;
use crate::vm::context::ArchRegs;
use crate::vm::Vmid;

/// Fixed-capacity FIFO of pending VIRQs for one guest. Never allocates.
#[derive(Debug, Clone, Copy)]
pub struct PendingFifo {
    items: [u16; PENDING_MAX],
    head: usize,
    count: usize,
}

impl PendingFifo {
    pub const fn new() -> Self {
        Self {
            items: [0u16; PENDING_MAX],
            head: 0,
            count: 0,
        }
    }

    /// Push a VIRQ. Returns `false` (and drops it) if the queue is full.
    pub fn push(&mut self, virq: u16) -> bool {
        if self.count >= PENDING_MAX {
            return false;
        }
        let idx = (self.head + self.count) % PENDING_MAX;
        self.items[idx] = virq;
        self.count += 1;
        true
    }

    pub fn pop(&mut self) -> Option<u16> {
        if self.count == 0 {
            return None;
        }
        let v = self.items[self.head];
        self.head = (self.head + 1) % PENDING_MAX;
        self.count -= 1;
        Some(v)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= PENDING_MAX
    }

    pub fn len(&self) -> usize {
        self.count
    }
}

impl Default for PendingFifo {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-guest virtual CPU-interface state.
#[derive(Debug, Clone)]
pub struct VgicShadow {
    pub ctlr: u32,
    pub pmr: u32,
    pub bpr: u32,
    /// The VIRQ the guest would currently read from IAR, or the spurious
    /// sentinel when no injection is in flight.
    pub iar_current: u32,
    pub pending: PendingFifo,
}

impl VgicShadow {
    pub const fn new() -> Self {
        Self {
            ctlr: 0,
            pmr: 0xFF,
            bpr: 0,
            iar_current: GIC_SPURIOUS_IRQ,
            pending: PendingFifo::new(),
        }
    }

    pub fn is_spurious(&self) -> bool {
        self.iar_current == GIC_SPURIOUS_IRQ
    }
}

impl Default for VgicShadow {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Named operations (replace the source's execute(type, ...) multiplexer)
// ---------------------------------------------------------------------------

/// Mark `virq` as the VIRQ currently in flight for `vmid`. The caller is
/// responsible for the accompanying context mutation that actually
/// redirects the guest to its IRQ vector (`irq::isr` does this).
pub fn inject(vmid: Vmid, virq: u16) -> HvResult<()> {
    crate::vm::table::with_mut(vmid, |ctx| ctx.vgic.iar_current = virq as u32)
}

/// Queue `virq` for later injection into `vmid`. Returns `false` if the
/// queue was full and the VIRQ was dropped.
pub fn push_pending(vmid: Vmid, virq: u16) -> HvResult<bool> {
    crate::vm::table::with_mut(vmid, |ctx| ctx.vgic.pending.push(virq))
}

/// Pop the oldest queued VIRQ for `vmid`, if any.
pub fn pop_pending(vmid: Vmid) -> HvResult<Option<u16>> {
    crate::vm::table::with_mut(vmid, |ctx| ctx.vgic.pending.pop())
}

/// Whether `vmid` has any VIRQ queued.
pub fn has_pending(vmid: Vmid) -> HvResult<bool> {
    crate::vm::table::with(vmid, |ctx| !ctx.vgic.pending.is_empty())
}

/// Queue `virq` into `to_vmid`'s FIFO on behalf of `from_vmid`. Valid only
/// when both guests are pinned to the same physical CPU (the scheduler's
/// per-CPU ownership model, not re-checked here).
pub fn push_pending_for(from_vmid: Vmid, to_vmid: Vmid, virq: u16) -> HvResult<bool> {
    let _ = from_vmid;
    push_pending(to_vmid, virq)
}

/// Pop from `to_vmid`'s FIFO on behalf of `from_vmid`. Same same-CPU
/// constraint as [`push_pending_for`].
pub fn pop_pending_for(from_vmid: Vmid, to_vmid: Vmid) -> HvResult<Option<u16>> {
    let _ = from_vmid;
    pop_pending(to_vmid)
}

pub fn is_spurious(vmid: Vmid) -> HvResult<bool> {
    crate::vm::table::with(vmid, |ctx| ctx.vgic.is_spurious())
}

/// Redirect `regs` -- the register state `vmid` is about to resume with on
/// hardware -- into the guest's own IRQ vector, exactly as a real IRQ
/// exception would: save the interrupted `pc`/`cpsr` into the IRQ-mode
/// banked registers, force IRQ mode with interrupts masked, and point `pc`
/// at the high vector. Only correct to call immediately before `vmid`
/// actually resumes: either it is the CPU's current guest (the ISR's
/// inject-now path) or a dispatch has just restored its other banked state.
pub fn deliver(vmid: Vmid, regs: &mut ArchRegs, virq: u16) -> HvResult<()> {
    regs::write_spsr_irq(regs.cpsr);
    regs::write_lr_irq(regs.pc.wrapping_add(4));
    regs.cpsr = (regs.cpsr & !(psr::MODE_MASK | psr::T_BIT)) | psr::MODE_IRQ | psr::I_BIT;
    regs.pc = IRQ_VECTOR_ADDR;
    inject(vmid, virq)
}

/// If `vmid` has nothing in flight and at least one VIRQ queued, pop and
/// deliver it into `regs`. Called right after a scheduler dispatch restores
/// `vmid`, implementing "on the next context switch to that guest, if
/// spurious, one pending VIRQ is injected before resuming". Returns whether
/// a VIRQ was delivered.
pub fn deliver_pending(vmid: Vmid, regs: &mut ArchRegs) -> HvResult<bool> {
    if !is_spurious(vmid)? {
        return Ok(false);
    }
    match pop_pending(vmid)? {
        Some(virq) => {
            deliver(vmid, regs, virq)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn clear_iar(vmid: Vmid) -> HvResult<()> {
    crate::vm::table::with_mut(vmid, |ctx| ctx.vgic.iar_current = GIC_SPURIOUS_IRQ)
}

// ---------------------------------------------------------------------------
// Trap-and-emulate MMIO device
// ---------------------------------------------------------------------------

const GICC_CTLR: usize = 0x0000;
const GICC_PMR: usize = 0x0004;
const GICC_BPR: usize = 0x0008;
const GICC_IAR: usize = 0x000C;
const GICC_EOIR: usize = 0x0010;
const GICC_DIR: usize = 0x1000;

/// Guest-facing trap handler for the virtualized CPU interface.
pub struct VgicCpuInterface {
    base: usize,
    size: usize,
}

impl VgicCpuInterface {
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// The core EOI algorithm (specification §4.3): translate the written
    /// VIRQ to its PIRQ, complete it at the physical GIC, clear the
    /// in-flight marker, and if another VIRQ was queued, repeat the
    /// injection algorithm against it (the writing guest is by definition
    /// still current, so this is always the direct-redirect path, not a
    /// pend) via [`deliver`] rather than the bare in-flight marker `inject`
    /// sets -- the guest must actually be vectored to its IRQ handler for
    /// the newly promoted VIRQ, not just see it the next time it happens to
    /// read IAR.
    fn handle_eoi(&self, vmid: Vmid, virq: u32, regs: &mut ArchRegs) -> HvResult<()> {
        let pirq = crate::irq::pirq_virq_map::virq_to_pirq(vmid, virq as u16)?;
        crate::arch::arm::gic::eoi(pirq as u32);
        clear_iar(vmid)?;
        match pop_pending(vmid)? {
            Some(next_virq) => deliver(vmid, regs, next_virq),
            None => {
                self.post(regs);
                Ok(())
            }
        }
    }
}

impl VirtualDevice for VgicCpuInterface {
    fn check(&self, fault_addr: usize) -> bool {
        fault_addr >= self.base && fault_addr < self.base + self.size
    }

    fn read(&mut self, vmid: Vmid, offset: usize, _size: usize) -> HvResult<u32> {
        crate::vm::table::with(vmid, |ctx| match offset {
            GICC_CTLR => ctx.vgic.ctlr,
            GICC_PMR => ctx.vgic.pmr,
            GICC_BPR => ctx.vgic.bpr,
            GICC_IAR => ctx.vgic.iar_current,
            _ => 0,
        })
    }

    fn write(
        &mut self,
        vmid: Vmid,
        offset: usize,
        _size: usize,
        value: u32,
        regs: &mut ArchRegs,
    ) -> HvResult<()> {
        match offset {
            GICC_CTLR => {
                crate::vm::table::with_mut(vmid, |ctx| ctx.vgic.ctlr = value)?;
                self.post(regs);
                Ok(())
            }
            GICC_PMR => {
                crate::vm::table::with_mut(vmid, |ctx| ctx.vgic.pmr = value)?;
                self.post(regs);
                Ok(())
            }
            GICC_BPR => {
                crate::vm::table::with_mut(vmid, |ctx| ctx.vgic.bpr = value)?;
                self.post(regs);
                Ok(())
            }
            GICC_EOIR => self.handle_eoi(vmid, value, regs),
            GICC_DIR => {
                let pirq = crate::irq::pirq_virq_map::virq_to_pirq(vmid, value as u16)?;
                crate::arch::arm::gic::deactivate(pirq as u32);
                self.post(regs);
                Ok(())
            }
            _ => {
                self.post(regs);
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "vgic-cpu-interface"
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
    fn pending_fifo_drops_when_full() {
        let mut fifo = PendingFifo::new();
        for i in 0..PENDING_MAX {
            assert!(fifo.push(i as u16));
        }
        assert!(!fifo.push(999));
        assert_eq!(fifo.len(), PENDING_MAX);
    }

    #[test]
    fn pending_fifo_is_fifo_order() {
        let mut fifo = PendingFifo::new();
        fifo.push(10);
        fifo.push(20);
        fifo.push(30);
        assert_eq!(fifo.pop(), Some(10));
        assert_eq!(fifo.pop(), Some(20));
        assert_eq!(fifo.pop(), Some(30));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn shadow_starts_spurious() {
        let shadow = VgicShadow::new();
        assert!(shadow.is_spurious());
        assert!(shadow.pending.is_empty());
    }

    fn fresh() {
        crate::vm::table::init();
        crate::irq::pirq_virq_map::init();
    }

    /// Guest writes EOIR for the VIRQ it just handled, with another VIRQ
    /// already queued behind it: the write must translate back to the
    /// physical line, clear the in-flight marker, and immediately vector
    /// the guest into its IRQ handler for the queued VIRQ -- not just
    /// promote it into `iar_current` and let the guest fall through to the
    /// instruction after the EOIR write.
    #[test]
    fn eoi_write_drains_the_next_pending_virq() {
        fresh();
        let vmid = Vmid::new(0);
        crate::irq::pirq_virq_map::map(vmid, 39, 37).unwrap();
        crate::irq::pirq_virq_map::map(vmid, 40, 41).unwrap();

        inject(vmid, 37).unwrap();
        assert!(push_pending(vmid, 41).unwrap());
        assert!(!is_spurious(vmid).unwrap());

        let mut iface = VgicCpuInterface::new(0x1000, 0x1000);
        let mut regs = crate::vm::context::ArchRegs::default();
        regs.pc = 0x2000;
        iface.write(vmid, GICC_EOIR, 4, 37, &mut regs).unwrap();

        assert_eq!(regs.pc, crate::config::IRQ_VECTOR_ADDR);
        assert_eq!(regs.cpsr & psr::MODE_MASK, psr::MODE_IRQ);
        assert_ne!(regs.cpsr & psr::I_BIT, 0);
        assert_eq!(
            crate::vm::table::with(vmid, |ctx| ctx.vgic.iar_current).unwrap(),
            41
        );
        assert!(crate::vm::table::with(vmid, |ctx| ctx.vgic.pending.is_empty()).unwrap());
    }

    /// The ordinary case: EOI with nothing queued behind it just advances
    /// `pc` past the trapped write, same as any other emulated register.
    #[test]
    fn eoi_write_with_nothing_pending_just_advances_pc() {
        fresh();
        let vmid = Vmid::new(0);
        crate::irq::pirq_virq_map::map(vmid, 39, 37).unwrap();
        inject(vmid, 37).unwrap();

        let mut iface = VgicCpuInterface::new(0x1000, 0x1000);
        let mut regs = crate::vm::context::ArchRegs::default();
        regs.pc = 0x2000;
        iface.write(vmid, GICC_EOIR, 4, 37, &mut regs).unwrap();

        assert_eq!(regs.pc, 0x2004);
        assert!(is_spurious(vmid).unwrap());
    }
}

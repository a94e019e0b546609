//! The single normative physical-IRQ service routine.
//!
//! Grounded on `hypervisor/interrupt.c`'s `interrupt_service_routine` and
//! `interrupt_inject_enabled_guest`, restructured to operate on each
//! target guest's own context rather than the source's single reused
//! `ci_regs[0]` (which silently mis-injects whenever the interrupted guest
//! isn't VM 0).

use crate::arch::arm::{gic, psr};
use crate::config::{TIMER_PIRQ, N_MAX};
use crate::irq::pirq_virq_map;
use crate::log_service::LogLevel;
use crate::sched;
use crate::vdev::vgic_cpu_iface;
use crate::vm::context::ArchRegs;
use crate::vm::Vmid;

/// Acknowledge, classify, and act on the highest-priority pending physical
/// interrupt for `cpu`. Called from the low-level exception entry stub with
/// interrupts still masked; `live` is the trap frame of whichever guest (or
/// nothing, before the first dispatch) was interrupted, and is mutated in
/// place when a VIRQ is injected straight into it.
///
/// Returns `true` if a guest dispatch should happen on return from this
/// trap (the caller drives that via [`sched::on_trap_exit`]; this routine
/// only arranges the scheduler request).
pub fn handle_irq(cpu: usize, live: &mut ArchRegs) -> bool {
    let pirq = match gic::handle_irq() {
        Some(id) => id,
        None => return false, // spurious
    };

    // PIRQ 0 landing on a non-primary CPU is a known SMP startup artifact of
    // this GIC, not a real interrupt condition; just EOI it and move on.
    if cpu != 0 && pirq == 0 {
        gic::eoi(pirq);
        return false;
    }

    if pirq == TIMER_PIRQ {
        handle_timer_tick(cpu);
        gic::eoi(pirq);
        return true;
    }

    if !pirq_virq_map::is_guest_irq(pirq as u16) {
        crate::hvlog!(
            LogLevel::Warn,
            "isr",
            "unmapped physical irq, dropping to avoid a re-fire storm"
        );
        gic::eoi(pirq);
        return false;
    }

    inject_enabled_guests(cpu, pirq, live)
}

fn handle_timer_tick(cpu: usize) {
    let _ = sched::on_timer_tick(cpu);
}

/// The injection algorithm (specification §4.3): for every guest with an
/// enabled mapping for this PIRQ, deliver it immediately only if that guest
/// is the one currently live on this CPU, has nothing already in flight,
/// and does not have interrupts masked in its own (trap-frame) `cpsr`;
/// every other case -- a different guest, something already in flight, or
/// the running guest itself masked -- queues the VIRQ instead. Deliberately
/// does not EOI the PIRQ at the physical GIC here -- the guest completes it
/// when it writes its virtual EOIR ([`vgic_cpu_iface`]'s `handle_eoi`), so a
/// full pending queue simply leaves the line pending rather than silently
/// losing the interrupt.
fn inject_enabled_guests(cpu: usize, pirq: u32, live: &mut ArchRegs) -> bool {
    let mut targets = [(Vmid::INVALID, 0u16); N_MAX];
    let n = pirq_virq_map::collect_enabled_targets(pirq as u16, &mut targets);

    let mut dispatched_now = false;
    for &(vmid, virq) in &targets[..n] {
        let is_current = matches!(sched::current_vmid(cpu), Ok(running) if running == vmid);
        let spurious = vgic_cpu_iface::is_spurious(vmid).unwrap_or(false);
        let masked = is_current && (live.cpsr & psr::I_BIT != 0);

        if is_current && spurious && !masked {
            let _ = vgic_cpu_iface::deliver(vmid, live, virq);
            dispatched_now = true;
        } else if let Ok(false) = vgic_cpu_iface::push_pending(vmid, virq) {
            crate::hvlog!(
                LogLevel::Warn,
                "isr",
                "pending virq queue full, dropping injection"
            );
        }
    }

    dispatched_now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::table;

    fn fresh() {
        table::init();
        pirq_virq_map::init();
        sched::init();
        crate::log_service::log_init();
    }

    #[test]
    fn unmapped_pirq_classification_is_host_owned() {
        assert!(!pirq_virq_map::is_guest_irq(5));
    }

    #[test]
    fn timer_pirq_never_classified_as_guest_irq() {
        fresh();
        // The timer line is handled unconditionally before classification,
        // so it must never appear in the guest map regardless of content.
        assert!(!pirq_virq_map::is_guest_irq(TIMER_PIRQ as u16));
    }

    /// S2 -- inject-while-current: the target guest is the one live on this
    /// CPU and has nothing in flight, so the VIRQ is delivered straight
    /// into the trap frame: the guest resumes at the high IRQ vector with
    /// `lr_irq = original_pc + 4` and IRQ mode, interrupts masked.
    #[test]
    fn inject_while_current_redirects_the_live_trap_frame() {
        fresh();
        sched::sched_start(0).unwrap();
        pirq_virq_map::map(Vmid::new(0), 50, 5).unwrap();
        pirq_virq_map::set_enabled(Vmid::new(0), 50, true).unwrap();

        let mut live = ArchRegs::default();
        live.pc = 0x4000_1000;
        live.cpsr = psr::MODE_SVC;

        assert!(inject_enabled_guests(0, 50, &mut live));
        assert!(!vgic_cpu_iface::is_spurious(Vmid::new(0)).unwrap());
        assert_eq!(live.pc, crate::config::IRQ_VECTOR_ADDR);
        assert_eq!(live.cpsr & psr::MODE_MASK, psr::MODE_IRQ);
        assert_ne!(live.cpsr & psr::I_BIT, 0);
    }

    /// S3 -- inject-while-other: the target guest is mapped but not the one
    /// running on this CPU, so the VIRQ is queued rather than delivered,
    /// and the running guest's trap frame is untouched.
    #[test]
    fn inject_while_other_guest_queues_instead_of_delivering() {
        fresh();
        sched::sched_start(0).unwrap();
        pirq_virq_map::map(Vmid::new(1), 39, 37).unwrap();
        pirq_virq_map::set_enabled(Vmid::new(1), 39, true).unwrap();

        let mut live = ArchRegs::default();
        live.pc = 0x4000_2000;

        assert!(!inject_enabled_guests(0, 39, &mut live));
        assert_eq!(live.pc, 0x4000_2000);
        assert!(vgic_cpu_iface::is_spurious(Vmid::new(1)).unwrap());
        assert_eq!(vgic_cpu_iface::pop_pending(Vmid::new(1)).unwrap(), Some(37));
    }
}

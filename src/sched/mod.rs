//! Preemptive round-robin scheduler.
//!
//! Each physical CPU owns an independent [`CpuSched`] slot; there is no
//! cross-CPU synchronization because a guest never migrates between CPUs.
//! The teacher's own `sched` module is an unimplemented stub
//! (`// TODO: Schedule next task`), so this module is built fresh in the
//! surrounding idiom rather than expanded from teacher code.

use spin::Mutex;

use crate::config::{CpuOwnedRange, CPU_OWNED_RANGES, NUM_CPUS};
use crate::error::{HvError, HvResult};
use crate::sync::once_lock::GlobalState;
use crate::vm::context::ArchRegs;
use crate::vm::{table, Vmid};

#[derive(Clone, Copy)]
struct CpuSched {
    current: Vmid,
    next: Vmid,
    switch_locked: bool,
    manual_override: Option<Vmid>,
    owned: CpuOwnedRange,
}

impl CpuSched {
    const fn new(owned: CpuOwnedRange) -> Self {
        Self {
            current: Vmid::INVALID,
            next: Vmid::INVALID,
            switch_locked: false,
            manual_override: None,
            owned,
        }
    }

    /// Pure round-robin policy: manual override wins if set, else the
    /// successor of `current` within the owned range, wrapping at `last`.
    /// Before the first dispatch (`current == INVALID`), picks `first`.
    fn policy_pick_next(&self) -> Vmid {
        if let Some(v) = self.manual_override {
            return v;
        }
        if self.current == Vmid::INVALID {
            return Vmid::new(self.owned.first);
        }
        let cur = self.current.as_u8();
        let next = if cur >= self.owned.last {
            self.owned.first
        } else {
            cur + 1
        };
        Vmid::new(next)
    }
}

static SCHED: GlobalState<Mutex<[CpuSched; NUM_CPUS]>> = GlobalState::new();

/// Initialize per-CPU scheduler state from the board's static VMID
/// ownership table. Idempotent.
pub fn init() {
    let state: [CpuSched; NUM_CPUS] = core::array::from_fn(|i| CpuSched::new(CPU_OWNED_RANGES[i]));
    let _ = SCHED.init(Mutex::new(state));
}

fn check_cpu(cpu: usize) -> HvResult<()> {
    if cpu >= NUM_CPUS {
        return Err(HvError::BadAccess {
            what: "cpu",
            value: cpu as u32,
        });
    }
    Ok(())
}

fn not_initialized() -> HvError {
    HvError::NotInitialized { subsystem: "sched" }
}

/// The guest currently running on `cpu`, or `Vmid::INVALID` before the
/// first dispatch.
pub fn current_vmid(cpu: usize) -> HvResult<Vmid> {
    check_cpu(cpu)?;
    SCHED
        .with(|s| s.lock()[cpu].current)
        .ok_or_else(not_initialized)
}

/// Request a switch to `vmid` on `cpu`. If `lock` is set, further switch
/// requests are ignored until the next successful dispatch. A request
/// arriving while already locked is itself ignored (idempotence).
pub fn request_switch(cpu: usize, vmid: Vmid, lock: bool) -> HvResult<()> {
    check_cpu(cpu)?;
    SCHED
        .with(|s| {
            let mut g = s.lock();
            let st = &mut g[cpu];
            if st.switch_locked {
                return;
            }
            st.next = vmid;
            if lock {
                st.switch_locked = true;
            }
        })
        .ok_or_else(not_initialized)
}

/// Pin `cpu`'s round-robin to a single guest (or clear the pin with `None`).
pub fn set_manual_override(cpu: usize, vmid: Option<Vmid>) -> HvResult<()> {
    check_cpu(cpu)?;
    SCHED
        .with(|s| s.lock()[cpu].manual_override = vmid)
        .ok_or_else(not_initialized)
}

/// Invoked from the host timer IRQ handler: computes the next round-robin
/// target and defers the switch. A request already in flight under
/// `switch_locked` is left untouched.
pub fn on_timer_tick(cpu: usize) -> HvResult<()> {
    check_cpu(cpu)?;
    SCHED
        .with(|s| {
            let mut g = s.lock();
            let picked = g[cpu].policy_pick_next();
            let st = &mut g[cpu];
            if !st.switch_locked {
                st.next = picked;
            }
        })
        .ok_or_else(not_initialized)
}

/// Select the first guest owned by `cpu` and perform the initial dispatch.
/// Returns the register state the CPU should resume with.
pub fn sched_start(cpu: usize) -> HvResult<ArchRegs> {
    check_cpu(cpu)?;
    let first = SCHED
        .with(|s| Vmid::new(s.lock()[cpu].owned.first))
        .ok_or_else(not_initialized)?;
    request_switch(cpu, first, false)?;
    on_trap_exit(cpu, &ArchRegs::default())
}

/// If a switch is pending (`next` set and different from `current`, or this
/// is the first dispatch on `cpu`), save the outgoing guest, restore the
/// incoming one, and clear both `next` and `switch_locked`. Otherwise
/// returns `live` unchanged.
pub fn on_trap_exit(cpu: usize, live: &ArchRegs) -> HvResult<ArchRegs> {
    check_cpu(cpu)?;
    let (current, next) = SCHED
        .with(|s| {
            let g = s.lock();
            (g[cpu].current, g[cpu].next)
        })
        .ok_or_else(not_initialized)?;

    let should_switch = next.is_valid() && (current == Vmid::INVALID || next != current);
    if !should_switch {
        return Ok(*live);
    }

    if current.is_valid() {
        table::save(current, live)?;
    }
    let mut restored = table::restore(next)?;
    let _ = crate::vdev::vgic_cpu_iface::deliver_pending(next, &mut restored);

    SCHED
        .with(|s| {
            let mut g = s.lock();
            g[cpu].current = next;
            g[cpu].next = Vmid::INVALID;
            g[cpu].switch_locked = false;
        })
        .ok_or_else(not_initialized)?;

    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() {
        let _ = SCHED.with(|s| {
            let mut g = s.lock();
            for (i, st) in g.iter_mut().enumerate() {
                *st = CpuSched::new(CPU_OWNED_RANGES[i]);
            }
        });
        if !SCHED.is_initialized() {
            init();
        }
        table::init();
    }

    #[test]
    fn first_dispatch_runs_owned_first_guest() {
        fresh();
        let regs = sched_start(0).unwrap();
        let _ = regs;
        assert_eq!(current_vmid(0).unwrap(), Vmid::new(0));
    }

    /// S4 -- EOI drains pending, continued: once the scheduler actually
    /// dispatches to a guest with a queued VIRQ and nothing in flight, the
    /// queued VIRQ is delivered into the resuming trap frame before the
    /// guest sees it, rather than waiting for some later trap.
    #[test]
    fn dispatch_delivers_one_pending_virq_to_the_incoming_guest() {
        fresh();
        sched_start(0).unwrap();
        crate::irq::pirq_virq_map::init();
        crate::irq::pirq_virq_map::map(Vmid::new(1), 39, 37).unwrap();
        assert!(crate::vdev::vgic_cpu_iface::push_pending(Vmid::new(1), 37).unwrap());

        request_switch(0, Vmid::new(1), false).unwrap();
        let resumed = on_trap_exit(0, &ArchRegs::default()).unwrap();

        assert_eq!(current_vmid(0).unwrap(), Vmid::new(1));
        assert_eq!(resumed.pc, crate::config::IRQ_VECTOR_ADDR);
        assert!(!crate::vdev::vgic_cpu_iface::is_spurious(Vmid::new(1)).unwrap());
    }

    #[test]
    fn switch_lock_is_idempotent() {
        fresh();
        sched_start(0).unwrap();
        request_switch(0, Vmid::new(0), true).unwrap();
        // Further requests while locked are no-ops.
        request_switch(0, Vmid::new(0), false).unwrap();
        let before = on_trap_exit(0, &ArchRegs::default()).unwrap();
        let _ = before;
        // The dispatch cleared the lock; a fresh request now takes effect.
        request_switch(0, Vmid::new(0), false).unwrap();
    }

    #[test]
    fn round_robin_cycles_owned_range() {
        // CPU 1's owned range in the board table is a single guest (vmid 1);
        // exercise CPU 0 instead by overriding its range via manual_override
        // disabled and relying on the single-guest default range per CPU.
        fresh();
        sched_start(0).unwrap();
        assert_eq!(current_vmid(0).unwrap(), Vmid::new(0));
        on_timer_tick(0).unwrap();
        let regs = on_trap_exit(0, &ArchRegs::default()).unwrap();
        let _ = regs;
        // CPU 0 only owns vmid 0 on the reference board, so round-robin
        // wraps back to the same guest.
        assert_eq!(current_vmid(0).unwrap(), Vmid::new(0));
    }

    proptest::proptest! {
        /// Over any owned range and any number of ticks, round-robin visits
        /// every guest in the range before repeating any of them.
        #[test]
        fn round_robin_visits_every_owned_guest_before_repeating(
            last in 0u8..8,
            ticks in 0usize..64,
        ) {
            let mut st = CpuSched::new(CpuOwnedRange { first: 0, last });
            let span = (last as usize) + 1;
            let mut seen_this_lap = [false; 8];
            for i in 0..ticks {
                let next = st.policy_pick_next();
                st.current = next;
                let idx = next.as_u8() as usize;
                proptest::prop_assert!(idx <= last as usize);
                if i % span == 0 {
                    seen_this_lap = [false; 8];
                }
                proptest::prop_assert!(!seen_this_lap[idx], "guest {} repeated within one lap", idx);
                seen_this_lap[idx] = true;
            }
        }
    }
}

//! Bare-metal entry point for the reference Cortex-A15x2/GICv2 board.
//!
//! The boot loader hands control to `_start` in HYP mode with MMU and
//! caches off. This file wires the low-level exception trampoline to the
//! library's `irq::isr` and `sched` modules and performs the one-time
//! bring-up sequence: heap, logging, GIC, guest images, scheduler.

#![no_std]
#![no_main]

use arndale_hv::arch::arm::{gic, regs as cpu_regs, timer};
use arndale_hv::config::{GUEST_IMAGES, GUEST_SCHED_TICK_US, N_MAX};
use arndale_hv::irq::isr;
use arndale_hv::log_service::LogLevel;
use arndale_hv::sched;
use arndale_hv::vdev;
use arndale_hv::vm::context::ArchRegs;
use arndale_hv::vm::{table, Vmid};
use arndale_hv::{arch, hv_init, hvlog};

/// Heap region for the boot CPU's allocator. Carved out of DRAM above the
/// guest images statically configured in `config::GUEST_IMAGES`.
const HEAP_START: usize = 0x4800_0000;
const HEAP_SIZE: usize = 0x0010_0000;

// `hyp_vectors` is this hypervisor's own exception vector table, installed
// into HVBAR below -- architecturally separate from the per-guest VBAR that
// `vm::context::GuestContext` owns and restores on every context switch.
// Physical IRQ still reaches `irq_trampoline` through the classic vector
// convention this board already wires outside HVBAR (HCR.IMO routes
// physical interrupts to classic IRQ mode, not Hyp mode, on this board);
// the only slot this table newly serves is Hyp Trap, where a guest's
// stage-2 MMIO fault actually lands.
core::arch::global_asm!(
    r#"
.section .text._start
.global _start
_start:
    // Enter supervisor mode with IRQ/FIQ masked, each banked stack set up
    // below HYP -- the hypervisor itself runs in HYP mode for everything
    // past this point, these banks are only needed so a guest fault into
    // one of them lands on a valid stack.
    cps #0x13
    ldr sp, =__stack_svc_top
    cps #0x17
    ldr sp, =__stack_abt_top
    cps #0x1b
    ldr sp, =__stack_und_top
    cps #0x12
    ldr sp, =__stack_irq_top
    cps #0x1a
    ldr sp, =__stack_hyp_top
    b rust_entry

.section .text.hyp_vectors
.align 5
.global hyp_vectors
hyp_vectors:
    b .                    // reset: never entered as an exception
    b .                    // undefined instruction
    b .                    // hyp/smc call -- no host-side handler yet
    b .                    // prefetch abort
    b .                    // data abort taken while already in Hyp mode
    b dabt_trampoline      // hyp trap -- stage-2 faults from a guest land here
    b .                    // irq: routed to classic IRQ mode, not here
    b .                    // fiq

.section .text.irq_trampoline
.global irq_trampoline
irq_trampoline:
    // IRQ entry: lr_irq = interrupted_pc + 4 (ARM IRQ banking convention).
    sub lr, lr, #4
    srsdb sp!, #0x12
    push {{r0-r12}}
    mov r0, sp
    bl rust_irq_handler
    pop {{r0-r12}}
    rfeia sp!

.section .text.dabt_trampoline
.global dabt_trampoline
dabt_trampoline:
    // Hyp mode trap entry: ELR_hyp/SPSR_hyp already hold the faulting
    // state, no pipeline-offset adjustment or SRS/RFE banking needed.
    push {{r0-r12, lr}}
    mov r0, sp
    bl rust_data_abort_handler
    pop {{r0-r12, lr}}
    eret
"#
);

/// The raw register frame `dabt_trampoline` pushes: `r0-r12` followed by
/// `lr`, in push order. Distinct from [`ArchRegs`] because Hyp mode's own
/// `ELR_hyp`/`SPSR_hyp` carry the faulting `pc`/`cpsr` and are never pushed
/// to the stack.
#[repr(C)]
struct FaultFrame {
    r: [u32; 13],
    lr: u32,
}

fn fault_reg(frame: &FaultFrame, srt: usize) -> u32 {
    match srt {
        0..=12 => frame.r[srt],
        14 => frame.lr,
        _ => 0,
    }
}

fn set_fault_reg(frame: &mut FaultFrame, srt: usize, value: u32) {
    match srt {
        0..=12 => frame.r[srt] = value,
        14 => frame.lr = value,
        _ => {}
    }
}

extern "C" {
    /// The `hyp_vectors` table defined above; only its address is used.
    static hyp_vectors: u8;
}

/// Called once, on the boot CPU, after the asm prologue has set up banked
/// stacks. Never returns: ends by entering the first scheduled guest.
#[no_mangle]
pub extern "C" fn rust_entry() -> ! {
    arndale_hv::init_heap(HEAP_START, HEAP_SIZE);

    if let Err(e) = hv_init() {
        panic!("hv_init failed: {e}");
    }

    // SAFETY: `hyp_vectors` is a linker symbol, not a real `u8`; only its
    // address is taken, never dereferenced.
    cpu_regs::write_hvbar(unsafe { &hyp_vectors as *const u8 as u32 });

    for image in GUEST_IMAGES.iter() {
        let vmid = Vmid::new(image.vmid);
        if let Err(e) = table::reset(vmid, image.entry_pa as u32) {
            hvlog!(LogLevel::Error, "boot", "failed to reset guest context");
            let _ = e;
        }
    }

    for pirq in 0..N_MAX as u16 {
        let _ = arndale_hv::irq::pirq_virq_map::map(Vmid::new(pirq as u8), 32 + pirq, 32 + pirq);
        let _ = arndale_hv::irq::pirq_virq_map::set_enabled(Vmid::new(pirq as u8), 32 + pirq, true);
        let _ = gic::enable_irq((32 + pirq) as u32);
    }
    let _ = gic::enable_irq(arndale_hv::config::TIMER_PIRQ);

    timer::setup_timer(GUEST_SCHED_TICK_US);

    hvlog!(LogLevel::Info, "boot", "bring-up complete, starting scheduler");

    let cpu = cpu_regs::cpu_id();
    let entry_regs = sched::sched_start(cpu).unwrap_or_default();
    enter_guest(&entry_regs)
}

/// Dispatched from `irq_trampoline` with `regs` pointing at the saved
/// `{r0-r12, lr, pc, cpsr}` frame on the IRQ stack (the SRS/RFE layout
/// matches [`ArchRegs`]'s field order).
#[no_mangle]
pub extern "C" fn rust_irq_handler(regs: *mut ArchRegs) {
    // SAFETY: `irq_trampoline` passes the address of a live, correctly laid
    // out `ArchRegs`-shaped frame it just pushed onto the IRQ stack.
    let live = unsafe { &mut *regs };
    let cpu = cpu_regs::cpu_id();

    let dispatch_requested = isr::handle_irq(cpu, live);
    if dispatch_requested {
        if let Ok(new_regs) = sched::on_trap_exit(cpu, live) {
            *live = new_regs;
        }
    }
}

/// Dispatched from `dabt_trampoline` on a Hyp Trap exception -- on this
/// board, a guest's stage-2 MMIO fault. Decodes the syndrome, routes the
/// access to the owning [`vdev`] module, and writes the result back into
/// the faulting instruction's destination register before resuming.
#[no_mangle]
pub extern "C" fn rust_data_abort_handler(frame: *mut FaultFrame) {
    // SAFETY: `dabt_trampoline` passes the address of the `{r0-r12, lr}`
    // frame it just pushed onto the current Hyp stack.
    let frame = unsafe { &mut *frame };
    let cpu = cpu_regs::cpu_id();

    let vmid = match sched::current_vmid(cpu) {
        Ok(vmid) => vmid,
        Err(_) => return,
    };

    let hsr = cpu_regs::read_hsr();
    let isv = hsr & (1 << 24) != 0;
    if !isv {
        hvlog!(
            LogLevel::Warn,
            "dabt",
            "fault syndrome has no valid ISS, cannot emulate"
        );
        return;
    }

    let wnr = hsr & (1 << 6) != 0;
    let sas = (hsr >> 22) & 0x3;
    let srt = ((hsr >> 16) & 0xF) as usize;
    let size: usize = match sas {
        0 => 1,
        1 => 2,
        _ => 4,
    };

    let hpfar = cpu_regs::read_hpfar();
    let hdfar = cpu_regs::read_hdfar();
    let fault_ipa = (((hpfar >> 4) << 12) | (hdfar & 0xFFF)) as usize;

    let mut regs = ArchRegs {
        pc: cpu_regs::read_elr_hyp(),
        cpsr: cpu_regs::read_spsr_hyp(),
        ..ArchRegs::default()
    };

    let result = if wnr {
        let value = fault_reg(frame, srt);
        vdev::dispatch_write(vmid, fault_ipa, size, value, &mut regs)
    } else {
        vdev::dispatch_read(vmid, fault_ipa, size, &mut regs).map(|value| {
            set_fault_reg(frame, srt, value);
        })
    };

    if result.is_err() {
        hvlog!(
            LogLevel::Warn,
            "dabt",
            "no vdev module claims this fault address, leaving it unhandled"
        );
        return;
    }

    cpu_regs::write_elr_hyp(regs.pc);
    cpu_regs::write_spsr_hyp(regs.cpsr);
}

/// Enter HYP-to-guest transition via `ERET`, restoring the guest's `cpsr`
/// and jumping to its `pc`. Never returns.
fn enter_guest(regs: &ArchRegs) -> ! {
    // SAFETY: `regs` was produced by `vm::context::GuestContext::restore`
    // (via `sched::sched_start`/`on_trap_exit`), so every banked register
    // referenced by the guest's `cpsr` mode has already been written.
    unsafe {
        core::arch::asm!(
            "msr elr_hyp, {pc}",
            "msr spsr_hyp, {cpsr}",
            "eret",
            pc = in(reg) regs.pc,
            cpsr = in(reg) regs.cpsr,
            in("r0") regs.r[0],
            options(noreturn),
        );
    }
}

#[allow(unused)]
fn halt_on_unsupported_cpu() -> ! {
    hvlog!(LogLevel::Error, "boot", "unsupported cpu, halting");
    arch::halt()
}

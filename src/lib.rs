//! Core library for a small Type-1 hypervisor targeting ARMv7
//! virtualization-extension platforms (Cortex-A15 class, GICv2).
//!
//! Built `#![no_std]` for the real target; compiled against `std` under
//! `cargo test` so the pure-logic pieces (the VM table, the scheduler, the
//! PIRQ/VIRQ map, the vdev registry) can be exercised on the host without
//! touching hardware. See `arch::arm::regs` for the cfg pattern that makes
//! this split possible down to the individual register accessor.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(all(not(test), feature = "alloc"), feature(alloc_error_handler))]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod irq;
pub mod log_service;
pub mod print;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod vdev;
pub mod vm;

/// Bring up the subsystems a CPU needs before it can run guests:
/// structured logging, the VM context table, the PIRQ/VIRQ map, the
/// scheduler, and (once, system-wide) the vdev registry and GICv2.
///
/// Idempotent per subsystem; safe to call on every CPU's boot path even
/// though most of this state is shared system-wide rather than per-CPU.
pub fn hv_init() -> error::HvResult<()> {
    log_service::log_init();
    vm::table::init();
    irq::pirq_virq_map::init();
    sched::init();
    #[cfg(feature = "alloc")]
    vdev::init();
    arch::arm::gic::init()?;
    Ok(())
}

#[cfg(all(not(test), feature = "alloc"))]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Hand the allocator a region of free physical memory. Must be called
/// once, before any allocation, from the boot CPU only.
#[cfg(all(not(test), feature = "alloc"))]
pub fn init_heap(heap_start: usize, heap_size: usize) {
    // SAFETY: caller guarantees `heap_start..heap_start + heap_size` is
    // free, owned physical memory not otherwise in use.
    unsafe {
        ALLOCATOR.lock().init(heap_start as *mut u8, heap_size);
    }
}

#[cfg(all(not(test), feature = "alloc"))]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    hvprintln!("out of memory: {} bytes requested", layout.size());
    arch::halt()
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    hvprintln!("panic: {info}");
    arch::halt()
}

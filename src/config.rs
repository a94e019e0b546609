//! Board configuration for the reference platform (Cortex-A15x2, GICv2,
//! PL011 UART — the Arndale-class layout `vdev_cpu_interface.c` targets).
//!
//! Every address and sizing constant a board port would need to touch lives
//! here; nothing elsewhere in the crate hard-codes a platform address.

/// Maximum number of guest VMs this core can multiplex.
pub const N_MAX: usize = 2;

/// Sentinel meaning "no current guest" for a per-CPU scheduler slot.
pub const INVALID_VMID: u8 = 0xFF;

/// Number of physical CPUs this core drives.
pub const NUM_CPUS: usize = 2;

/// Upper bound on IRQ numbers (PIRQ and VIRQ share this range).
pub const MAX_IRQS: usize = 128;

/// Upper bound on the private-peripheral-interrupt range (SGI+PPI).
pub const MAX_PPI_IRQS: usize = 32;

/// Sentinel meaning "unmapped" in the PIRQ<->VIRQ table.
pub const INVALID_IRQ: u16 = 0xFFFF;

/// GIC spurious interrupt id, returned by IAR when nothing is pending.
pub const GIC_SPURIOUS_IRQ: u32 = 0x3FF;

/// PPI id of the ARMv7 generic timer's non-secure physical timer, the
/// source of the scheduler's preemption tick. Owned by the host, never
/// forwarded to a guest.
pub const TIMER_PIRQ: u32 = 30;

/// GIC distributor base address.
pub const GICD_BASE: usize = 0x2C001000;

/// GIC CPU interface base address.
pub const GICC_BASE: usize = 0x2C002000;

/// Size, in bytes, of the CPU-interface MMIO window trapped for guests.
pub const CPU_INTERFACE_SIZE: usize = 0x1000;

/// PL011 UART base address used by the host console and the UART gate vdev.
pub const UART_BASE: usize = 0x12C20000;

/// ARM high-vector IRQ entry address (`0xFFFF0018`), architecturally fixed.
pub const IRQ_VECTOR_ADDR: u32 = 0xFFFF_0018;

/// Scheduler tick interval, in microseconds.
pub const GUEST_SCHED_TICK_US: u32 = 10_000;

/// Bound on a single guest's pending-VIRQ queue.
pub const PENDING_MAX: usize = 50;

/// The inclusive VMID range statically pinned to one physical CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuOwnedRange {
    pub first: u8,
    pub last: u8,
}

/// Per-CPU static VMID ownership for the reference two-guest, two-CPU board:
/// CPU 0 owns guest 0, CPU 1 owns guest 1. Neither CPU schedules the other's
/// guest, matching the "no cross-CPU migration" constraint in the design.
pub const CPU_OWNED_RANGES: [CpuOwnedRange; NUM_CPUS] = [
    CpuOwnedRange { first: 0, last: 0 },
    CpuOwnedRange { first: 1, last: 1 },
];

/// Describes where a guest's pre-loaded image lives in physical memory.
///
/// The loader that actually stages guest images and builds stage-2 mappings
/// is out of scope for this crate; this type is the contract boundary a
/// loader implementation is expected to satisfy.
#[derive(Debug, Clone, Copy)]
pub struct GuestImage {
    pub vmid: u8,
    pub load_pa: usize,
    pub entry_pa: usize,
    pub image_size: usize,
}

/// A single stage-2 memory descriptor: `{label, ipa, pa, size, attr}`.
///
/// Stage-2 page table construction from a list of these is out of scope;
/// this type only records the shape of the contract.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDescriptor {
    pub label: &'static str,
    pub ipa: usize,
    pub pa: usize,
    pub size: usize,
    pub device: bool,
}

/// Static guest image table for the reference board.
pub const GUEST_IMAGES: [GuestImage; N_MAX] = [
    GuestImage {
        vmid: 0,
        load_pa: 0x4100_0000,
        entry_pa: 0x4100_0000,
        image_size: 0x0020_0000,
    },
    GuestImage {
        vmid: 1,
        load_pa: 0x4200_0000,
        entry_pa: 0x4200_0000,
        image_size: 0x0020_0000,
    },
];

//! Periodic host timer driver (ARMv7 generic/private timer).
//!
//! Programs the CP15 physical timer (`CNTFRQ`/`CNTP_TVAL`/`CNTP_CTL`) to
//! fire at [`crate::config::GUEST_SCHED_TICK_US`] and feeds each tick to
//! [`crate::sched::on_timer_tick`].

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Number of timer ticks observed since boot.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Called from the host timer IRQ handler.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Program the timer for periodic interrupts at `interval_us` microseconds.
pub fn setup_timer(interval_us: u32) {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let cntfrq: u32;
        // SAFETY: CNTFRQ is readable from any privilege level on ARMv7-VE.
        unsafe {
            core::arch::asm!("mrc p15, 0, {0}, c14, c0, 0", out(reg) cntfrq);
        }

        let tval = ((cntfrq as u64) * interval_us as u64) / 1_000_000;

        // SAFETY: CNTP_TVAL and CNTP_CTL are writable from HYP mode and
        // only affect this CPU's private physical timer.
        unsafe {
            core::arch::asm!("mcr p15, 0, {0}, c14, c2, 0", in(reg) tval as u32);
            core::arch::asm!("mcr p15, 0, {0}, c14, c2, 1", in(reg) 1u32);
        }
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        let _ = interval_us;
    }
}

//! Architecture support.

pub mod arm;

/// Halt the current physical CPU forever (used after a fatal boot error).
pub fn halt() -> ! {
    loop {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        // SAFETY: `wfe` is a non-destructive architectural hint; it only
        // suspends the core until the next event/interrupt.
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack, preserves_flags));
        }
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}

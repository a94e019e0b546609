//! Banked-register and CP15 coprocessor primitives for ARMv7-VE.
//!
//! These are thin, safe wrappers over the exact MRS/MSR/MRC/MCR mnemonics a
//! HYP-mode trap handler needs to save and restore a guest's mode-banked
//! register set. On non-ARM hosts (used for the crate's pure-logic unit
//! tests) every function is a harmless stub — nothing here is exercised off
//! target hardware.

/// Data synchronization barrier.
pub fn dsb() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    // SAFETY: DSB is a non-destructive architectural barrier instruction.
    unsafe {
        core::arch::asm!("dsb", options(nostack, preserves_flags));
    }
}

/// Instruction synchronization barrier.
pub fn isb() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    // SAFETY: ISB is a non-destructive architectural barrier instruction.
    unsafe {
        core::arch::asm!("isb", options(nostack, preserves_flags));
    }
}

macro_rules! banked_accessor {
    ($get:ident, $set:ident, $mnemonic:literal) => {
        #[allow(dead_code)]
        pub fn $get() -> u32 {
            #[cfg(all(target_arch = "arm", target_os = "none"))]
            {
                let value: u32;
                // SAFETY: reads a banked register that exists in every
                // ARMv7-VE implementation; the mnemonic names the exact
                // mode-banked register documented in the ARM ARM.
                unsafe {
                    core::arch::asm!(concat!("mrs {0}, ", $mnemonic), out(reg) value);
                }
                value
            }
            #[cfg(not(all(target_arch = "arm", target_os = "none")))]
            {
                0
            }
        }

        #[allow(dead_code)]
        pub fn $set(_value: u32) {
            #[cfg(all(target_arch = "arm", target_os = "none"))]
            // SAFETY: writes a banked register that exists in every
            // ARMv7-VE implementation; this only affects the named mode's
            // shadow copy, never the currently active register file.
            unsafe {
                core::arch::asm!(concat!("msr ", $mnemonic, ", {0}"), in(reg) _value);
            }
        }
    };
}

banked_accessor!(read_sp_usr, write_sp_usr, "sp_usr");

banked_accessor!(read_spsr_svc, write_spsr_svc, "spsr_svc");
banked_accessor!(read_sp_svc, write_sp_svc, "sp_svc");
banked_accessor!(read_lr_svc, write_lr_svc, "lr_svc");

banked_accessor!(read_spsr_abt, write_spsr_abt, "spsr_abt");
banked_accessor!(read_sp_abt, write_sp_abt, "sp_abt");
banked_accessor!(read_lr_abt, write_lr_abt, "lr_abt");

banked_accessor!(read_spsr_und, write_spsr_und, "spsr_und");
banked_accessor!(read_sp_und, write_sp_und, "sp_und");
banked_accessor!(read_lr_und, write_lr_und, "lr_und");

banked_accessor!(read_spsr_irq, write_spsr_irq, "spsr_irq");
banked_accessor!(read_sp_irq, write_sp_irq, "sp_irq");
banked_accessor!(read_lr_irq, write_lr_irq, "lr_irq");

banked_accessor!(read_elr_hyp, write_elr_hyp, "elr_hyp");
banked_accessor!(read_spsr_hyp, write_spsr_hyp, "spsr_hyp");

banked_accessor!(read_spsr_fiq, write_spsr_fiq, "spsr_fiq");
banked_accessor!(read_lr_fiq, write_lr_fiq, "lr_fiq");
banked_accessor!(read_r8_fiq, write_r8_fiq, "r8_fiq");
banked_accessor!(read_r9_fiq, write_r9_fiq, "r9_fiq");
banked_accessor!(read_r10_fiq, write_r10_fiq, "r10_fiq");
banked_accessor!(read_r11_fiq, write_r11_fiq, "r11_fiq");
banked_accessor!(read_r12_fiq, write_r12_fiq, "r12_fiq");

macro_rules! cp15_accessor {
    ($get:ident, $set:ident, $crn:literal, $crm:literal, $op2:literal) => {
        #[allow(dead_code)]
        pub fn $get() -> u32 {
            #[cfg(all(target_arch = "arm", target_os = "none"))]
            {
                let value: u32;
                // SAFETY: reads a CP15 register that is present and
                // accessible from HYP mode on every ARMv7-VE implementation.
                unsafe {
                    core::arch::asm!(
                        concat!("mrc p15, 0, {0}, ", $crn, ", ", $crm, ", ", $op2),
                        out(reg) value,
                    );
                }
                value
            }
            #[cfg(not(all(target_arch = "arm", target_os = "none")))]
            {
                0
            }
        }

        #[allow(dead_code)]
        pub fn $set(_value: u32) {
            #[cfg(all(target_arch = "arm", target_os = "none"))]
            {
                // SAFETY: writes a CP15 register that is present and
                // accessible from HYP mode; the caller is responsible for
                // the architectural effect of the new value (e.g. changing
                // the active translation tables).
                unsafe {
                    core::arch::asm!(
                        concat!("mcr p15, 0, {0}, ", $crn, ", ", $crm, ", ", $op2),
                        in(reg) _value,
                    );
                }
                isb();
            }
        }
    };
}

cp15_accessor!(read_ttbr0, write_ttbr0, "c2", "c0", "0");
cp15_accessor!(read_ttbr1, write_ttbr1, "c2", "c0", "1");
cp15_accessor!(read_ttbcr, write_ttbcr, "c2", "c0", "2");
cp15_accessor!(read_sctlr, write_sctlr, "c1", "c0", "0");
cp15_accessor!(read_vbar, write_vbar, "c12", "c0", "0");

/// Hyp mode's own vector base, banked separately from the per-guest `VBAR`
/// above: `VBAR` is restored from each guest's `CopRegs` on every context
/// switch, so the hypervisor's own exception vectors can never live there.
pub fn write_hvbar(value: u32) {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    // SAFETY: HVBAR is writable from Hyp mode only; must be 32-byte aligned,
    // which the linked vector table symbol is (`.align 5`).
    unsafe {
        core::arch::asm!("mcr p15, 4, {0}, c12, c0, 0", in(reg) value);
        isb();
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        let _ = value;
    }
}

/// Hyp Syndrome Register: exception class and instruction-specific syndrome
/// for whatever trap most recently landed in Hyp mode.
pub fn read_hsr() -> u32 {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let value: u32;
        // SAFETY: HSR is readable from Hyp mode unconditionally.
        unsafe {
            core::arch::asm!("mrc p15, 4, {0}, c5, c2, 0", out(reg) value);
        }
        value
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        0
    }
}

/// Hyp Data Fault Address Register: the faulting virtual address's page
/// offset is valid here even when the upper bits are not.
pub fn read_hdfar() -> u32 {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let value: u32;
        // SAFETY: HDFAR is readable from Hyp mode unconditionally.
        unsafe {
            core::arch::asm!("mrc p15, 4, {0}, c6, c0, 0", out(reg) value);
        }
        value
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        0
    }
}

/// Hyp IPA Fault Address Register: bits [39:12] of the faulting intermediate
/// physical address, right-shifted by 4 (so `(hpfar >> 4) << 12` recovers
/// the page base).
pub fn read_hpfar() -> u32 {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let value: u32;
        // SAFETY: HPFAR is readable from Hyp mode unconditionally.
        unsafe {
            core::arch::asm!("mrc p15, 4, {0}, c6, c0, 4", out(reg) value);
        }
        value
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        0
    }
}

/// The physical CPU id this core is executing on (MPIDR affinity level 0).
pub fn cpu_id() -> usize {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let mpidr: u32;
        // SAFETY: MRC of MPIDR is always valid and read-only.
        unsafe {
            core::arch::asm!("mrc p15, 0, {0}, c0, c0, 5", out(reg) mpidr);
        }
        (mpidr & 0x3) as usize
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        0
    }
}

/// Read the current processor status register.
pub fn read_cpsr() -> u32 {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let value: u32;
        // SAFETY: MRS of CPSR is always valid.
        unsafe {
            core::arch::asm!("mrs {0}, cpsr", out(reg) value);
        }
        value
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        0x1D3 // SVC mode, IRQ/FIQ masked -- a harmless host-test default.
    }
}

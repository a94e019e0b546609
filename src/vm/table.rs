//! The fixed table of guest contexts and the `Vmid` identifier type.

use spin::Mutex;

use crate::config::{INVALID_VMID, N_MAX};
use crate::error::{HvError, HvResult};
use crate::sync::once_lock::GlobalState;
use crate::vm::context::GuestContext;

/// Dense guest identifier. `Vmid::INVALID` denotes "no current guest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vmid(pub u8);

impl Vmid {
    pub const INVALID: Vmid = Vmid(INVALID_VMID);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != INVALID_VMID && (self.0 as usize) < N_MAX
    }
}

impl From<u8> for Vmid {
    fn from(v: u8) -> Self {
        Vmid(v)
    }
}

impl From<Vmid> for u8 {
    fn from(v: Vmid) -> Self {
        v.0
    }
}

impl core::fmt::Display for Vmid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed array of per-guest contexts, one entry per configured VMID.
pub struct VmTable {
    contexts: [GuestContext; N_MAX],
}

impl VmTable {
    fn new() -> Self {
        Self {
            contexts: core::array::from_fn(|i| GuestContext::empty(i as u8)),
        }
    }

    fn check(vmid: Vmid) -> HvResult<usize> {
        if !vmid.is_valid() {
            return Err(HvError::BadAccess {
                what: "vmid",
                value: vmid.0 as u32,
            });
        }
        Ok(vmid.0 as usize)
    }

    pub fn reset(&mut self, vmid: Vmid, entry_pc: u32) -> HvResult<()> {
        let i = Self::check(vmid)?;
        self.contexts[i].reset(entry_pc);
        Ok(())
    }

    pub fn save(&mut self, vmid: Vmid, live: &crate::vm::context::ArchRegs) -> HvResult<()> {
        let i = Self::check(vmid)?;
        self.contexts[i].save(live);
        Ok(())
    }

    pub fn restore(&self, vmid: Vmid) -> HvResult<crate::vm::context::ArchRegs> {
        let i = Self::check(vmid)?;
        Ok(self.contexts[i].restore())
    }

    pub fn copy(&mut self, dst: Vmid, src: Vmid) -> HvResult<()> {
        let si = Self::check(src)?;
        let di = Self::check(dst)?;
        let src_ctx = self.contexts[si].clone();
        let dst_vmid = self.contexts[di].vmid;
        self.contexts[di] = src_ctx;
        self.contexts[di].vmid = dst_vmid;
        Ok(())
    }

    pub fn with<R>(&self, vmid: Vmid, f: impl FnOnce(&GuestContext) -> R) -> HvResult<R> {
        let i = Self::check(vmid)?;
        Ok(f(&self.contexts[i]))
    }

    pub fn with_mut<R>(&mut self, vmid: Vmid, f: impl FnOnce(&mut GuestContext) -> R) -> HvResult<R> {
        let i = Self::check(vmid)?;
        Ok(f(&mut self.contexts[i]))
    }
}

static VM_TABLE: GlobalState<Mutex<VmTable>> = GlobalState::new();

/// Initialize the VM table. Idempotent: returns `Ok(())` even if already
/// initialized, matching the teacher's "only the first boot CPU does this"
/// convention for once-per-system setup.
pub fn init() {
    let _ = VM_TABLE.init(Mutex::new(VmTable::new()));
}

pub fn with<R>(vmid: Vmid, f: impl FnOnce(&GuestContext) -> R) -> HvResult<R> {
    VM_TABLE
        .with(|t| t.lock().with(vmid, f))
        .ok_or(HvError::NotInitialized { subsystem: "vm_table" })?
}

pub fn with_mut<R>(vmid: Vmid, f: impl FnOnce(&mut GuestContext) -> R) -> HvResult<R> {
    VM_TABLE
        .with(|t| t.lock().with_mut(vmid, f))
        .ok_or(HvError::NotInitialized { subsystem: "vm_table" })?
}

pub fn reset(vmid: Vmid, entry_pc: u32) -> HvResult<()> {
    VM_TABLE
        .with(|t| t.lock().reset(vmid, entry_pc))
        .ok_or(HvError::NotInitialized { subsystem: "vm_table" })?
}

pub fn save(vmid: Vmid, live: &crate::vm::context::ArchRegs) -> HvResult<()> {
    VM_TABLE
        .with(|t| t.lock().save(vmid, live))
        .ok_or(HvError::NotInitialized { subsystem: "vm_table" })?
}

pub fn restore(vmid: Vmid) -> HvResult<crate::vm::context::ArchRegs> {
    VM_TABLE
        .with(|t| t.lock().restore(vmid))
        .ok_or(HvError::NotInitialized { subsystem: "vm_table" })?
}

pub fn copy(dst: Vmid, src: Vmid) -> HvResult<()> {
    VM_TABLE
        .with(|t| t.lock().copy(dst, src))
        .ok_or(HvError::NotInitialized { subsystem: "vm_table" })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_vmid() {
        let mut table = VmTable::new();
        let err = table.reset(Vmid::new(200), 0).unwrap_err();
        assert_eq!(
            err,
            HvError::BadAccess {
                what: "vmid",
                value: 200
            }
        );
    }

    #[test]
    fn copy_preserves_destination_identity() {
        let mut table = VmTable::new();
        table.reset(Vmid::new(0), 0x1000).unwrap();
        table.copy(Vmid::new(1), Vmid::new(0)).unwrap();
        let dst_pc = table.with(Vmid::new(1), |c| (c.vmid, c.arch_regs.pc)).unwrap();
        assert_eq!(dst_pc, (1, 0x1000));
    }
}

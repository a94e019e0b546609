//! Safe global-state cells for `no_std`.
//!
//! [`GlobalState<T>`] is the workhorse: every per-CPU-independent singleton
//! in this crate (the host GIC driver, the VM table, the PIRQ/VIRQ map, the
//! vdev registry) is a `static GlobalState<Mutex<T>>` initialized once during
//! boot and accessed through `with`/`with_mut` thereafter. [`OnceLock`] and
//! [`LazyLock`] additionally require the `alloc` feature since they box
//! their contents.

#![allow(clippy::needless_lifetimes)]

use spin::Mutex;

#[cfg(feature = "alloc")]
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicPtr, Ordering},
};

/// A cell that can be written to only once.
#[cfg(feature = "alloc")]
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

#[cfg(feature = "alloc")]
impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "alloc")]
impl<T> OnceLock<T> {
    /// Create a new empty cell.
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the value if initialized.
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: a non-null pointer was stored by `set()` via
            // `Box::into_raw()`. The Acquire load synchronizes-with the
            // Release store in `set()`, so the pointee is fully initialized.
            // The allocation is leaked until `Drop`, so the 'static borrow
            // is sound for the cell's lifetime.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell. Returns `Err(value)` if already initialized.
    pub fn set(&self, value: T) -> Result<(), T> {
        let boxed = alloc::boxed::Box::new(value);
        let ptr = alloc::boxed::Box::into_raw(boxed);

        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: `ptr` was just obtained from `Box::into_raw()` and
                // the compare_exchange failed, so no one else observed it;
                // reclaiming it here avoids leaking the allocation.
                let boxed = unsafe { alloc::boxed::Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    /// Get the value, initializing it with `f` if not already set.
    pub fn get_or_init<F>(&self, f: F) -> &'static T
    where
        F: FnOnce() -> T,
    {
        if let Some(val) = self.get() {
            return val;
        }
        let value = f();
        match self.set(value) {
            Ok(()) => self.get().expect("OnceLock get after successful set"),
            Err(_) => self.get().expect("OnceLock get after concurrent init"),
        }
    }
}

// SAFETY: the contained value is heap-allocated and reached only through an
// AtomicPtr with Acquire/Release ordering, so cross-thread transfer and
// sharing are sound whenever T itself is Send (+Sync for Sync).
#[cfg(feature = "alloc")]
unsafe impl<T: Send> Send for OnceLock<T> {}
#[cfg(feature = "alloc")]
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}

#[cfg(feature = "alloc")]
impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        let ptr = self.inner.load(Ordering::Acquire);
        if !ptr.is_null() {
            // SAFETY: `ptr` came from `Box::into_raw()` in `set()`; `drop`
            // has exclusive access, so reconstructing the Box here is sound.
            unsafe {
                let _ = alloc::boxed::Box::from_raw(ptr);
            }
        }
    }
}

/// Lazily-initialized global value.
#[cfg(feature = "alloc")]
pub struct LazyLock<T, F = fn() -> T> {
    cell: OnceLock<T>,
    init: UnsafeCell<Option<F>>,
}

#[cfg(feature = "alloc")]
impl<T: 'static, F: FnOnce() -> T> LazyLock<T, F> {
    /// Create a new lazy cell with the given initializer.
    pub const fn new(init: F) -> Self {
        Self {
            cell: OnceLock::new(),
            init: UnsafeCell::new(Some(init)),
        }
    }

    /// Force initialization (if needed) and return a reference to the value.
    pub fn force(&self) -> &T {
        self.cell.get_or_init(|| {
            // SAFETY: `get_or_init` guarantees this closure runs at most
            // once across all callers, so the `UnsafeCell` is never
            // aliased mutably while being read elsewhere.
            let init = unsafe { &mut *self.init.get() };
            match init.take() {
                Some(f) => f(),
                None => panic!("LazyLock initializer invoked twice"),
            }
        })
    }
}

#[cfg(feature = "alloc")]
impl<T: 'static, F: FnOnce() -> T> core::ops::Deref for LazyLock<T, F> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.force()
    }
}

// SAFETY: see OnceLock's Send/Sync rationale; F is consumed at most once via
// the UnsafeCell under the OnceLock's single-init guarantee.
#[cfg(feature = "alloc")]
unsafe impl<T: Send, F: Send> Send for LazyLock<T, F> {}
#[cfg(feature = "alloc")]
unsafe impl<T: Sync, F: Send> Sync for LazyLock<T, F> {}

/// Safe global state guarded by a spinlock.
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    /// Create new, uninitialized global state.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initialize the state. Returns `Err(value)` if already initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    /// Run `f` with a shared reference, if initialized.
    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        let lock = self.inner.lock();
        lock.as_ref().map(f)
    }

    /// Run `f` with a mutable reference, if initialized.
    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        let mut lock = self.inner.lock();
        lock.as_mut().map(f)
    }

    /// True once `init` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the inner spin::Mutex serializes all access to the contained
// Option<T>, so sharing and transfer across CPUs are sound whenever T: Send.
unsafe impl<T: Send> Send for GlobalState<T> {}
unsafe impl<T: Send> Sync for GlobalState<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_state_init_and_access() {
        let state: GlobalState<u32> = GlobalState::new();
        assert!(!state.is_initialized());
        assert!(state.init(7).is_ok());
        assert!(state.init(9).is_err());
        assert_eq!(state.with(|v| *v), Some(7));
        state.with_mut(|v| *v += 1);
        assert_eq!(state.with(|v| *v), Some(8));
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn once_lock_single_init() {
        let lock: OnceLock<u32> = OnceLock::new();
        assert!(lock.get().is_none());
        assert!(lock.set(42).is_ok());
        assert_eq!(*lock.get().unwrap(), 42);
        assert!(lock.set(100).is_err());
    }
}

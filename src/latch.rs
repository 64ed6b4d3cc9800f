//! Latch<T>: single-threaded mutual exclusion without atomics.
//!
//! Guards a manager's core tables and the state of an intra-thread channel.
//! Everything that touches a latch runs on the manager's own thread, so a
//! plain `Cell<bool>` is enough. Locking while already locked means the code
//! re-entered itself (for example user code ran with the core held), which is
//! a bug: it panics instead of deadlocking.

use core::cell::{Cell, UnsafeCell};
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// Single-threaded latch protecting `T`.
///
/// - !Sync: must not be shared across threads.
/// - Send if `T: Send`.
/// - Lock acquisition is non-blocking; re-entrant locking panics.
pub struct Latch<T> {
    locked: Cell<bool>,
    inner: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Latch<T> {}

impl<T> Latch<T> {
    /// Create a new latch wrapping `value`.
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            locked: Cell::new(false),
            inner: UnsafeCell::new(value),
        }
    }

    /// Attempt to acquire the latch; returns `None` if already locked.
    #[inline]
    pub fn try_lock(&self) -> Option<LatchGuard<'_, T>> {
        if self.locked.replace(true) {
            return None;
        }
        Some(LatchGuard {
            latch: self,
            _marker: PhantomData,
        })
    }

    /// Acquire the latch or panic if already locked (non-reentrant).
    #[inline]
    #[track_caller]
    pub fn lock(&self) -> LatchGuard<'_, T> {
        match self.try_lock() {
            Some(g) => g,
            None => panic!("Latch::lock: already locked (re-entered from inside a critical section)"),
        }
    }

    /// Run `f` with the latch held.
    #[inline]
    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Get a mutable reference to the inner value without locking.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the latch and return the inner value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Is the latch currently locked?
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

/// Guard returned from `Latch::lock`/`try_lock`, releases on drop.
///
/// !Send and !Sync to keep it on the owning thread.
pub struct LatchGuard<'a, T> {
    latch: &'a Latch<T>,
    _marker: PhantomData<*const ()>,
}

impl<T> Deref for LatchGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &Self::Target {
        // Safety: guard holds exclusive logical access.
        unsafe { &*self.latch.inner.get() }
    }
}

impl<T> DerefMut for LatchGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: guard holds exclusive logical access.
        unsafe { &mut *self.latch.inner.get() }
    }
}

impl<T> Drop for LatchGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        debug_assert!(self.latch.locked.get(), "LatchGuard dropped when not locked");
        self.latch.locked.set(false);
    }
}

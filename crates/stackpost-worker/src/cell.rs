//! Mutex-guarded single slot with change notification.
//!
//! [`ExclusiveCell`] is the only shared state between an engine and its
//! worker thread: the engine registers the running worker's handle in it
//! and the worker clears the handle when it retires. Every access goes
//! through a scoped [`ExclusiveGuard`]; dropping a guard unlocks the cell
//! and wakes threads blocked in [`ExclusiveCell::wait_until`], so waiting
//! for retirement parks the thread instead of spinning.

use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// A value behind a mutex, plus a condition variable signalled whenever
/// a guard is released.
#[derive(Debug, Default)]
pub struct ExclusiveCell<T> {
    value: Mutex<T>,
    changed: Condvar,
}

impl<T> ExclusiveCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            changed: Condvar::new(),
        }
    }

    /// Lock the cell for exclusive read/write access.
    pub fn lock(&self) -> ExclusiveGuard<'_, T> {
        ExclusiveGuard {
            guard: self.value.lock(),
            changed: &self.changed,
        }
    }

    /// Block until `predicate` holds for the current value, then return
    /// the guard with the cell still locked.
    pub fn wait_until<P>(&self, mut predicate: P) -> ExclusiveGuard<'_, T>
    where
        P: FnMut(&T) -> bool,
    {
        let mut guard = self.value.lock();
        while !predicate(&guard) {
            self.changed.wait(&mut guard);
        }
        ExclusiveGuard {
            guard,
            changed: &self.changed,
        }
    }
}

/// Scoped exclusive access to the value of an [`ExclusiveCell`].
///
/// Releasing the guard notifies all waiters, whether or not the value
/// was modified.
pub struct ExclusiveGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    changed: &'a Condvar,
}

impl<T> Deref for ExclusiveGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ExclusiveGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for ExclusiveGuard<'_, T> {
    fn drop(&mut self) {
        self.changed.notify_all();
    }
}

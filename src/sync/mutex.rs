//! Three-state mutex: `unlocked | locked_once | contended`.
//!
//! Unlock only needs to touch the wait queue when a waiter was actually
//! observed, which is the common uncontended path every `Mutex::lock`/
//! `unlock` pair takes.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::park;

pub(crate) const UNLOCKED: u32 = 0;
pub(crate) const LOCKED_ONCE: u32 = 1;
pub(crate) const CONTENDED: u32 = 2;

/// Acquires the three-state lock represented by a bare state word.
///
/// Shared by [`Mutex`] and [`super::reentrant::ReentrantMutex`], which both
/// need the raw CAS/park algorithm without committing to `Mutex`'s own
/// data-carrying guard type.
pub(crate) fn raw_lock(state: &AtomicU32) {
    if state
        .compare_exchange(UNLOCKED, LOCKED_ONCE, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
    {
        return;
    }

    let mut current = state.swap(CONTENDED, Ordering::Acquire);
    while current != UNLOCKED {
        park::wait(state, CONTENDED);
        current = state.swap(CONTENDED, Ordering::Acquire);
    }
}

pub(crate) fn raw_unlock(state: &AtomicU32) {
    if state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
        park::wake_one(state);
    }
}

/// Same CAS/park algorithm as [`raw_lock`], but checks `cancel` right
/// after every park wakeup and bails with `Err(Canceled)` instead of
/// retrying the CAS. A caller that sets `cancel` must also wake parked
/// waiters (see [`Mutex::interrupt`]) or they won't notice until the
/// lock is next released.
pub(crate) fn raw_lock_interruptible(state: &AtomicU32, cancel: &AtomicBool) -> Result<(), Canceled> {
    if state
        .compare_exchange(UNLOCKED, LOCKED_ONCE, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
    {
        return Ok(());
    }

    let mut current = state.swap(CONTENDED, Ordering::Acquire);
    while current != UNLOCKED {
        if cancel.load(Ordering::Relaxed) {
            return Err(Canceled);
        }
        park::wait(state, CONTENDED);
        if cancel.load(Ordering::Relaxed) {
            return Err(Canceled);
        }
        current = state.swap(CONTENDED, Ordering::Acquire);
    }
    Ok(())
}

/// Error returned when a blocking wait is interrupted during shutdown.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("operation canceled")]
pub struct Canceled;

/// A mutex whose state word distinguishes "no waiters" from "has waiters",
/// so the common uncontended `unlock` skips any wake-up work.
///
/// Only suitable for short, synchronous critical sections — never hold the
/// guard across an `.await` point.
pub struct Mutex<T> {
    state: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            data: UnsafeCell::new(value),
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED_ONCE, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    /// Acquires the lock, blocking the calling thread if necessary. Never
    /// returns early: use this for critical sections that must complete
    /// (spec.md §5's "uncancelable" variant).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        raw_lock(&self.state);
        MutexGuard { mutex: self }
    }

    /// Acquires the lock, but returns `Err(Canceled)` if `cancel` is
    /// observed `true` while parked, instead of continuing to wait. The
    /// canceling side must call [`Mutex::interrupt`] after setting the
    /// flag so a parked waiter actually wakes to check it.
    pub fn lock_interruptible(&self, cancel: &AtomicBool) -> Result<MutexGuard<'_, T>, Canceled> {
        raw_lock_interruptible(&self.state, cancel)?;
        Ok(MutexGuard { mutex: self })
    }

    /// Wakes every thread parked in [`Mutex::lock_interruptible`] so it
    /// can re-check its cancellation flag.
    pub fn interrupt(&self) {
        park::wake_all(&self.state);
    }

    fn unlock(&self) {
        raw_unlock(&self.state);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard that unlocks the mutex on every exit path, including
/// during an unwind.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn uncontended_round_trip() {
        let mutex = Mutex::new(5);
        *mutex.lock() += 1;
        assert_eq!(*mutex.lock(), 6);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = Mutex::new(0);
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn contended_increments_are_observed_in_order() {
        let mutex = Arc::new(Mutex::new(0usize));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let mutex = mutex.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..2_000 {
                    *mutex.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*mutex.lock(), 16_000);
    }

    #[test]
    fn lock_interruptible_returns_canceled_when_interrupted() {
        let mutex = Arc::new(Mutex::new(0));
        let guard = mutex.lock();
        let cancel = Arc::new(AtomicBool::new(false));

        let waiter_mutex = mutex.clone();
        let waiter_cancel = cancel.clone();
        let waiter = thread::spawn(move || waiter_mutex.lock_interruptible(&waiter_cancel).err());

        thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::Relaxed);
        mutex.interrupt();

        assert_eq!(waiter.join().unwrap(), Some(Canceled));
        drop(guard);
    }

    #[test]
    fn lock_interruptible_succeeds_when_never_canceled() {
        let mutex = Mutex::new(5);
        let cancel = AtomicBool::new(false);
        let guard = mutex.lock_interruptible(&cancel).unwrap();
        assert_eq!(*guard, 5);
    }
}

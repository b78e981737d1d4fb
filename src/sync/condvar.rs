//! Condition variable: `{waiters, epoch}`. `wait` releases the caller's
//! mutex guard, parks on the epoch, and re-acquires before returning.

use std::sync::atomic::{AtomicU32, Ordering};

use super::mutex::{Mutex, MutexGuard};
use super::park;

pub struct Condvar {
    epoch: AtomicU32,
    waiters: AtomicU32,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
        }
    }

    /// Releases `guard`'s mutex, parks until the next `signal`/`broadcast`,
    /// then re-acquires it before returning.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let observed = self.epoch.load(Ordering::SeqCst);
        drop(guard);

        park::wait(&self.epoch, observed);

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        mutex.lock()
    }

    /// Wakes one waiter, if any are registered.
    pub fn signal(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            park::wake_one(&self.epoch);
        }
    }

    /// Wakes every waiter, if any are registered.
    pub fn broadcast(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            park::wake_all(&self.epoch);
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

//! Reentrant mutex: tracks `{owner, depth}` on top of the three-state
//! mutex's raw lock/unlock algorithm.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use super::mutex::{raw_lock, raw_unlock};

const NO_OWNER: u64 = 0;

fn thread_id_as_u64(id: ThreadId) -> u64 {
    // `ThreadId` has no stable numeric representation; hash it instead.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish().max(1) // keep 0 reserved for NO_OWNER
}

/// A mutex the owning thread may lock repeatedly without deadlocking
/// itself. `depth` is only ever touched while the inner state is held by
/// the current thread, so a plain [`UnsafeCell`] suffices for it.
pub struct ReentrantMutex<T> {
    state: AtomicU32,
    owner: AtomicU64,
    depth: UnsafeCell<usize>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ReentrantMutex<T> {}
unsafe impl<T: Send> Sync for ReentrantMutex<T> {}

impl<T> ReentrantMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(0),
            owner: AtomicU64::new(NO_OWNER),
            depth: UnsafeCell::new(0),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> ReentrantGuard<'_, T> {
        let current = thread_id_as_u64(thread::current().id());

        if self.owner.load(Ordering::Acquire) == current {
            unsafe { *self.depth.get() += 1 };
            return ReentrantGuard { mutex: self };
        }

        raw_lock(&self.state);
        self.owner.store(current, Ordering::Release);
        unsafe { *self.depth.get() = 1 };
        ReentrantGuard { mutex: self }
    }

    fn unlock(&self) {
        let depth = unsafe {
            *self.depth.get() -= 1;
            *self.depth.get()
        };

        if depth == 0 {
            self.owner.store(NO_OWNER, Ordering::Release);
            raw_unlock(&self.state);
        }
    }
}

/// Guard returned by [`ReentrantMutex::lock`]; only the outermost
/// acquisition on a thread actually releases the inner lock on drop.
pub struct ReentrantGuard<'a, T> {
    mutex: &'a ReentrantMutex<T>,
}

impl<T> Deref for ReentrantGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for ReentrantGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

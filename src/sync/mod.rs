//! Blocking synchronization primitives, exposed as a first-class module
//! (spec.md §2's "Sync primitives") and used internally wherever a
//! critical section stays out of `.await` (session store maps,
//! rate-limiter buckets, pool registries, websocket broadcast
//! registries). None of these are held across an `.await` point; see
//! the crate-level docs for that invariant.

pub mod condvar;
pub mod guard;
pub mod mutex;
pub mod park;
pub mod reentrant;
pub mod rwlock;
pub mod spinlock;

pub use condvar::Condvar;
pub use guard::Scoped;
pub use mutex::{Canceled, Mutex, MutexGuard};
pub use reentrant::{ReentrantGuard, ReentrantMutex};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard};

//! Generic scope-exit helper.
//!
//! [`Mutex`](super::mutex::Mutex), [`RwLock`](super::rwlock::RwLock), and
//! [`ReentrantMutex`](super::reentrant::ReentrantMutex) all already unlock
//! via their own `Drop` impls on every exit path, including unwinding.
//! `Scoped` is the same pattern generalized to an arbitrary closure, for
//! call sites that need to release something other than one of those
//! lock types (e.g. decrementing a counter acquired alongside a lock).
pub struct Scoped<F: FnMut()> {
    on_drop: F,
}

impl<F: FnMut()> Scoped<F> {
    pub fn new(on_drop: F) -> Self {
        Self { on_drop }
    }
}

impl<F: FnMut()> Drop for Scoped<F> {
    fn drop(&mut self) {
        (self.on_drop)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn runs_on_normal_exit() {
        let ran = Cell::new(false);
        {
            let _guard = Scoped::new(|| ran.set(true));
        }
        assert!(ran.get());
    }

    #[test]
    fn runs_on_unwind() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = Scoped::new(|| ran2.store(true, std::sync::atomic::Ordering::SeqCst));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}

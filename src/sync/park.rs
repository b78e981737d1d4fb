//! Wait-on-address primitive used by the sync module.
//!
//! On Linux this is a real `futex` syscall. Everywhere else, an adaptive
//! spin followed by `thread::yield_now` stands in, per spec's platform-
//! neutral fallback requirement.

use std::sync::atomic::AtomicU32;

const SPIN_LIMIT: u32 = 100;

/// Parks the calling thread until `word` no longer holds `expected`.
pub(crate) fn wait(word: &AtomicU32, expected: u32) {
    #[cfg(target_os = "linux")]
    {
        linux::futex_wait(word, expected);
        return;
    }
    #[cfg(not(target_os = "linux"))]
    {
        spin_then_yield(word, expected);
    }
}

/// Wakes a single thread parked on `word`, if any.
pub(crate) fn wake_one(word: &AtomicU32) {
    #[cfg(target_os = "linux")]
    {
        linux::futex_wake(word, 1);
        return;
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = word;
    }
}

/// Wakes every thread parked on `word`.
pub(crate) fn wake_all(word: &AtomicU32) {
    #[cfg(target_os = "linux")]
    {
        linux::futex_wake(word, i32::MAX);
        return;
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = word;
    }
}

#[allow(dead_code)]
fn spin_then_yield(word: &AtomicU32, expected: u32) {
    use std::sync::atomic::Ordering;

    for _ in 0..SPIN_LIMIT {
        if word.load(Ordering::Relaxed) != expected {
            return;
        }
        std::hint::spin_loop();
    }
    while word.load(Ordering::Relaxed) == expected {
        std::thread::yield_now();
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(super) fn futex_wait(word: &AtomicU32, expected: u32) {
        loop {
            if word.load(Ordering::Relaxed) != expected {
                return;
            }
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    word as *const AtomicU32 as *const u32,
                    libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                    expected,
                    std::ptr::null::<libc::timespec>(),
                )
            };
            if rc == 0 {
                return;
            }
            let err = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            if err != libc::EAGAIN && err != libc::EINTR {
                return;
            }
        }
    }

    pub(super) fn futex_wake(word: &AtomicU32, count: i32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
            );
        }
    }
}

//! Global interpreter lock
//!
//! Design: One process-wide recursive lock guards every read and write of
//! runtime memory, refcounts included. Guards are `!Send` and release in
//! LIFO order per thread. A per-thread depth counter answers "does this
//! thread hold the lock" without touching the mutex.

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::Cell;

static GIL: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Proof that the current thread holds the global lock
#[must_use = "the lock is released when the guard is dropped"]
pub struct GilGuard {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Acquire the global lock, blocking if another thread holds it
///
/// Re-acquiring on a thread that already holds it succeeds immediately.
pub fn acquire() -> GilGuard {
    let guard = GIL.lock();
    DEPTH.with(|d| d.set(d.get() + 1));
    GilGuard { _guard: guard }
}

/// Acquire without blocking
pub fn try_acquire() -> Option<GilGuard> {
    let guard = GIL.try_lock()?;
    DEPTH.with(|d| d.set(d.get() + 1));
    Some(GilGuard { _guard: guard })
}

/// Does the current thread hold the lock?
pub fn is_held() -> bool {
    DEPTH.with(|d| d.get() > 0)
}

/// Recursion depth of the lock on this thread
pub fn depth() -> usize {
    DEPTH.with(|d| d.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_reentrant_acquire() {
        let outer = acquire();
        assert!(is_held());
        let inner = acquire();
        assert_eq!(depth(), 2);
        drop(inner);
        assert!(is_held());
        drop(outer);
        assert!(!is_held());
    }

    #[test]
    fn test_other_thread_blocks() {
        let guard = acquire();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let got = try_acquire().is_some();
            tx.send(got).unwrap();
        });
        let got = rx.recv().unwrap();
        handle.join().unwrap();
        drop(guard);
        assert!(!got);
    }
}

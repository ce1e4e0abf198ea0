//! Sleep/wakeup on a mutex-guarded condition.
//!
//! [`WaitQueue::sleep`] atomically releases the caller's mutex guard,
//! parks until the next [`WaitQueue::wake_all`], and reacquires the lock
//! before returning. Callers loop on their condition, so a wakeup between
//! the condition check and the park cannot be lost: the generation ticket
//! is read while the lock is still held, and wakers bump the generation
//! only after their own lock section has ended.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, MutexGuard};

use crate::arch;

/// A wakeup channel associated with one mutex-guarded condition.
pub struct WaitQueue {
    generation: AtomicU64,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    /// Release `guard`, park until the next wakeup, and relock `lock`.
    ///
    /// The condition must be rechecked on return; parking ends on any
    /// wakeup, not necessarily the one the caller is interested in.
    pub fn sleep<'a, T>(&self, guard: MutexGuard<'a, T>, lock: &'a Mutex<T>) -> MutexGuard<'a, T> {
        let ticket = self.generation.load(Ordering::Acquire);
        drop(guard);

        while self.generation.load(Ordering::Acquire) == ticket {
            arch::spin_hint();
        }

        lock.lock()
    }

    /// Wake every process parked on this queue.
    pub fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

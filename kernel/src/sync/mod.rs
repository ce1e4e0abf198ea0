//! Synchronization primitives.
//!
//! Locking is `spin::Mutex` throughout the kernel. [`WaitQueue`] adds the
//! sleep/wakeup half: a process parks on a condition tied to a mutex and
//! an interrupt handler wakes it after publishing state under that mutex.

mod wait;

pub use wait::WaitQueue;

//! Process identity.
//!
//! The driver core needs exactly one fact about the process model: which
//! process, if any, is executing the current syscall. The scheduler
//! publishes that here at every context switch. Pid 0 is reserved and
//! never assigned to a user process, so it doubles as "no process".
//!
//! On hosted targets the current pid is thread-local, letting each test
//! thread impersonate a distinct process.

#[cfg(target_os = "none")]
use core::sync::atomic::{AtomicU64, Ordering};

/// Process identifier. Zero is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

#[cfg(target_os = "none")]
static CURRENT_PID: AtomicU64 = AtomicU64::new(0);

#[cfg(not(target_os = "none"))]
std::thread_local! {
    static CURRENT_PID: core::cell::Cell<u64> = const { core::cell::Cell::new(0) };
}

/// Record the process now running on this hart. The scheduler calls this
/// with `None` when entering the idle loop.
pub fn set_current(pid: Option<ProcessId>) {
    let raw = pid.map_or(0, |p| p.0);
    debug_assert!(pid.map_or(true, |p| p.0 != 0), "pid 0 is reserved");

    #[cfg(target_os = "none")]
    CURRENT_PID.store(raw, Ordering::Release);

    #[cfg(not(target_os = "none"))]
    CURRENT_PID.with(|cell| cell.set(raw));
}

/// The pid of the currently running process, if any.
pub fn current_pid() -> Option<ProcessId> {
    #[cfg(target_os = "none")]
    let raw = CURRENT_PID.load(Ordering::Acquire);

    #[cfg(not(target_os = "none"))]
    let raw = CURRENT_PID.with(|cell| cell.get());

    if raw == 0 {
        None
    } else {
        Some(ProcessId(raw))
    }
}

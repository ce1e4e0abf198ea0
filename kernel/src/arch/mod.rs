//! Architecture support.
//!
//! The driver core needs three things from the architecture: memory
//! barriers (see [`barriers`]), interrupt masking around the blocking
//! command wait, and a way to park the hart on a fatal error. On hosted
//! targets the interrupt operations are no-ops; the simulated device
//! delivers completions from its own thread.

pub mod barriers;

/// Enable device interrupts on this hart.
#[inline]
pub fn enable_interrupts() {
    #[cfg(all(target_os = "none", target_arch = "riscv64"))]
    // SAFETY: sets sstatus.SIE; the caller is prepared to take a trap.
    unsafe {
        core::arch::asm!("csrsi sstatus, 2");
    }
}

/// Disable device interrupts on this hart.
#[inline]
pub fn disable_interrupts() {
    #[cfg(all(target_os = "none", target_arch = "riscv64"))]
    // SAFETY: clears sstatus.SIE; traps are deferred, not lost.
    unsafe {
        core::arch::asm!("csrci sstatus, 2");
    }
}

/// Park the hart forever. Used after a kernel panic.
#[cfg(target_os = "none")]
pub fn halt() -> ! {
    loop {
        #[cfg(target_arch = "riscv64")]
        // SAFETY: wfi waits for an interrupt; with interrupts masked this
        // parks the hart.
        unsafe {
            core::arch::asm!("wfi");
        }
        core::hint::spin_loop();
    }
}

/// Pause briefly inside a busy-wait loop.
#[inline]
pub fn spin_hint() {
    #[cfg(not(target_os = "none"))]
    std::thread::yield_now();
    #[cfg(target_os = "none")]
    core::hint::spin_loop();
}

//! Architecture-independent memory barrier abstractions.
//!
//! Centralizes fence operations so the virtqueue and MMIO code do not
//! need scattered `#[cfg(target_arch)]` blocks with inline assembly.

/// Full memory fence -- all reads and writes issued before this barrier
/// are globally visible before any reads or writes issued after it.
///
/// * **RISC-V**: `fence rw, rw`.
/// * **Other targets**: `core::sync::atomic::fence(SeqCst)`.
#[inline(always)]
pub fn memory_fence() {
    #[cfg(target_arch = "riscv64")]
    {
        // SAFETY: `fence rw, rw` orders all prior reads and writes before
        // all subsequent reads and writes. No side effects beyond ordering.
        unsafe {
            core::arch::asm!("fence rw, rw", options(nostack, preserves_flags));
        }
    }

    #[cfg(not(target_arch = "riscv64"))]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

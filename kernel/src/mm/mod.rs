//! Memory management.
//!
//! The driver core only needs one service from the memory subsystem:
//! zeroed, page-sized, page-aligned, physically contiguous frames whose
//! lifetime is the kernel's. [`frame`] provides them from a static arena.
//!
//! The kernel runs identity-mapped, so a kernel virtual address doubles
//! as the physical address handed to devices.

mod frame;

pub use frame::{alloc_zeroed_frame, FRAME_SIZE};

/// Physical address of a kernel object (identity mapping).
#[inline]
pub fn phys_addr<T>(ptr: *const T) -> u64 {
    ptr as usize as u64
}

//! Graphics syscall handlers.
//!
//! The framebuffer is exclusive-use: a process acquires it, maps it via
//! the memory subsystem (which reads [`crate::graphics::framebuffer::fb_info`]),
//! draws, and calls transfer + flush to put its pixels on screen.
//! Transfer and flush are gated on ownership here, at the syscall layer;
//! the driver itself treats the gate as advisory.

use super::{SyscallError, SyscallResult};
use crate::drivers::virtio_gpu::gpu;

/// Claim exclusive framebuffer access for the calling process.
///
/// Returns 1 when granted (idempotent for the owner), 0 when another
/// process holds the framebuffer.
pub(super) fn sys_fb_acquire() -> SyscallResult {
    Ok(gpu().acquire_framebuffer() as usize)
}

/// Release framebuffer ownership. A no-op when the caller is not the
/// owner.
pub(super) fn sys_fb_release() -> SyscallResult {
    gpu().release_framebuffer();
    Ok(0)
}

/// Does the calling process hold the framebuffer? Returns 1 or 0.
pub(super) fn sys_fb_holds() -> SyscallResult {
    Ok(gpu().holds_framebuffer() as usize)
}

/// Push the framebuffer contents to the host resource. Blocks the
/// calling process until the device completes.
pub(super) fn sys_fb_transfer() -> SyscallResult {
    if !gpu().holds_framebuffer() {
        return Err(SyscallError::AccessDenied);
    }
    gpu().transfer_user();
    Ok(0)
}

/// Make the transferred contents visible on the scanout. Blocks the
/// calling process until the device completes.
pub(super) fn sys_fb_flush() -> SyscallResult {
    if !gpu().holds_framebuffer() {
        return Err(SyscallError::AccessDenied);
    }
    gpu().flush_user();
    Ok(0)
}

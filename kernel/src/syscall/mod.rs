//! System call dispatch.
//!
//! The trap handler decodes the syscall number and lands here. Only the
//! graphics calls are part of this crate; the dispatcher's shape leaves
//! room for the rest of the table.

pub mod graphics_syscalls;

/// Syscall-level errors returned to user space as negative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Unknown syscall number
    InvalidSyscall,
    /// Caller lacks the required ownership or rights
    AccessDenied,
}

/// Result of a syscall: a non-negative value for user space, or an error.
pub type SyscallResult = Result<usize, SyscallError>;

/// Graphics syscall numbers.
pub const SYS_FB_ACQUIRE: usize = 230;
pub const SYS_FB_RELEASE: usize = 231;
pub const SYS_FB_HOLDS: usize = 232;
pub const SYS_FB_TRANSFER: usize = 233;
pub const SYS_FB_FLUSH: usize = 234;

/// Route a syscall to its handler.
pub fn dispatch(number: usize) -> SyscallResult {
    match number {
        SYS_FB_ACQUIRE => graphics_syscalls::sys_fb_acquire(),
        SYS_FB_RELEASE => graphics_syscalls::sys_fb_release(),
        SYS_FB_HOLDS => graphics_syscalls::sys_fb_holds(),
        SYS_FB_TRANSFER => graphics_syscalls::sys_fb_transfer(),
        SYS_FB_FLUSH => graphics_syscalls::sys_fb_flush(),
        _ => Err(SyscallError::InvalidSyscall),
    }
}

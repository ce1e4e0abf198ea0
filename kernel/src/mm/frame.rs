//! Frame allocator.
//!
//! Hands out zeroed 4 KiB frames from a statically reserved, page-aligned
//! arena. Frames back the virtqueue rings and the command page; they live
//! for the kernel's lifetime, so there is no free path.

use core::cell::UnsafeCell;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::KernelError;

/// Size of one physical frame.
pub const FRAME_SIZE: usize = 4096;

/// Number of frames in the static arena.
const ARENA_FRAMES: usize = 128;

#[repr(C, align(4096))]
struct Arena(UnsafeCell<[u8; ARENA_FRAMES * FRAME_SIZE]>);

// SAFETY: the arena is only reached through FRAME_ALLOCATOR's mutex, and
// each frame is handed out at most once.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; ARENA_FRAMES * FRAME_SIZE]));

/// Bump allocator over the arena.
pub struct FrameAllocator {
    base: usize,
    next: usize,
}

impl FrameAllocator {
    fn new() -> Self {
        Self {
            base: ARENA.0.get() as usize,
            next: 0,
        }
    }

    /// Allocate one zeroed frame, or report exhaustion.
    pub fn alloc_zeroed(&mut self) -> Result<*mut u8, KernelError> {
        if self.next >= ARENA_FRAMES {
            return Err(KernelError::OutOfMemory {
                requested: FRAME_SIZE,
                available: 0,
            });
        }

        let frame = (self.base + self.next * FRAME_SIZE) as *mut u8;
        self.next += 1;

        // SAFETY: frame points at an unissued FRAME_SIZE region inside the
        // arena; we hold the allocator lock, so nobody else can touch it.
        unsafe {
            core::ptr::write_bytes(frame, 0, FRAME_SIZE);
        }

        Ok(frame)
    }
}

lazy_static! {
    static ref FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());
}

/// Allocate one zeroed, page-aligned frame from the global allocator.
pub fn alloc_zeroed_frame() -> Result<*mut u8, KernelError> {
    FRAME_ALLOCATOR.lock().alloc_zeroed()
}

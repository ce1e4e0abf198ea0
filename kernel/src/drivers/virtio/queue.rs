//! Split virtqueue.
//!
//! Implements the split virtqueue of the virtio specification for a
//! single control queue of fixed depth: a descriptor table, an available
//! ring (driver to device), and a used ring (device to driver), each on
//! its own zeroed, page-aligned frame shared with the device.
//!
//! All ring memory is reached through raw pointers with volatile access:
//! the device writes the used ring and reads everything else, so no Rust
//! reference to this memory may ever exist. Ordering is by full fences,
//! matching what the virtio spec demands around index updates.

use core::ptr;

use crate::arch::barriers::memory_fence;
use crate::error::KernelError;
use crate::mm;

/// Queue depth. A power of two; one outstanding command never needs more,
/// and the device must report at least this much in QUEUE_NUM_MAX.
pub const QUEUE_DEPTH: usize = 8;

/// Descriptor flag: the chain continues at `next`.
pub const VIRTQ_DESC_F_NEXT: u16 = 1;
/// Descriptor flag: the device writes this buffer (driver reads).
pub const VIRTQ_DESC_F_WRITE: u16 = 2;

/// Descriptor table entry. Layout fixed by the virtio spec.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtqDesc {
    /// Physical address of the buffer
    pub addr: u64,
    /// Length of the buffer in bytes
    pub len: u32,
    /// Descriptor flags (NEXT, WRITE)
    pub flags: u16,
    /// Index of the next descriptor in the chain (valid with NEXT)
    pub next: u16,
}

/// Available ring: the driver publishes descriptor chain heads here.
#[repr(C)]
pub struct VirtqAvail {
    pub flags: u16,
    /// Free-running 16-bit count of published chains
    pub idx: u16,
    pub ring: [u16; QUEUE_DEPTH],
}

/// One completion written by the device.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtqUsedElem {
    /// Head index of the completed descriptor chain
    pub id: u32,
    /// Bytes the device wrote into the chain
    pub len: u32,
}

/// Used ring: the device reports completed chains here.
#[repr(C)]
pub struct VirtqUsed {
    pub flags: u16,
    /// Free-running 16-bit count of completions
    pub idx: u16,
    pub ring: [VirtqUsedElem; QUEUE_DEPTH],
}

/// The control queue shared with the device.
///
/// Owns three frames for the kernel's lifetime. The driver writes the
/// descriptor table and available ring; the device writes the used ring.
pub struct ControlQueue {
    desc: *mut VirtqDesc,
    avail: *mut VirtqAvail,
    used: *mut VirtqUsed,
}

// SAFETY: the raw pointers target frame-allocated memory owned by this
// queue alone. Access is serialized by the driver lock wrapped around the
// queue, except for the device's used-ring writes, which are ordered by
// the fences in publish()/used_idx().
unsafe impl Send for ControlQueue {}

impl ControlQueue {
    /// Allocate and zero the three ring frames.
    pub fn new() -> Result<Self, KernelError> {
        let desc = mm::alloc_zeroed_frame()? as *mut VirtqDesc;
        let avail = mm::alloc_zeroed_frame()? as *mut VirtqAvail;
        let used = mm::alloc_zeroed_frame()? as *mut VirtqUsed;

        Ok(Self { desc, avail, used })
    }

    // ---- Physical addresses for the transport ----

    pub fn phys_desc(&self) -> u64 {
        mm::phys_addr(self.desc)
    }

    pub fn phys_avail(&self) -> u64 {
        mm::phys_addr(self.avail)
    }

    pub fn phys_used(&self) -> u64 {
        mm::phys_addr(self.used)
    }

    // ---- Driver side ----

    /// Write descriptor slot `index`.
    ///
    /// # Safety
    ///
    /// `addr` must be the physical address of a buffer of at least `len`
    /// bytes that stays valid until the device returns the chain through
    /// the used ring.
    pub unsafe fn write_desc(&mut self, index: u16, addr: u64, len: u32, flags: u16, next: u16) {
        debug_assert!((index as usize) < QUEUE_DEPTH);
        let slot = self.desc.add(index as usize);
        ptr::write_volatile(
            slot,
            VirtqDesc {
                addr,
                len,
                flags,
                next,
            },
        );
    }

    /// Read back descriptor slot `index`. Used by consistency checks.
    pub fn read_desc(&self, index: u16) -> VirtqDesc {
        debug_assert!((index as usize) < QUEUE_DEPTH);
        // SAFETY: index is in bounds; the table is valid for the queue's
        // lifetime.
        unsafe { ptr::read_volatile(self.desc.add(index as usize)) }
    }

    /// Publish a descriptor chain head on the available ring.
    ///
    /// The ring slot is written first; a fence orders it before the index
    /// increment; a second fence orders the increment before the notify
    /// the caller issues next.
    pub fn publish(&mut self, head: u16) {
        // SAFETY: self.avail is the valid, device-shared available ring.
        unsafe {
            let idx = ptr::read_volatile(ptr::addr_of!((*self.avail).idx));
            let slot = ptr::addr_of_mut!((*self.avail).ring[idx as usize % QUEUE_DEPTH]);
            ptr::write_volatile(slot, head);
            memory_fence();
            ptr::write_volatile(ptr::addr_of_mut!((*self.avail).idx), idx.wrapping_add(1));
            memory_fence();
        }
    }

    /// The driver-side available index (free-running).
    pub fn avail_idx(&self) -> u16 {
        // SAFETY: self.avail is valid; volatile because the field is in
        // device-shared memory.
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.avail).idx)) }
    }

    // ---- Device side ----

    /// The device's used index (free-running), fenced so every used-ring
    /// entry the index covers is visible before it is returned.
    pub fn used_idx(&self) -> u16 {
        memory_fence();
        // SAFETY: self.used is valid; the device writes it concurrently,
        // hence volatile.
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.used).idx)) }
    }

    /// Read the used-ring entry a monotonic cursor points at.
    pub fn used_elem(&self, cursor: u32) -> VirtqUsedElem {
        // SAFETY: the cursor is reduced modulo the depth, so the slot is
        // in bounds; volatile because the device writes these entries.
        unsafe {
            ptr::read_volatile(ptr::addr_of!(
                (*self.used).ring[cursor as usize % QUEUE_DEPTH]
            ))
        }
    }
}

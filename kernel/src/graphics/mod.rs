//! Graphics subsystem.
//!
//! One linear framebuffer, published to the virtio GPU at bring-up and
//! mapped read-write into the owning process by the memory subsystem.
//! Rendering happens in user space; the kernel only stores pixels and
//! pushes them to the device on transfer/flush.

pub mod framebuffer;

//! Device drivers.

pub mod virtio;
pub mod virtio_gpu;

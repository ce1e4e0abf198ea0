//! Halcyon kernel library.
//!
//! Core kernel services for the Halcyon teaching kernel: the virtio-gpu
//! framebuffer driver and the subsystems it leans on (frame allocation,
//! sleep/wakeup, process identity, the graphics syscall surface).
//!
//! The crate is `no_std` on bare metal. On a hosted target (the default
//! when running `cargo test`) it links `std` so unit tests run under the
//! standard test harness against a simulated device.

#![no_std]

// Host target: link std so unit tests can use threads and the system
// allocator. Bare metal keeps the pure no_std configuration.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod drivers;
pub mod error;
pub mod graphics;
pub mod mm;
pub mod process;
#[cfg(target_os = "none")]
pub mod serial;
pub mod sync;
pub mod syscall;


pub use error::{KernelError, KernelResult};

/// Kernel panic handler for bare metal builds.
///
/// Every consistency failure in the driver core ends here: print the
/// diagnostic and park the hart. There is no recovery protocol.
#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("KERNEL PANIC: {}", info);
    arch::halt()
}

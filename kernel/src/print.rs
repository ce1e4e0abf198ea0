//! Kernel printing macros.
//!
//! Provides `print!` and `println!` macros that delegate to the 16550
//! UART on bare metal and to the host's stdout when the crate is built
//! for a hosted target (unit tests).

// Bare metal: route through the serial driver.
#[cfg(target_os = "none")]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_serial_print(format_args!($($arg)*)));
}

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

// Hosted target: route through std so test output interleaves with the
// harness's captured stdout.
#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_host_print(format_args!($($arg)*)));
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[cfg(not(target_os = "none"))]
#[doc(hidden)]
pub fn _host_print(args: core::fmt::Arguments) {
    use std::io::Write;
    let _ = std::io::stdout().write_fmt(args);
}

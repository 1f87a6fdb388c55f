//! Kernel print utilities.
//!
//! The console device itself is external to this crate: whoever boots the
//! kernel installs a [`ConsoleSink`] with [`set_console`] (the serial port
//! on real hardware, a std-backed sink in host tests). Until a sink is
//! installed, all output is discarded.

use crate::sync::SpinLock;
use alloc::boxed::Box;
use core::fmt::Write;

/// A byte sink for kernel console output.
pub trait ConsoleSink: Send {
    /// Write a string to the console.
    fn write_str(&mut self, s: &str);
}

static CONSOLE: SpinLock<Option<Box<dyn ConsoleSink>>> = SpinLock::new(None);

/// Suppresses `info!`/`warning!`/`debug!` output when set.
pub static QUIET: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

/// Installs the console sink used by the print macros.
pub fn set_console(sink: Box<dyn ConsoleSink>) {
    let mut guard = CONSOLE.lock();
    *guard = Some(sink);
    guard.unlock();
}

struct SinkAdapter<'a>(&'a mut dyn ConsoleSink);

impl Write for SinkAdapter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let mut guard = CONSOLE.lock();
    if let Some(sink) = guard.as_mut() {
        let _ = write!(SinkAdapter(sink.as_mut()), "{fmt}");
    }
    guard.unlock();
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the console. This first holds
/// the lock for the console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    () => (if !$crate::kprint::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if !$crate::kprint::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    () => (if !$crate::kprint::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN]\n") });
    ($($arg:tt)*) => (if !$crate::kprint::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN] {}\n", format_args!($($arg)*)) });
}

/// Display a debug message.
#[macro_export]
macro_rules! debug {
    () => (if !$crate::kprint::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG]\n") });
    ($($arg:tt)*) => (if !$crate::kprint::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*)) });
}

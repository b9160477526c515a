//! # Serial Source
//!
//! The UART the attached device writes to. The forwarding loop only needs three
//! things from it: wait (bounded) until bytes are buffered, ask how many are
//! buffered, and take them.
//!
//! [`UartSource`] backs the trait with a real port when the `serial` feature is
//! enabled; tests drive the loop with scripted sources.

#[cfg(feature = "serial")]
mod uart;

#[cfg(feature = "serial")]
pub use uart::UartSource;

use std::io;
use std::time::Duration;

/// Outcome of a bounded readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    /// The source reported an error condition; the caller decides whether to continue.
    Error(String),
    TimedOut,
}

#[allow(async_fn_in_trait)]
pub trait SerialSource {
    /// Wait until at least one byte is buffered, an error is flagged, or `timeout` passes.
    async fn wait_readable(&mut self, timeout: Duration) -> Readiness;

    /// Bytes buffered right now.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Append up to `limit` of the currently buffered bytes to `buf`. Never blocks
    /// waiting for more. Returns the number of bytes appended.
    fn read_available(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize>;
}

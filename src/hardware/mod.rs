//! # Hardware Collaborators
//!
//! Thin seams over the physical parts the bridge drives directly:
//!
//! - [`EnablePin`] - digital enable line that gates when the attached device may transmit
//! - [`SharedConsole`] - local debug console bound to the same UART used for forwarding
//! - [`Restarter`] - full node restart
//!
//! The enable line and console are shared between the forwarding loop and the fault
//! supervisor, so both are cheap clonable handles around one underlying driver.

pub mod console;
pub mod pin;
pub mod restart;

pub use console::{Console, LogConsole, SharedConsole};
pub use pin::{EnablePin, Level, NullLine, OutputLine, SysfsLine};
pub use restart::{ProcessRestarter, Restarter};

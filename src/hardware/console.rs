//! Local debug console on the forwarding UART.
//!
//! Console and forwarding are mutually exclusive uses of the same line: the console
//! is detached before forwarding starts and reattached on every fault or interrupt.

use log::info;
use std::sync::{Arc, Mutex};

pub trait Console {
    /// Release the UART so the forwarding loop owns it exclusively.
    fn detach(&mut self);
    /// Rebind the console to the UART for local diagnosis.
    fn attach(&mut self);
}

/// Console switch for hosts where the UART has no login shell behind it.
/// Only the ownership change is reported.
#[derive(Debug)]
pub struct LogConsole {
    port: String,
}

impl LogConsole {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
        }
    }
}

impl Console for LogConsole {
    fn detach(&mut self) {
        info!("Disabling console on {}", self.port);
    }

    fn attach(&mut self) {
        info!("Enabling console on {}", self.port);
    }
}

/// Clonable handle so the loop and the supervisor switch the same console.
#[derive(Clone)]
pub struct SharedConsole {
    inner: Arc<Mutex<Box<dyn Console + Send>>>,
    attached: Arc<Mutex<bool>>,
}

impl SharedConsole {
    /// The console starts attached, as it is at boot.
    pub fn new(console: Box<dyn Console + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(console)),
            attached: Arc::new(Mutex::new(true)),
        }
    }

    pub fn detach(&self) {
        if let Ok(mut console) = self.inner.lock() {
            console.detach();
        }
        if let Ok(mut attached) = self.attached.lock() {
            *attached = false;
        }
    }

    pub fn attach(&self) {
        if let Ok(mut console) = self.inner.lock() {
            console.attach();
        }
        if let Ok(mut attached) = self.attached.lock() {
            *attached = true;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.lock().map(|a| *a).unwrap_or(false)
    }
}

impl std::fmt::Debug for SharedConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConsole")
            .field("attached", &self.is_attached())
            .finish()
    }
}

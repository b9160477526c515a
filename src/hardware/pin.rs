//! Enable line driver.
//!
//! The attached subsystem only produces data while the line sits at its "enabled"
//! level. On the reference board that level is logical low, so the polarity is
//! configurable instead of hard-wired into callers.

use log::{debug, warn};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// A single digital output.
pub trait OutputLine {
    fn set_level(&mut self, level: Level) -> io::Result<()>;
}

/// Line that is not wired to anything; level changes are only logged.
#[derive(Debug, Default)]
pub struct NullLine;

impl OutputLine for NullLine {
    fn set_level(&mut self, level: Level) -> io::Result<()> {
        debug!("enable line not wired, ignoring {:?}", level);
        Ok(())
    }
}

/// Linux sysfs GPIO output (`/sys/class/gpio/gpioN`).
#[derive(Debug)]
pub struct SysfsLine {
    value_path: PathBuf,
}

impl SysfsLine {
    /// Export the GPIO if needed and configure it as an output.
    pub fn open(gpio: u32) -> io::Result<Self> {
        Self::open_at(PathBuf::from("/sys/class/gpio"), gpio)
    }

    pub fn open_at(root: PathBuf, gpio: u32) -> io::Result<Self> {
        let dir = root.join(format!("gpio{}", gpio));
        if !dir.exists() {
            std::fs::write(root.join("export"), gpio.to_string())?;
        }
        std::fs::write(dir.join("direction"), "out")?;
        Ok(Self {
            value_path: dir.join("value"),
        })
    }
}

impl OutputLine for SysfsLine {
    fn set_level(&mut self, level: Level) -> io::Result<()> {
        let value = match level {
            Level::Low => "0",
            Level::High => "1",
        };
        std::fs::write(&self.value_path, value)
    }
}

/// Shared handle to the enable line.
///
/// Clones drive the same physical line. Driver errors are logged and swallowed:
/// the line is touched on fault paths where there is nobody left to report to.
#[derive(Clone)]
pub struct EnablePin {
    line: Arc<Mutex<Box<dyn OutputLine + Send>>>,
    active_low: bool,
    enabled: Arc<Mutex<bool>>,
}

impl EnablePin {
    /// Wrap a line. The line is driven to "disabled" immediately.
    pub fn new(line: Box<dyn OutputLine + Send>, active_low: bool) -> Self {
        let pin = Self {
            line: Arc::new(Mutex::new(line)),
            active_low,
            enabled: Arc::new(Mutex::new(false)),
        };
        pin.drive(false);
        pin
    }

    fn level_for(&self, enabled: bool) -> Level {
        match (enabled, self.active_low) {
            (true, true) | (false, false) => Level::Low,
            (true, false) | (false, true) => Level::High,
        }
    }

    fn drive(&self, enabled: bool) {
        let level = self.level_for(enabled);
        match self.line.lock() {
            Ok(mut line) => {
                if let Err(e) = line.set_level(level) {
                    warn!("Failed to drive enable line {:?}: {}", level, e);
                }
            }
            Err(_) => warn!("Enable line mutex poisoned; {:?} not applied", level),
        }
        if let Ok(mut flag) = self.enabled.lock() {
            *flag = enabled;
        }
    }

    /// Let the attached device transmit.
    pub fn enable(&self) {
        debug!("enabling attached device");
        self.drive(true);
    }

    /// Suppress the attached device.
    pub fn disable(&self) {
        debug!("disabling attached device");
        self.drive(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.lock().map(|flag| *flag).unwrap_or(false)
    }
}

impl std::fmt::Debug for EnablePin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnablePin")
            .field("active_low", &self.active_low)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

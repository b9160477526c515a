//! Full node restart.
//!
//! Recovery never resumes internal state: the process image is replaced by a fresh
//! copy of itself, the same way a microcontroller comes back from a hardware reset.
//! On unix the PID is kept, so a service manager keeps tracking the node.

use log::{error, warn};
use std::io;
use std::process::Command;

pub trait Restarter {
    /// Restart the node. Production implementations do not return.
    fn restart(&mut self, reason: &str);
}

/// Re-executes the current binary with the original arguments.
#[derive(Debug, Default)]
pub struct ProcessRestarter;

/// Command that starts this binary again with the arguments it was given.
pub fn restart_command() -> io::Result<Command> {
    let exe = std::env::current_exe()?;
    let mut command = Command::new(exe);
    command.args(std::env::args_os().skip(1));
    Ok(command)
}

#[cfg(unix)]
fn replace_process(mut command: Command) -> io::Error {
    use std::os::unix::process::CommandExt;
    // Only returns on failure.
    command.exec()
}

#[cfg(not(unix))]
fn replace_process(mut command: Command) -> io::Error {
    match command.spawn() {
        Ok(_) => std::process::exit(0),
        Err(e) => e,
    }
}

impl Restarter for ProcessRestarter {
    fn restart(&mut self, reason: &str) {
        warn!("Restarting node: {}", reason);
        log::logger().flush();

        let err = match restart_command() {
            Ok(command) => replace_process(command),
            Err(e) => e,
        };
        error!("Failed to restart: {}", err);
        log::logger().flush();
        // Non-zero exit lets a service manager take over the restart.
        std::process::exit(1);
    }
}

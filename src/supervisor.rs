//! # Fault Supervisor
//!
//! Wraps a node run and turns every way it can end into one of three outcomes:
//!
//! | Run outcome               | Action                                                       |
//! |---------------------------|--------------------------------------------------------------|
//! | operator interrupt        | device disabled, console attached, no restart (maintenance)  |
//! | reset directive           | immediate restart                                            |
//! | any error                 | device disabled, console attached, cooldown, then restart    |
//! | orderly stop              | device disabled, console attached                            |
//!
//! An interrupt during the cooldown also ends in maintenance. Recovery never resumes
//! partial state; it always goes through a full restart.

use log::{error, info, warn};
use std::future::Future;
use std::time::Duration;

use crate::forward::LoopExit;
use crate::hardware::{EnablePin, Restarter, SharedConsole};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Halted for local diagnosis; nothing restarts the node.
    Maintenance,
    /// The restarter was invoked.
    Restarted,
    /// The run stopped cleanly.
    Stopped,
}

pub struct FaultSupervisor {
    pin: EnablePin,
    console: SharedConsole,
    restarter: Box<dyn Restarter + Send>,
    cooldown: Duration,
}

impl FaultSupervisor {
    pub fn new(
        pin: EnablePin,
        console: SharedConsole,
        restarter: Box<dyn Restarter + Send>,
        cooldown: Duration,
    ) -> Self {
        Self {
            pin,
            console,
            restarter,
            cooldown,
        }
    }

    /// Drive `run` to completion unless `interrupt` resolves first.
    pub async fn supervise<A, I>(&mut self, run: A, interrupt: I) -> Verdict
    where
        A: Future<Output = anyhow::Result<LoopExit>>,
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        let outcome = tokio::select! {
            result = run => Some(result),
            _ = &mut interrupt => None,
        };

        match outcome {
            None => {
                info!("Interrupted by operator");
                self.enter_maintenance();
                Verdict::Maintenance
            }
            Some(Ok(LoopExit::Stopped)) => {
                self.make_safe();
                Verdict::Stopped
            }
            Some(Ok(LoopExit::RemoteReset)) => {
                self.pin.disable();
                self.restarter.restart("reset directive received");
                Verdict::Restarted
            }
            Some(Err(e)) => {
                error!("Node failure: {:#}", e);
                info!("Counters at failure: {}", metrics::snapshot());
                self.make_safe();

                warn!("Resetting in {}s", self.cooldown.as_secs());
                tokio::select! {
                    _ = tokio::time::sleep(self.cooldown) => {
                        self.restarter.restart(&format!("recovering from failure: {}", e));
                        Verdict::Restarted
                    }
                    _ = &mut interrupt => {
                        info!("Interrupted during cooldown");
                        self.enter_maintenance();
                        Verdict::Maintenance
                    }
                }
            }
        }
    }

    fn make_safe(&self) {
        self.pin.disable();
        info!("Enabling REPL on UART");
        self.console.attach();
    }

    fn enter_maintenance(&self) {
        self.make_safe();
        info!("Maintenance mode: console attached, no automatic restart");
    }
}

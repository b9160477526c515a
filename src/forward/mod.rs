//! # Forwarding Loop
//!
//! Moves bytes from the serial source to the data topic.
//!
//! Each iteration first applies pending control messages, then waits (bounded) for
//! the serial source. When it becomes readable a *drain cycle* runs: repeatedly
//! take what is buffered and pause briefly, until a pause passes with nothing new.
//! Everything gathered in one cycle is published as a single message, which
//! reassembles bursts the UART delivers in pieces.
//!
//! ## State Machine
//!
//! ```text
//! Starting --start()--> Active --stop / reset--> Stopping --> Stopped
//! ```
//!
//! `start()` detaches the console and enables the attached device. A loop can only
//! be built from a connected [`SessionClient`], so the device is never enabled
//! before the logon announcement has gone out.

use log::{debug, info, trace, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::SerialConfig;
use crate::hardware::{EnablePin, SharedConsole};
use crate::metrics;
use crate::serial::{Readiness, SerialSource};
use crate::session::{BrokerTransport, ControlAction, SessionClient, SessionError};

/// Ceiling for the pause after repeated readiness errors.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pause after the `streak`-th consecutive readiness error: the inter-read pause,
/// doubled per repeat, capped at [`MAX_ERROR_BACKOFF`].
pub fn error_backoff(base: Duration, streak: u32) -> Duration {
    let factor = 1u32 << streak.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(MAX_ERROR_BACKOFF)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Active,
    Stopping,
    Stopped,
}

/// Why [`ForwardingLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop was requested; the session was closed with a logoff.
    Stopped,
    /// The broker sent the reset directive; the node must restart now.
    RemoteReset,
}

#[derive(Debug, Clone)]
pub struct ForwardSettings {
    pub readiness_timeout: Duration,
    pub inter_read_pause: Duration,
    pub max_message_bytes: usize,
    pub publish_empty_drains: bool,
}

impl ForwardSettings {
    pub fn from_config(serial: &SerialConfig) -> Self {
        Self {
            readiness_timeout: serial.readiness_timeout(),
            inter_read_pause: serial.inter_read_pause(),
            max_message_bytes: serial.max_message_bytes,
            publish_empty_drains: serial.publish_empty_drains,
        }
    }
}

/// Requests an orderly stop of a running loop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Read everything the source delivers until one inter-read pause passes with no
/// new bytes, or the message limit is reached.
///
/// Serial errors end the cycle early; bytes gathered before the error are kept.
pub async fn collect_message<S: SerialSource>(serial: &mut S, settings: &ForwardSettings) -> Vec<u8> {
    let limit = settings.max_message_bytes;
    let mut buffer = Vec::new();

    loop {
        match serial.bytes_available() {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                metrics::inc_serial_errors();
                warn!("Serial error while draining: {}", e);
                break;
            }
        }
        let remaining = limit - buffer.len();
        if let Err(e) = serial.read_available(&mut buffer, remaining) {
            metrics::inc_serial_errors();
            warn!("Serial read failed after {} bytes: {}", buffer.len(), e);
            break;
        }
        if buffer.len() >= limit {
            debug!("drain stopped at {} byte message limit", limit);
            break;
        }
        sleep(settings.inter_read_pause).await;
    }
    buffer
}

pub struct ForwardingLoop<S: SerialSource, T: BrokerTransport> {
    serial: S,
    session: SessionClient<T>,
    pin: EnablePin,
    console: SharedConsole,
    settings: ForwardSettings,
    state: LoopState,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl<S: SerialSource, T: BrokerTransport> ForwardingLoop<S, T> {
    pub fn new(
        serial: S,
        session: SessionClient<T>,
        pin: EnablePin,
        console: SharedConsole,
        settings: ForwardSettings,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            serial,
            session,
            pin,
            console,
            settings,
            state: LoopState::Starting,
            stop_tx,
            stop_rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn session(&self) -> &SessionClient<T> {
        &self.session
    }

    /// Hand the UART to the loop and let the device transmit.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != LoopState::Starting {
            return Ok(());
        }
        if !self.session.is_connected() {
            return Err(SessionError::NotConnected);
        }
        info!("Disabling REPL on UART");
        self.console.detach();
        self.pin.enable();
        self.state = LoopState::Active;
        Ok(())
    }

    /// Run until a stop request or a reset directive. Broker errors end the loop
    /// with the device still enabled; cleaning up after a fault is the supervisor's job.
    pub async fn run(&mut self) -> Result<LoopExit, SessionError> {
        self.start()?;
        let mut error_streak = 0u32;

        loop {
            if *self.stop_rx.borrow() {
                return self.shutdown().await;
            }

            if self.session.poll_incoming().await? == ControlAction::Reset {
                metrics::inc_resets_requested();
                return Ok(LoopExit::RemoteReset);
            }

            let readiness = tokio::select! {
                readiness = self.serial.wait_readable(self.settings.readiness_timeout) => readiness,
                _ = self.stop_rx.changed() => continue,
            };

            match readiness {
                Readiness::Readable => {
                    error_streak = 0;
                    debug!("data ready");
                    self.drain_cycle().await?;
                }
                Readiness::Error(e) => {
                    metrics::inc_serial_errors();
                    error_streak = error_streak.saturating_add(1);
                    let pause = error_backoff(self.settings.inter_read_pause, error_streak);
                    if error_streak == 1 {
                        warn!("Serial error: {}", e);
                    } else {
                        debug!("Serial error #{} (next check in {:?}): {}", error_streak, pause, e);
                    }
                    tokio::select! {
                        _ = sleep(pause) => {}
                        _ = self.stop_rx.changed() => {}
                    }
                }
                Readiness::TimedOut => {
                    error_streak = 0;
                    trace!("no serial data within readiness timeout");
                }
            }
        }
    }

    /// Gather one message and publish it. Returns the number of bytes published,
    /// or `None` when an empty drain was suppressed.
    pub async fn drain_cycle(&mut self) -> Result<Option<usize>, SessionError> {
        metrics::inc_drain_cycles();
        let buffer = collect_message(&mut self.serial, &self.settings).await;

        if buffer.is_empty() && !self.settings.publish_empty_drains {
            metrics::inc_empty_drains_suppressed();
            debug!("readiness without data; nothing published");
            return Ok(None);
        }

        self.session.publish_data(&buffer).await?;
        metrics::record_forwarded(buffer.len());
        info!("{} bytes sent", buffer.len());
        Ok(Some(buffer.len()))
    }

    async fn shutdown(&mut self) -> Result<LoopExit, SessionError> {
        info!("Stopping forwarding loop");
        self.state = LoopState::Stopping;
        self.pin.disable();
        let closed = self.session.disconnect().await;
        self.state = LoopState::Stopped;
        closed.map(|_| LoopExit::Stopped)
    }
}

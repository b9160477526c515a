//! Startup sequence of one node run.
//!
//! ```text
//! link bring-up -> startup delay -> open serial -> broker session (logon) -> forwarding loop
//! ```
//!
//! Any error ends the run and is handed to the supervisor unchanged, with context
//! naming the stage that failed.

use anyhow::{Context, Result};
use log::info;
use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::forward::{ForwardSettings, ForwardingLoop, LoopExit};
use crate::hardware::{EnablePin, SharedConsole};
use crate::identity::NodeIdentity;
use crate::link::{LinkManager, WirelessRadio};
use crate::serial::SerialSource;
use crate::session::{BrokerEndpoint, BrokerTransport, SessionClient, SessionSettings};

/// Hardware handles shared between the run and the supervisor.
#[derive(Clone, Debug)]
pub struct NodeHandles {
    pub pin: EnablePin,
    pub console: SharedConsole,
}

/// Execute one full run of the node.
///
/// The serial source is opened through `open_serial` after the network is up, so a
/// missing UART is reported as a node fault like any other.
pub async fn run_node<R, T, S, F, Fut>(
    config: &Config,
    identity: &NodeIdentity,
    radio: R,
    transport: T,
    open_serial: F,
    handles: NodeHandles,
) -> Result<LoopExit>
where
    R: WirelessRadio,
    T: BrokerTransport,
    S: SerialSource,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<S>>,
{
    info!("Node {} starting", identity);

    let mut link = LinkManager::new(radio);
    let state = link.bring_up(identity, &config.wifi).await;
    info!("Link state: {:?}", state);

    let delay = Duration::from_secs(config.node.startup_delay_secs);
    if !delay.is_zero() {
        info!("Starting in {}s", delay.as_secs());
        tokio::time::sleep(delay).await;
    }

    let serial = open_serial().await.context("serial source")?;

    let endpoint = BrokerEndpoint::from_config(&config.mqtt);
    let session = SessionClient::connect(
        identity,
        &endpoint,
        transport,
        SessionSettings::from_config(config),
    )
    .await
    .with_context(|| format!("broker session with {}", endpoint))?;

    let mut forwarding = ForwardingLoop::new(
        serial,
        session,
        handles.pin,
        handles.console,
        ForwardSettings::from_config(&config.serial),
    );
    let exit = forwarding.run().await.context("forwarding loop")?;
    info!("Forwarding loop ended: {:?}", exit);
    Ok(exit)
}

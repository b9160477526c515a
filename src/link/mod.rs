//! # Link Management
//!
//! Brings the wireless station interface up at boot and falls back to a local
//! access point when the upstream network cannot be joined in time.
//!
//! The outcome is always a usable node: either upstream-connected, or reachable
//! only through its own access point. There is exactly one association window per
//! boot; retrying is left to the supervisor's full restart.
//!
//! ## Backends
//!
//! - [`ManagedRadio`] - networking is owned by the OS; the station is reported as associated
//! - [`NmcliRadio`] - NetworkManager driven through the `nmcli` command line tool

mod managed;
mod nmcli;

pub use managed::ManagedRadio;
pub use nmcli::NmcliRadio;

use log::{debug, info, warn};
use std::io;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::WifiConfig;
use crate::identity::NodeIdentity;

/// Association state reported by the station interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationStatus {
    Idle,
    Connecting,
    /// Associated and holding a DHCP lease.
    GotIp,
    Failed,
}

/// Radio driver operations used during bring-up.
///
/// Drivers may shell out or talk to a daemon, so every call is async.
#[allow(async_fn_in_trait)]
pub trait WirelessRadio {
    async fn configure_access_point(&mut self, essid: &str, password: &str) -> io::Result<()>;
    async fn set_access_point_active(&mut self, active: bool) -> io::Result<()>;
    async fn set_station_active(&mut self, active: bool) -> io::Result<()>;
    async fn set_station_hostname(&mut self, hostname: &str) -> io::Result<()>;
    async fn station_status(&mut self) -> io::Result<StationStatus>;
    async fn begin_association(&mut self, ssid: &str, password: &str) -> io::Result<()>;
}

/// Where the node ended up after bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Joined the upstream network; `already` is set when it was associated before bring-up.
    Upstream { already: bool },
    /// Association timed out; only the local access point is active.
    LocalOnly,
}

impl LinkState {
    pub fn is_upstream(&self) -> bool {
        matches!(self, LinkState::Upstream { .. })
    }
}

pub struct LinkManager<R: WirelessRadio> {
    radio: R,
}

fn log_radio_error(action: &str, result: io::Result<()>) {
    if let Err(e) = result {
        warn!("radio: {} failed: {}", action, e);
    }
}

impl<R: WirelessRadio> LinkManager<R> {
    pub fn new(radio: R) -> Self {
        Self { radio }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn into_radio(self) -> R {
        self.radio
    }

    async fn station_has_ip(&mut self) -> bool {
        match self.radio.station_status().await {
            Ok(status) => status == StationStatus::GotIp,
            Err(e) => {
                debug!("radio: status query failed: {}", e);
                false
            }
        }
    }

    /// Run the single bring-up window. Never fails; radio errors are logged.
    pub async fn bring_up(&mut self, identity: &NodeIdentity, wifi: &WifiConfig) -> LinkState {
        self.bring_up_with(
            identity,
            wifi.ap_enabled,
            &wifi.ap_password,
            &wifi.station_ssid,
            &wifi.station_password,
            wifi.association_timeout(),
            wifi.status_poll(),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn bring_up_with(
        &mut self,
        identity: &NodeIdentity,
        local_ap_enabled: bool,
        local_ap_password: &str,
        station_ssid: &str,
        station_password: &str,
        timeout: Duration,
        poll: Duration,
    ) -> LinkState {
        let hostname = identity.hostname();
        log_radio_error(
            "configure access point",
            self.radio.configure_access_point(hostname, local_ap_password).await,
        );
        log_radio_error(
            "set access point state",
            self.radio.set_access_point_active(local_ap_enabled).await,
        );
        log_radio_error("activate station", self.radio.set_station_active(true).await);
        log_radio_error("set hostname", self.radio.set_station_hostname(hostname).await);

        if self.station_has_ip().await {
            log_radio_error(
                "deactivate access point",
                self.radio.set_access_point_active(false).await,
            );
            info!("Station already associated");
            return LinkState::Upstream { already: true };
        }

        info!("connecting to network {}...", station_ssid);
        log_radio_error(
            "begin association",
            self.radio.begin_association(station_ssid, station_password).await,
        );

        let start = Instant::now();
        loop {
            if self.station_has_ip().await {
                log_radio_error(
                    "deactivate access point",
                    self.radio.set_access_point_active(false).await,
                );
                info!(
                    "Associated with {} after {} ms",
                    station_ssid,
                    start.elapsed().as_millis()
                );
                return LinkState::Upstream { already: false };
            }
            if start.elapsed() >= timeout {
                warn!(
                    "Association with {} timed out after {} ms; serving local access point '{}'",
                    station_ssid,
                    timeout.as_millis(),
                    hostname
                );
                log_radio_error("deactivate station", self.radio.set_station_active(false).await);
                log_radio_error(
                    "activate access point",
                    self.radio.set_access_point_active(true).await,
                );
                return LinkState::LocalOnly;
            }
            sleep(poll).await;
        }
    }
}

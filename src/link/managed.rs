use log::debug;
use std::io;

use super::{StationStatus, WirelessRadio};

/// Radio for hosts whose network is configured outside this process
/// (wired uplink, systemd-networkd, a supervisor container).
/// The station always reports an address; access point requests are only logged.
#[derive(Debug, Default)]
pub struct ManagedRadio {
    ap_active: bool,
}

impl ManagedRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_point_active(&self) -> bool {
        self.ap_active
    }
}

impl WirelessRadio for ManagedRadio {
    async fn configure_access_point(&mut self, essid: &str, _password: &str) -> io::Result<()> {
        debug!("managed radio: access point '{}' left to the OS", essid);
        Ok(())
    }

    async fn set_access_point_active(&mut self, active: bool) -> io::Result<()> {
        self.ap_active = active;
        Ok(())
    }

    async fn set_station_active(&mut self, _active: bool) -> io::Result<()> {
        Ok(())
    }

    async fn set_station_hostname(&mut self, hostname: &str) -> io::Result<()> {
        debug!("managed radio: hostname {} left to the OS", hostname);
        Ok(())
    }

    async fn station_status(&mut self) -> io::Result<StationStatus> {
        Ok(StationStatus::GotIp)
    }

    async fn begin_association(&mut self, _ssid: &str, _password: &str) -> io::Result<()> {
        Ok(())
    }
}

//! NetworkManager backend.
//!
//! Every call goes through `tokio::process`, so a slow `nmcli` never stalls the
//! runtime. The association itself is spawned so the bring-up loop can keep
//! polling the device state against its timeout.

use log::{debug, trace};
use std::io;
use std::process::Stdio;
use tokio::process::{Child, Command};

use super::{StationStatus, WirelessRadio};

pub struct NmcliRadio {
    interface: String,
    ap_essid: String,
    ap_password: String,
    association: Option<Child>,
}

impl NmcliRadio {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ap_essid: String::new(),
            ap_password: String::new(),
            association: None,
        }
    }

    fn hotspot_name(&self) -> String {
        format!("{}-ap", self.ap_essid)
    }

    async fn run(&self, args: &[&str]) -> io::Result<String> {
        trace!("nmcli {}", args.join(" "));
        let output = Command::new("nmcli").args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("nmcli {}: {}", args.first().unwrap_or(&""), stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn abort_association(&mut self) {
        if let Some(mut child) = self.association.take() {
            if let Ok(None) = child.try_wait() {
                debug!("nmcli: aborting pending association");
                if let Err(e) = child.kill().await {
                    debug!("nmcli: kill failed: {}", e);
                }
            }
        }
    }
}

/// Map `nmcli -g GENERAL.STATE` output (e.g. `100 (connected)`) to a station status.
pub(crate) fn parse_device_state(output: &str) -> StationStatus {
    let code = output
        .trim()
        .split_whitespace()
        .next()
        .and_then(|c| c.parse::<u32>().ok());
    match code {
        Some(100) => StationStatus::GotIp,
        Some(40..=90) => StationStatus::Connecting,
        Some(120) => StationStatus::Failed,
        _ => StationStatus::Idle,
    }
}

impl WirelessRadio for NmcliRadio {
    async fn configure_access_point(&mut self, essid: &str, password: &str) -> io::Result<()> {
        self.ap_essid = essid.to_string();
        self.ap_password = password.to_string();
        Ok(())
    }

    async fn set_access_point_active(&mut self, active: bool) -> io::Result<()> {
        let name = self.hotspot_name();
        if active {
            let iface = self.interface.clone();
            let essid = self.ap_essid.clone();
            let password = self.ap_password.clone();
            self.run(&[
                "device", "wifi", "hotspot", "ifname", &iface, "con-name", &name, "ssid", &essid,
                "password", &password,
            ])
            .await
            .map(|_| ())
        } else {
            // Bringing down a hotspot that was never up is not an error here.
            if let Err(e) = self.run(&["connection", "down", &name]).await {
                debug!("nmcli: hotspot {} not active: {}", name, e);
            }
            Ok(())
        }
    }

    async fn set_station_active(&mut self, active: bool) -> io::Result<()> {
        if active {
            self.run(&["radio", "wifi", "on"]).await.map(|_| ())
        } else {
            self.abort_association().await;
            Ok(())
        }
    }

    async fn set_station_hostname(&mut self, hostname: &str) -> io::Result<()> {
        self.run(&["general", "hostname", hostname]).await.map(|_| ())
    }

    async fn station_status(&mut self) -> io::Result<StationStatus> {
        let iface = self.interface.clone();
        let out = self
            .run(&["-g", "GENERAL.STATE", "device", "show", &iface])
            .await?;
        Ok(parse_device_state(&out))
    }

    async fn begin_association(&mut self, ssid: &str, password: &str) -> io::Result<()> {
        self.abort_association().await;
        let child = Command::new("nmcli")
            .args([
                "device",
                "wifi",
                "connect",
                ssid,
                "password",
                password,
                "ifname",
                self.interface.as_str(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        self.association = Some(child);
        Ok(())
    }
}

//! # Configuration Management Module
//!
//! All tunables of the bridge node live in one immutable [`Config`] that is loaded
//! once at startup and passed by reference into the link, session and forwarding
//! constructors. Nothing reads configuration ad hoc after boot.
//!
//! ## Configuration Structure
//!
//! - [`NodeConfig`] - identity override, client-id suffix, boot settle delay
//! - [`WifiConfig`] - station credentials, local access point fallback, radio backend
//! - [`MqttConfig`] - broker endpoint, credentials, topics and call bounds
//! - [`SerialConfig`] - UART device and drain-cycle timing
//! - [`HardwareConfig`] - enable line wiring
//! - [`SupervisorConfig`] - fault cooldown
//! - [`LoggingConfig`] - logging level and optional file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [wifi]
//! station_ssid = "upstream"
//! station_password = "secret"
//! ap_enabled = false
//!
//! [mqtt]
//! host = "broker.local"
//! port = 1883
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ```
//!
//! Every section has defaults, so a file only needs the values that differ.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub serial: SerialConfig,
    pub hardware: HardwareConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hex string used instead of the machine id when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Appended to the base identity to form the broker client id.
    pub client_suffix: String,
    /// Settle time between link bring-up and the first broker connection attempt.
    pub startup_delay_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            unique_id: None,
            client_suffix: "_smarty".to_string(),
            startup_delay_secs: 10,
        }
    }
}

/// Which radio driver the link manager talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioBackend {
    /// Networking is owned by the operating system; the link is treated as associated.
    Managed,
    /// NetworkManager driven through `nmcli`.
    Nmcli,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub backend: RadioBackend,
    pub interface: String,
    pub station_ssid: String,
    pub station_password: String,
    pub ap_enabled: bool,
    pub ap_password: String,
    pub association_timeout_ms: u64,
    pub status_poll_ms: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            backend: RadioBackend::Managed,
            interface: "wlan0".to_string(),
            station_ssid: String::new(),
            station_password: String::new(),
            ap_enabled: false,
            ap_password: String::new(),
            association_timeout_ms: 20_000,
            status_poll_ms: 100,
        }
    }
}

impl WifiConfig {
    pub fn association_timeout(&self) -> Duration {
        Duration::from_millis(self.association_timeout_ms)
    }
    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub use_tls: bool,
    pub keepalive_secs: u16,
    /// Pause after CONNACK before the logon announcement.
    pub settle_delay_ms: u64,
    /// Upper bound for every individual broker call.
    pub call_timeout_ms: u64,
    pub control_topic: String,
    pub data_topic: String,
    pub reset_directive: String,
    /// Maximum control messages applied per inbound poll.
    pub inbox_limit: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            use_tls: false,
            keepalive_secs: 60,
            settle_delay_ms: 500,
            call_timeout_ms: 10_000,
            control_topic: "smarty_control".to_string(),
            data_topic: "smarty_data".to_string(),
            reset_directive: "reset".to_string(),
            inbox_limit: 8,
        }
    }
}

impl MqttConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub readiness_timeout_ms: u64,
    pub inter_read_pause_ms: u64,
    /// A drain cycle ends early once this many bytes are buffered.
    pub max_message_bytes: usize,
    /// Publish zero-length messages when a readiness event yields no bytes.
    pub publish_empty_drains: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            readiness_timeout_ms: 10_000,
            inter_read_pause_ms: 5,
            max_message_bytes: 16 * 1024,
            publish_empty_drains: false,
        }
    }
}

impl SerialConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }
    pub fn inter_read_pause(&self) -> Duration {
        Duration::from_millis(self.inter_read_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// sysfs GPIO number of the enable line; unset means the line is not wired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_gpio: Option<u32>,
    /// The attached device transmits while the line is low.
    pub enable_active_low: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            enable_gpio: None,
            enable_active_low: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub cooldown_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { cooldown_secs: 30 }
    }
}

impl SupervisorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("smartybridge.log".to_string()),
        }
    }
}

impl LoggingConfig {
    /// Parsed level; unknown strings fall back to `Info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// MQTT strings carry a 16-bit length prefix.
const MAX_FIELD_BYTES: usize = u16::MAX as usize;

/// Fixed header, topic length prefix and packet id of a PUBLISH.
const PUBLISH_OVERHEAD: usize = 5 + 2 + 2;

fn check_length(name: &str, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_BYTES {
        bail!(
            "{} is {} bytes; the limit is {}",
            name,
            value.len(),
            MAX_FIELD_BYTES
        );
    }
    Ok(())
}

fn check_topic(name: &str, topic: &str) -> Result<()> {
    check_length(&format!("mqtt.{}", name), topic)?;
    if topic.is_empty() {
        bail!("mqtt.{} must not be empty", name);
    }
    if topic.contains(['+', '#']) {
        bail!("mqtt.{} '{}' must not contain wildcards", name, topic);
    }
    Ok(())
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Largest PUBLISH the node sends: one full drain cycle on the longer topic.
    pub fn max_packet_bytes(&self) -> usize {
        let topic = self.mqtt.data_topic.len().max(self.mqtt.control_topic.len());
        self.serial.max_message_bytes + topic + PUBLISH_OVERHEAD
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            bail!("mqtt.host must not be empty");
        }
        if self.mqtt.port == 0 {
            bail!("mqtt.port must be non-zero");
        }
        check_topic("control_topic", &self.mqtt.control_topic)?;
        check_topic("data_topic", &self.mqtt.data_topic)?;
        if self.mqtt.control_topic == self.mqtt.data_topic {
            bail!("mqtt.control_topic and mqtt.data_topic must differ");
        }
        if self.mqtt.reset_directive.is_empty() {
            bail!("mqtt.reset_directive must not be empty");
        }
        if let Some(username) = &self.mqtt.username {
            check_length("mqtt.username", username)?;
        }
        if let Some(password) = &self.mqtt.password {
            check_length("mqtt.password", password)?;
        }
        if let Some(id) = &self.node.unique_id {
            check_length("node.unique_id", &format!("{}{}", id, self.node.client_suffix))?;
        }
        if self.mqtt.call_timeout_ms == 0 {
            bail!("mqtt.call_timeout_ms must be non-zero");
        }
        if self.mqtt.inbox_limit == 0 {
            bail!("mqtt.inbox_limit must be at least 1");
        }
        if self.serial.readiness_timeout_ms == 0 || self.serial.inter_read_pause_ms == 0 {
            bail!("serial timing values must be non-zero");
        }
        if self.serial.max_message_bytes == 0 {
            bail!("serial.max_message_bytes must be non-zero");
        }
        // Pings go out between readiness waits, so half the keepalive must outlast one wait.
        let keepalive_ms = u64::from(self.mqtt.keepalive_secs) * 1000;
        if keepalive_ms != 0 && keepalive_ms / 2 <= self.serial.readiness_timeout_ms {
            bail!(
                "mqtt.keepalive_secs ({}) must exceed twice serial.readiness_timeout_ms ({} ms)",
                self.mqtt.keepalive_secs,
                self.serial.readiness_timeout_ms
            );
        }
        if self.wifi.association_timeout_ms == 0 || self.wifi.status_poll_ms == 0 {
            bail!("wifi timing values must be non-zero");
        }
        #[cfg(not(feature = "tls"))]
        if self.mqtt.use_tls {
            bail!("mqtt.use_tls requires a build with the 'tls' feature");
        }
        Ok(())
    }
}

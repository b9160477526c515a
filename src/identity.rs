//! Node identity derived from a hardware-unique identifier.
//!
//! The same lower-case hex string serves as the wireless hostname and as the base
//! broker client id. It is computed once at boot and never changes afterwards.

use anyhow::{anyhow, Result};
use log::debug;

const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    hostname: String,
    client_id: String,
}

impl NodeIdentity {
    /// Build an identity from raw id bytes (hex encoded).
    pub fn from_unique_id(id: &[u8]) -> Self {
        let hex: String = id.iter().map(|b| format!("{:02x}", b)).collect();
        Self {
            hostname: hex.clone(),
            client_id: hex,
        }
    }

    /// Build an identity from an id that is already textual hex.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("unique id '{}' is not a hex string", hex));
        }
        Ok(Self {
            hostname: hex.clone(),
            client_id: hex,
        })
    }

    /// Resolve the identity for this process: config override first, then the machine id.
    pub fn detect(override_id: Option<&str>) -> Result<Self> {
        if let Some(id) = override_id {
            return Self::from_hex(id);
        }
        for path in MACHINE_ID_PATHS {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    debug!("Using machine id from {}", path);
                    return Self::from_hex(&content);
                }
                Err(e) => debug!("No machine id at {}: {}", path, e),
            }
        }
        Err(anyhow!(
            "no hardware id available; set node.unique_id in the config file"
        ))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encodes_raw_id() {
        let id = NodeIdentity::from_unique_id(&[0x24, 0x0a, 0xc4, 0x00, 0xff]);
        assert_eq!(id.hostname(), "240ac400ff");
        assert_eq!(id.client_id(), "240ac400ff");
    }

    #[test]
    fn override_is_normalized() {
        let id = NodeIdentity::detect(Some(" A1B2C3\n")).unwrap();
        assert_eq!(id.hostname(), "a1b2c3");
    }

    #[test]
    fn rejects_non_hex_override() {
        assert!(NodeIdentity::from_hex("node-1").is_err());
        assert!(NodeIdentity::from_hex("").is_err());
    }
}

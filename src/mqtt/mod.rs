//! # MQTT Client
//!
//! [`MqttTransport`] implements [`crate::session::BrokerTransport`] on top of the
//! `rumqttc` event loop, over TCP or (with the `tls` feature) rustls.
//!
//! The session layer only sees the small option types below, so fakes can stand in
//! for the broker without pulling in a client.

mod client;

pub use client::MqttTransport;

/// Message the broker publishes on our behalf when the connection drops uncleanly.
/// Always sent at QoS 0 and not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Everything the CONNECT packet carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub keepalive_secs: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub will: Option<LastWill>,
}

/// Human readable CONNACK return code (MQTT 3.1.1 table 3.1).
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown",
    }
}

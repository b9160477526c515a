use std::time::Duration;
use thiserror::Error;

use crate::mqtt::connack_reason;

fn refused_reason(code: &u8) -> &'static str {
    connack_reason(*code)
}

/// Failures of the broker session. Any of them ends the current run; the
/// supervisor decides what happens next.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(rumqttc::ConnectionError),

    #[error("could not resolve broker host '{0}'")]
    Resolve(String),

    #[error("broker refused connection: {} (code {0})", refused_reason(.0))]
    Refused(u8),

    #[error("broker rejected subscription to '{0}'")]
    SubscribeRejected(String),

    #[error("broker closed the connection")]
    ConnectionClosed,

    #[error("no PINGRESP within the keepalive interval")]
    KeepaliveExpired,

    #[error("{0} did not complete within {1:?}")]
    Timeout(&'static str, Duration),

    #[error("session is not connected")]
    NotConnected,

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

//! # Broker Session
//!
//! Owns the MQTT session with the presence protocol the operators watch:
//!
//! - a last-will `logoff/<client-id>/lastwill` is registered on the control topic
//!   before the connection is established
//! - `logon/<client-id>` is announced on the control topic after a short settle delay
//! - the control topic is subscribed once, after the announcement
//! - `logoff/<client-id>` is published before an orderly disconnect
//!
//! Inbound control messages are not delivered through callbacks. They queue in the
//! transport and are drained explicitly with [`SessionClient::poll_incoming`], which
//! turns each one into a [`ControlAction`] through the pure [`dispatch`] function.
//!
//! Every broker call is bounded by `mqtt.call_timeout_ms` so a dead link surfaces as
//! [`SessionError::Timeout`] instead of stalling the node.

mod error;

pub use error::SessionError;

use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;

use crate::config::{Config, MqttConfig};
use crate::identity::NodeIdentity;
use crate::logutil::payload_preview;
use crate::metrics;
use crate::mqtt::{ConnectOptions, LastWill};

/// Broker address and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_encrypted_transport: bool,
}

impl BrokerEndpoint {
    pub fn from_config(mqtt: &MqttConfig) -> Self {
        Self {
            host: mqtt.host.clone(),
            port: mqtt.port,
            username: mqtt.username.clone(),
            password: mqtt.password.clone(),
            use_encrypted_transport: mqtt.use_tls,
        }
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_encrypted_transport {
            "mqtts"
        } else {
            "mqtt"
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Session behaviour that is not part of the endpoint.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub client_suffix: String,
    pub keepalive_secs: u16,
    pub settle_delay: Duration,
    pub call_timeout: Duration,
    pub control_topic: String,
    pub data_topic: String,
    pub reset_directive: String,
    pub inbox_limit: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_suffix: config.node.client_suffix.clone(),
            keepalive_secs: config.mqtt.keepalive_secs,
            settle_delay: config.mqtt.settle_delay(),
            call_timeout: config.mqtt.call_timeout(),
            control_topic: config.mqtt.control_topic.clone(),
            data_topic: config.mqtt.data_topic.clone(),
            reset_directive: config.mqtt.reset_directive.clone(),
            inbox_limit: config.mqtt.inbox_limit,
        }
    }
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Restart the whole node immediately.
    Reset,
    Ignore,
}

/// Decide what an inbound message asks for.
///
/// Only an exact match of the reset directive on the control topic triggers a reset.
pub fn dispatch(message: &ControlMessage, control_topic: &str, reset_directive: &str) -> ControlAction {
    if message.topic == control_topic && message.payload == reset_directive.as_bytes() {
        ControlAction::Reset
    } else {
        ControlAction::Ignore
    }
}

/// Byte transport to the broker.
///
/// [`crate::mqtt::MqttTransport`] speaks MQTT through `rumqttc`; tests substitute
/// in-memory fakes. Inbound publishes are buffered by the transport until polled.
#[allow(async_fn_in_trait)]
pub trait BrokerTransport {
    /// Connect and wait for the broker's acknowledgement.
    async fn open(
        &mut self,
        endpoint: &BrokerEndpoint,
        options: &ConnectOptions,
    ) -> Result<(), SessionError>;

    /// Fire-and-forget publish.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;

    /// Subscribe and wait for the acknowledgement.
    async fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    /// Return up to `max` buffered inbound messages without waiting for new ones.
    async fn poll_inbound(&mut self, max: usize) -> Result<Vec<ControlMessage>, SessionError>;

    /// Orderly close.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Identity of an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub client_id: String,
    pub will_topic: String,
    pub will_payload: String,
    pub keepalive_secs: u16,
}

pub fn logon_payload(client_id: &str) -> String {
    format!("logon/{}", client_id)
}

pub fn logoff_payload(client_id: &str) -> String {
    format!("logoff/{}", client_id)
}

pub fn last_will_payload(client_id: &str) -> String {
    format!("logoff/{}/lastwill", client_id)
}

async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout(operation, limit)),
    }
}

/// A connected broker session.
///
/// Only [`SessionClient::connect`] creates one, so holding a `SessionClient` means
/// the logon announcement has already been published.
pub struct SessionClient<T: BrokerTransport> {
    transport: T,
    settings: SessionSettings,
    handle: Option<SessionHandle>,
}

impl<T: BrokerTransport> SessionClient<T> {
    /// Establish the session and announce presence.
    pub async fn connect(
        identity: &NodeIdentity,
        endpoint: &BrokerEndpoint,
        mut transport: T,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let client_id = format!("{}{}", identity.client_id(), settings.client_suffix);
        let will_payload = last_will_payload(&client_id);
        let options = ConnectOptions {
            client_id: client_id.clone(),
            keepalive_secs: settings.keepalive_secs,
            clean_session: true,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            will: Some(LastWill {
                topic: settings.control_topic.clone(),
                payload: will_payload.clone().into_bytes(),
            }),
        };

        info!("Connecting to {} as {}", endpoint, client_id);
        bounded("connect", settings.call_timeout, transport.open(endpoint, &options)).await?;
        info!("Connected to MQTT broker {}", endpoint.host);

        tokio::time::sleep(settings.settle_delay).await;

        let logon = logon_payload(&client_id);
        bounded(
            "logon publish",
            settings.call_timeout,
            transport.publish(&settings.control_topic, logon.as_bytes()),
        )
        .await?;
        debug!("announced {} on {}", logon, settings.control_topic);

        bounded(
            "subscribe",
            settings.call_timeout,
            transport.subscribe(&settings.control_topic),
        )
        .await?;
        info!("Subscribed to {}", settings.control_topic);

        let handle = SessionHandle {
            client_id,
            will_topic: settings.control_topic.clone(),
            will_payload,
            keepalive_secs: settings.keepalive_secs,
        };
        Ok(Self {
            transport,
            settings,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        if self.handle.is_none() {
            return Err(SessionError::NotConnected);
        }
        bounded(
            "publish",
            self.settings.call_timeout,
            self.transport.publish(topic, payload),
        )
        .await
    }

    /// Publish on the data topic.
    pub async fn publish_data(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let topic = self.settings.data_topic.clone();
        self.publish(&topic, payload).await
    }

    /// Apply queued control messages, at most `inbox_limit` per call.
    ///
    /// Returns [`ControlAction::Reset`] as soon as a reset directive is seen; any
    /// messages queued behind it are irrelevant because the node is restarting.
    pub async fn poll_incoming(&mut self) -> Result<ControlAction, SessionError> {
        if self.handle.is_none() {
            return Err(SessionError::NotConnected);
        }
        let messages = bounded(
            "inbound poll",
            self.settings.call_timeout,
            self.transport.poll_inbound(self.settings.inbox_limit),
        )
        .await?;

        for message in messages {
            metrics::inc_control_messages();
            let action = dispatch(
                &message,
                &self.settings.control_topic,
                &self.settings.reset_directive,
            );
            match action {
                ControlAction::Reset => {
                    warn!("Reset directive received on {}", message.topic);
                    return Ok(ControlAction::Reset);
                }
                ControlAction::Ignore => {
                    debug!(
                        "ignoring control message on {}: {}",
                        message.topic,
                        payload_preview(&message.payload)
                    );
                }
            }
        }
        Ok(ControlAction::Ignore)
    }

    /// Publish the logoff announcement and close the connection.
    ///
    /// Disconnecting twice is a no-op. The transport is closed even when the logoff
    /// publish fails; the first error is returned.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let logoff = logoff_payload(&handle.client_id);
        let announced = bounded(
            "logoff publish",
            self.settings.call_timeout,
            self.transport
                .publish(&self.settings.control_topic, logoff.as_bytes()),
        )
        .await;
        let closed = bounded("disconnect", self.settings.call_timeout, self.transport.close()).await;
        info!("Disconnected from broker as {}", handle.client_id);
        announced.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &[u8]) -> ControlMessage {
        ControlMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn only_exact_reset_on_control_topic_resets() {
        assert_eq!(
            dispatch(&message("smarty_control", b"reset"), "smarty_control", "reset"),
            ControlAction::Reset
        );
        assert_eq!(
            dispatch(&message("smarty_control", b"reset "), "smarty_control", "reset"),
            ControlAction::Ignore
        );
        assert_eq!(
            dispatch(&message("smarty_control", b"RESET"), "smarty_control", "reset"),
            ControlAction::Ignore
        );
        assert_eq!(
            dispatch(&message("smarty_data", b"reset"), "smarty_control", "reset"),
            ControlAction::Ignore
        );
        assert_eq!(
            dispatch(&message("smarty_control", b"logon/x_smarty"), "smarty_control", "reset"),
            ControlAction::Ignore
        );
    }

    #[test]
    fn presence_payloads() {
        assert_eq!(logon_payload("ab_smarty"), "logon/ab_smarty");
        assert_eq!(logoff_payload("ab_smarty"), "logoff/ab_smarty");
        assert_eq!(last_will_payload("ab_smarty"), "logoff/ab_smarty/lastwill");
    }

    #[test]
    fn endpoint_display_shows_scheme() {
        let mut endpoint = BrokerEndpoint::from_config(&MqttConfig::default());
        assert_eq!(endpoint.to_string(), "mqtt://localhost:1883");
        endpoint.use_encrypted_transport = true;
        endpoint.port = 8883;
        assert_eq!(endpoint.to_string(), "mqtts://localhost:8883");
    }
}

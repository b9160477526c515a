//! Broker transport over the `rumqttc` event loop.
//!
//! `rumqttc` only makes progress while its [`EventLoop`] is polled. Requests go into
//! the client's channel and each call here drives the loop until the matching
//! outgoing or incoming event shows up, so a returned `publish` has been written to
//! the socket. Publishes that arrive in the meantime are kept for the next
//! [`BrokerTransport::poll_inbound`].

use log::{debug, trace};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, StateError, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::net::lookup_host;

use super::ConnectOptions;
use crate::session::{BrokerEndpoint, BrokerTransport, ControlMessage, SessionError};

/// Inbound packets larger than this end the session.
const MAX_INBOUND_PACKET: usize = 256 * 1024;
const DEFAULT_MAX_OUTBOUND_PACKET: usize = 256 * 1024;
/// Requests queued between two event loop polls.
const REQUEST_CAPACITY: usize = 16;
/// Ready events handled by one non-blocking poll.
const MAX_EVENTS_PER_POLL: usize = 64;

struct Connection {
    client: AsyncClient,
    events: EventLoop,
}

/// MQTT 3.1.1 transport with QoS 0 publishes and a single subscription.
pub struct MqttTransport {
    max_outbound_packet: usize,
    connection: Option<Connection>,
    inbox: VecDeque<ControlMessage>,
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            max_outbound_packet: DEFAULT_MAX_OUTBOUND_PACKET,
            connection: None,
            inbox: VecDeque::new(),
        }
    }

    /// Allow outgoing packets up to `bytes`, see [`crate::config::Config::max_packet_bytes`].
    pub fn with_max_packet_size(mut self, bytes: usize) -> Self {
        self.max_outbound_packet = bytes;
        self
    }

    /// Inbound publishes waiting to be polled.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Poll the event loop until `done` accepts an event, keeping inbound publishes.
    async fn drive_until<F>(&mut self, done: F) -> Result<Event, SessionError>
    where
        F: Fn(&Event) -> bool,
    {
        let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        loop {
            let event = connection.events.poll().await.map_err(classify)?;
            if done(&event) {
                return Ok(event);
            }
            absorb(&mut self.inbox, event);
        }
    }
}

/// Client options for one connection attempt.
pub(crate) fn mqtt_options(
    endpoint: &BrokerEndpoint,
    options: &ConnectOptions,
    max_outbound_packet: usize,
) -> Result<MqttOptions, SessionError> {
    let mut mqtt = MqttOptions::new(options.client_id.clone(), endpoint.host.clone(), endpoint.port);
    mqtt.set_keep_alive(Duration::from_secs(u64::from(options.keepalive_secs)))
        .set_clean_session(options.clean_session)
        .set_max_packet_size(MAX_INBOUND_PACKET, max_outbound_packet);

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt.set_credentials(username.clone(), password);
    }
    if let Some(will) = &options.will {
        mqtt.set_last_will(rumqttc::LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            QoS::AtMostOnce,
            false,
        ));
    }
    if endpoint.use_encrypted_transport {
        mqtt.set_transport(tls_transport()?);
    }
    Ok(mqtt)
}

#[cfg(feature = "tls")]
fn tls_transport() -> Result<rumqttc::Transport, SessionError> {
    Ok(rumqttc::Transport::tls_with_default_config())
}

#[cfg(not(feature = "tls"))]
fn tls_transport() -> Result<rumqttc::Transport, SessionError> {
    Err(SessionError::Tls("built without the 'tls' feature".to_string()))
}

async fn resolve(endpoint: &BrokerEndpoint) -> Result<(), SessionError> {
    let mut addrs = lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|_| SessionError::Resolve(endpoint.host.clone()))?;
    let addr = addrs
        .next()
        .ok_or_else(|| SessionError::Resolve(endpoint.host.clone()))?;
    debug!("mqtt: {} resolved to {}", endpoint.host, addr);
    Ok(())
}

fn is_hangup(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
    )
}

fn classify(err: ConnectionError) -> SessionError {
    match err {
        ConnectionError::ConnectionRefused(code) => SessionError::Refused(return_code(code)),
        ConnectionError::MqttState(StateError::AwaitPingResp) => SessionError::KeepaliveExpired,
        ConnectionError::MqttState(StateError::Io(e)) | ConnectionError::Io(e) if is_hangup(&e) => {
            SessionError::ConnectionClosed
        }
        ConnectionError::Io(e) => SessionError::Io(e),
        other => SessionError::Connection(other),
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    code as u8
}

fn absorb(inbox: &mut VecDeque<ControlMessage>, event: Event) {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            trace!("mqtt rx {} bytes on {}", publish.payload.len(), publish.topic);
            inbox.push_back(ControlMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            });
        }
        other => trace!("mqtt: {:?}", other),
    }
}

impl BrokerTransport for MqttTransport {
    async fn open(
        &mut self,
        endpoint: &BrokerEndpoint,
        options: &ConnectOptions,
    ) -> Result<(), SessionError> {
        resolve(endpoint).await?;
        let mqtt = mqtt_options(endpoint, options, self.max_outbound_packet)?;
        let (client, events) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
        self.connection = Some(Connection { client, events });
        self.inbox.clear();

        let connected = self
            .drive_until(|event| matches!(event, Event::Incoming(Packet::ConnAck(_))))
            .await;
        match connected {
            Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code != ConnectReturnCode::Success => {
                self.connection = None;
                Err(SessionError::Refused(return_code(ack.code)))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.connection = None;
                Err(e)
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let connection = self.connection.as_ref().ok_or(SessionError::NotConnected)?;
        connection
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await?;
        self.drive_until(|event| matches!(event, Event::Outgoing(Outgoing::Publish(_))))
            .await
            .map(|_| ())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let connection = self.connection.as_ref().ok_or(SessionError::NotConnected)?;
        connection.client.subscribe(topic, QoS::AtMostOnce).await?;
        let acked = self
            .drive_until(|event| matches!(event, Event::Incoming(Packet::SubAck(_))))
            .await?;
        match acked {
            Event::Incoming(Packet::SubAck(ack))
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure)) =>
            {
                Err(SessionError::SubscribeRejected(topic.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn poll_inbound(&mut self, max: usize) -> Result<Vec<ControlMessage>, SessionError> {
        let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        for _ in 0..MAX_EVENTS_PER_POLL {
            if self.inbox.len() >= max {
                break;
            }
            // A zero timeout polls the event loop once: only what is already ready
            // is handled, including a due keepalive ping.
            match tokio::time::timeout(Duration::ZERO, connection.events.poll()).await {
                Ok(event) => absorb(&mut self.inbox, event.map_err(classify)?),
                Err(_) => break,
            }
        }

        let take = max.min(self.inbox.len());
        Ok(self.inbox.drain(..take).collect())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        connection.client.disconnect().await?;
        loop {
            match connection.events.poll().await.map_err(classify)? {
                Event::Outgoing(Outgoing::Disconnect) => return Ok(()),
                event => absorb(&mut self.inbox, event),
            }
        }
    }
}

//! Test utilities & fixtures.
//! Scripted stand-ins for the radio, broker, UART, enable line, console and restart
//! hardware. Every collaborator writes into one shared [`EventLog`] so tests can
//! assert on the global order of side effects.
#![allow(dead_code)] // Each test binary uses a different subset.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

use smartybridge::config::Config;
use smartybridge::forward::ForwardSettings;
use smartybridge::hardware::{Console, EnablePin, Level, OutputLine, Restarter, SharedConsole};
use smartybridge::identity::NodeIdentity;
use smartybridge::link::{StationStatus, WirelessRadio};
use smartybridge::mqtt::ConnectOptions;
use smartybridge::serial::{Readiness, SerialSource};
use smartybridge::session::{
    BrokerEndpoint, BrokerTransport, ControlMessage, SessionError, SessionSettings,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open {
        client_id: String,
        will_topic: String,
        will_payload: Vec<u8>,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
    },
    Subscribe(String),
    Close,
    Line(Level),
    ConsoleAttached,
    ConsoleDetached,
    Restart(String),
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<(Instant, Event)>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.0.lock().unwrap().push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, Event)> {
        self.0.lock().unwrap().clone()
    }

    /// Payloads published on `topic`, in order.
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Publish { topic: t, payload } if t == topic => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, wanted: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == wanted)
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    pub fn publish_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Publish { .. }))
            .count()
    }
}

pub fn publish(topic: &str, payload: &[u8]) -> Event {
    Event::Publish {
        topic: topic.to_string(),
        payload: payload.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// Broker

/// In-memory broker transport.
pub struct FakeBroker {
    log: EventLog,
    refuse: Option<u8>,
    hang_on_publish: bool,
    fail_on_publish: Option<usize>,
    publishes: usize,
    opened_at: Option<Instant>,
    inbound: VecDeque<(Duration, ControlMessage)>,
}

impl FakeBroker {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            refuse: None,
            hang_on_publish: false,
            fail_on_publish: None,
            publishes: 0,
            opened_at: None,
            inbound: VecDeque::new(),
        }
    }

    /// Reject CONNECT with the given return code.
    pub fn refusing(mut self, code: u8) -> Self {
        self.refuse = Some(code);
        self
    }

    /// Never complete a publish.
    pub fn hanging(mut self) -> Self {
        self.hang_on_publish = true;
        self
    }

    /// Fail the n-th publish (1-based, logon included) with a closed connection.
    pub fn failing_publish(mut self, nth: usize) -> Self {
        self.fail_on_publish = Some(nth);
        self
    }

    /// Deliver a message `after` the connection opens. Entries must be in time order.
    pub fn with_inbound(mut self, after: Duration, topic: &str, payload: &[u8]) -> Self {
        self.inbound.push_back((
            after,
            ControlMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            },
        ));
        self
    }
}

impl BrokerTransport for FakeBroker {
    async fn open(
        &mut self,
        _endpoint: &BrokerEndpoint,
        options: &ConnectOptions,
    ) -> Result<(), SessionError> {
        if let Some(code) = self.refuse {
            return Err(SessionError::Refused(code));
        }
        let will = options.will.clone().expect("session must register a will");
        self.log.record(Event::Open {
            client_id: options.client_id.clone(),
            will_topic: will.topic,
            will_payload: will.payload,
        });
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        if self.hang_on_publish {
            std::future::pending::<()>().await;
        }
        self.publishes += 1;
        if self.fail_on_publish == Some(self.publishes) {
            return Err(SessionError::ConnectionClosed);
        }
        self.log.record(publish(topic, payload));
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        self.log.record(Event::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn poll_inbound(&mut self, max: usize) -> Result<Vec<ControlMessage>, SessionError> {
        let opened = self.opened_at.ok_or(SessionError::NotConnected)?;
        let now = Instant::now();
        let mut out = Vec::new();
        while out.len() < max {
            match self.inbound.front() {
                Some((after, _)) if opened + *after <= now => {
                    if let Some((_, message)) = self.inbound.pop_front() {
                        out.push(message);
                    }
                }
                _ => break,
            }
        }
        Ok(out)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.log.record(Event::Close);
        self.opened_at = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serial

#[derive(Debug, Clone)]
pub enum SerialStep {
    Bytes(Vec<u8>),
    /// Readiness reports an error condition.
    Fault(String),
    /// The next read fails.
    ReadFault,
}

/// Scripted UART. Step times are relative to the first call into the source, so
/// session setup time does not shift the script.
pub struct FakeSerial {
    origin: Option<Instant>,
    script: VecDeque<(Duration, SerialStep)>,
    buffered: Vec<u8>,
    fault: Option<String>,
    read_fault: bool,
    persistent_fault: Option<String>,
    readiness_calls: Arc<AtomicUsize>,
}

impl FakeSerial {
    pub fn new(script: Vec<(Duration, SerialStep)>) -> Self {
        Self {
            origin: None,
            script: script.into(),
            buffered: Vec::new(),
            fault: None,
            read_fault: false,
            persistent_fault: None,
            readiness_calls: Arc::default(),
        }
    }

    /// A line whose readiness check fails on every call, like an unplugged adapter.
    pub fn failing(reason: &str) -> Self {
        let mut serial = Self::new(vec![]);
        serial.persistent_fault = Some(reason.to_string());
        serial
    }

    /// Shared count of `wait_readable` calls.
    pub fn readiness_calls(&self) -> Arc<AtomicUsize> {
        self.readiness_calls.clone()
    }

    /// Byte chunks arriving at the given millisecond offsets.
    pub fn chunks(chunks: Vec<(u64, Vec<u8>)>) -> Self {
        Self::new(
            chunks
                .into_iter()
                .map(|(ms, bytes)| (Duration::from_millis(ms), SerialStep::Bytes(bytes)))
                .collect(),
        )
    }

    fn origin(&mut self) -> Instant {
        *self.origin.get_or_insert_with(Instant::now)
    }

    fn advance(&mut self) {
        let origin = self.origin();
        let now = Instant::now();
        while let Some((at, _)) = self.script.front() {
            if origin + *at > now {
                break;
            }
            if let Some((_, step)) = self.script.pop_front() {
                match step {
                    SerialStep::Bytes(bytes) => self.buffered.extend_from_slice(&bytes),
                    SerialStep::Fault(e) => self.fault = Some(e),
                    SerialStep::ReadFault => self.read_fault = true,
                }
            }
        }
    }

    fn next_due(&mut self) -> Option<Instant> {
        let origin = self.origin();
        self.script.front().map(|(at, _)| origin + *at)
    }
}

impl SerialSource for FakeSerial {
    async fn wait_readable(&mut self, timeout: Duration) -> Readiness {
        self.readiness_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.persistent_fault {
            return Readiness::Error(e.clone());
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.advance();
            if let Some(e) = self.fault.take() {
                return Readiness::Error(e);
            }
            if !self.buffered.is_empty() {
                return Readiness::Readable;
            }
            if Instant::now() >= deadline {
                return Readiness::TimedOut;
            }
            let wake = match self.next_due() {
                Some(due) if due < deadline => due,
                _ => deadline,
            };
            sleep_until(wake).await;
        }
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.advance();
        Ok(self.buffered.len())
    }

    fn read_available(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        self.advance();
        if self.read_fault {
            self.read_fault = false;
            return Err(io::Error::new(io::ErrorKind::Other, "framing error"));
        }
        let n = limit.min(self.buffered.len());
        buf.extend(self.buffered.drain(..n));
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Hardware

pub struct RecordingLine(pub EventLog);

impl OutputLine for RecordingLine {
    fn set_level(&mut self, level: Level) -> io::Result<()> {
        self.0.record(Event::Line(level));
        Ok(())
    }
}

pub struct RecordingConsole(pub EventLog);

impl Console for RecordingConsole {
    fn detach(&mut self) {
        self.0.record(Event::ConsoleDetached);
    }

    fn attach(&mut self) {
        self.0.record(Event::ConsoleAttached);
    }
}

pub struct RecordingRestarter(pub EventLog);

impl Restarter for RecordingRestarter {
    fn restart(&mut self, reason: &str) {
        self.0.record(Event::Restart(reason.to_string()));
    }
}

/// Active-low enable line and console wired to the log. Creating the pin records
/// its initial "disabled" level.
pub fn hardware(log: &EventLog) -> (EnablePin, SharedConsole) {
    let pin = EnablePin::new(Box::new(RecordingLine(log.clone())), true);
    let console = SharedConsole::new(Box::new(RecordingConsole(log.clone())));
    (pin, console)
}

/// Level that enables the attached device on an active-low line.
pub const ENABLED: Level = Level::Low;
pub const DISABLED: Level = Level::High;

// ---------------------------------------------------------------------------
// Radio

#[derive(Debug, Default)]
pub struct FakeRadio {
    pub already_associated: bool,
    /// Association succeeds this long after it begins; `None` never succeeds.
    pub associate_after: Option<Duration>,
    pub association_started: Option<Instant>,
    pub ap_essid: Option<String>,
    pub ap_active: bool,
    pub ap_history: Vec<bool>,
    pub station_active: bool,
    pub hostname: Option<String>,
}

impl FakeRadio {
    pub fn associating_after(after: Duration) -> Self {
        Self {
            associate_after: Some(after),
            ..Self::default()
        }
    }

    pub fn never_associating() -> Self {
        Self::default()
    }

    pub fn already_associated() -> Self {
        Self {
            already_associated: true,
            ..Self::default()
        }
    }
}

impl WirelessRadio for FakeRadio {
    async fn configure_access_point(&mut self, essid: &str, _password: &str) -> io::Result<()> {
        self.ap_essid = Some(essid.to_string());
        Ok(())
    }

    async fn set_access_point_active(&mut self, active: bool) -> io::Result<()> {
        self.ap_active = active;
        self.ap_history.push(active);
        Ok(())
    }

    async fn set_station_active(&mut self, active: bool) -> io::Result<()> {
        self.station_active = active;
        Ok(())
    }

    async fn set_station_hostname(&mut self, hostname: &str) -> io::Result<()> {
        self.hostname = Some(hostname.to_string());
        Ok(())
    }

    async fn station_status(&mut self) -> io::Result<StationStatus> {
        if self.already_associated {
            return Ok(StationStatus::GotIp);
        }
        match (self.association_started, self.associate_after) {
            (Some(started), Some(after)) if started.elapsed() >= after => Ok(StationStatus::GotIp),
            (Some(_), _) => Ok(StationStatus::Connecting),
            (None, _) => Ok(StationStatus::Idle),
        }
    }

    async fn begin_association(&mut self, _ssid: &str, _password: &str) -> io::Result<()> {
        self.association_started = Some(Instant::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures

pub fn identity() -> NodeIdentity {
    NodeIdentity::from_hex("a1b2c3d4").unwrap()
}

/// Client id the session derives from [`identity`] with the default suffix.
pub const CLIENT_ID: &str = "a1b2c3d4_smarty";

pub fn endpoint() -> BrokerEndpoint {
    BrokerEndpoint::from_config(&Config::default().mqtt)
}

pub fn session_settings() -> SessionSettings {
    SessionSettings::from_config(&Config::default())
}

pub fn forward_settings() -> ForwardSettings {
    ForwardSettings::from_config(&Config::default().serial)
}

/// Config for whole-node runs: no boot delay, managed defaults otherwise.
pub fn node_config() -> Config {
    let mut config = Config::default();
    config.node.startup_delay_secs = 0;
    config.node.unique_id = Some("a1b2c3d4".to_string());
    config
}

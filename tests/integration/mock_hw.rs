//! Mock adapters for integration tests.
//!
//! Every port the controller and the connection manager consume has a
//! recording double here, so tests can script the outside world and assert
//! on what the domain did to it.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};

use fieldlink::app::commands::{Command, Origin, Outcome};
use fieldlink::app::events::AppEvent;
use fieldlink::app::ports::{
    BrokerPort, ClockPort, CommandHandler, EventSink, FirmwareUpdater, InboundMessage, InputPort, LinkPort,
    OutputPort, PowerSample, SensorPort, SensorReading, SessionParams, StorageError, StoragePort,
};
use fieldlink::error::{FirmwareUpdateError, NetworkError};
use fieldlink::schedule::LocalTime;

// ── Board IO ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockIo {
    pub outputs: u8,
    pub inputs: u8,
    /// Every `set_output` call, in order.
    pub writes: Vec<(u8, bool)>,
}

#[allow(dead_code)]
impl MockIo {
    pub fn with_inputs(inputs: u8) -> Self {
        Self { inputs, ..Self::default() }
    }

    pub fn on(&self, ch: u8) -> bool {
        self.outputs & (1 << ch) != 0
    }
}

impl OutputPort for MockIo {
    fn set_output(&mut self, channel: u8, on: bool) {
        self.writes.push((channel, on));
        if on {
            self.outputs |= 1 << channel;
        } else {
            self.outputs &= !(1 << channel);
        }
    }

    fn is_output_on(&self, channel: u8) -> bool {
        self.on(channel)
    }

    fn output_bits(&self) -> u8 {
        self.outputs
    }
}

impl InputPort for MockIo {
    fn read_inputs(&mut self) -> u8 {
        self.inputs
    }
}

// ── Power meter ───────────────────────────────────────────────

/// Scripted meter.  While `failing`, reads report failure and the meter
/// goes offline after five in a row, like the real adapter.
#[derive(Debug)]
pub struct MockMeter {
    pub sample: PowerSample,
    pub failing: bool,
    pub failures: u32,
    pub online: bool,
    pub reads: u32,
}

#[allow(dead_code)]
impl MockMeter {
    pub fn new() -> Self {
        Self {
            sample: PowerSample { voltages: [231.0, 229.5, 230.2], currents: [0.0; 3] },
            failing: false,
            failures: 0,
            online: true,
            reads: 0,
        }
    }

    /// Fresh from power-up: offline until the first good read.
    pub fn booting() -> Self {
        Self { online: false, ..Self::new() }
    }

    pub fn set_amps(&mut self, a: f32) {
        self.sample.currents = [a; 3];
    }

    pub fn set_phase_amps(&mut self, currents: [f32; 3]) {
        self.sample.currents = currents;
    }
}

impl SensorPort for MockMeter {
    fn read(&mut self) -> SensorReading {
        self.reads += 1;
        if self.failing {
            self.failures += 1;
            if self.failures >= 5 {
                self.online = false;
            }
        } else {
            self.failures = 0;
            self.online = true;
        }
        SensorReading { sample: self.sample, ok: !self.failing }
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

// ── Clock ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockClock {
    pub now: Cell<u64>,
    pub local: Cell<Option<LocalTime>>,
}

#[allow(dead_code)]
impl MockClock {
    pub fn at(now: u64) -> Self {
        Self { now: Cell::new(now), local: Cell::new(None) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set_local(&self, hour: u8, minute: u8) {
        self.local.set(Some(wednesday(hour, minute)));
    }
}

impl ClockPort for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn local_time(&self) -> Option<LocalTime> {
        self.local.get()
    }
}

/// A Wednesday in March (low season).
#[allow(dead_code)]
pub fn wednesday(hour: u8, minute: u8) -> LocalTime {
    LocalTime { year: 2025, month: 3, day: 12, weekday: 3, hour, minute, second: 0 }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemStore {
    pub map: HashMap<(String, String), Vec<u8>>,
}

impl StoragePort for MemStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let v = self.map.get(&(namespace.to_owned(), key.to_owned())).ok_or(StorageError::NotFound)?;
        let n = v.len().min(buf.len());
        buf[..n].copy_from_slice(&v[..n]);
        Ok(n)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.map.insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.map.remove(&(namespace.to_owned(), key.to_owned()));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.map.contains_key(&(namespace.to_owned(), key.to_owned()))
    }
}

// ── Events ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Network ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockLink {
    /// Whether a bring-up would succeed.
    pub available: bool,
    pub up: bool,
    pub bring_ups: u32,
    pub shutdowns: u32,
}

#[allow(dead_code)]
impl MockLink {
    pub fn available() -> Self {
        Self { available: true, up: false, bring_ups: 0, shutdowns: 0 }
    }

    pub fn missing() -> Self {
        Self { available: false, ..Self::available() }
    }

    /// Cable pulled / AP gone.
    pub fn drop_link(&mut self) {
        self.available = false;
        self.up = false;
    }
}

impl LinkPort for MockLink {
    fn bring_up(&mut self) -> Result<(), NetworkError> {
        self.bring_ups += 1;
        if self.available {
            self.up = true;
            Ok(())
        } else {
            Err(NetworkError::LinkDown)
        }
    }

    fn is_up(&mut self) -> bool {
        self.up
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
        self.up = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub client_id: String,
    pub port: u16,
    pub use_tls: bool,
    pub will_topic: String,
}

#[derive(Debug, Default)]
pub struct MockBroker {
    pub connected: bool,
    pub refuse: bool,
    pub fail_publish: bool,
    pub sessions: Vec<SessionRecord>,
    pub disconnects: u32,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String, bool)>,
    pub inbox: VecDeque<InboundMessage>,
}

#[allow(dead_code)]
impl MockBroker {
    pub fn deliver(&mut self, topic: &str, payload: &str) {
        self.inbox.push_back(InboundMessage { topic: topic.to_owned(), payload: payload.as_bytes().to_vec() });
    }

    pub fn published_on(&self, topic: &str) -> Vec<&str> {
        self.published.iter().filter(|(t, _, _)| t == topic).map(|(_, p, _)| p.as_str()).collect()
    }
}

impl BrokerPort for MockBroker {
    fn connect(&mut self, params: &SessionParams<'_>) -> Result<(), NetworkError> {
        if self.refuse {
            return Err(NetworkError::BrokerRefused);
        }
        self.sessions.push(SessionRecord {
            client_id: params.client_id.to_owned(),
            port: params.port,
            use_tls: params.use_tls,
            will_topic: params.will_topic.to_owned(),
        });
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), NetworkError> {
        self.subscriptions.push(topic.to_owned());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), NetworkError> {
        if !self.connected {
            return Err(NetworkError::NotConnected);
        }
        if self.fail_publish {
            return Err(NetworkError::PublishFailed);
        }
        self.published.push((topic.to_owned(), String::from_utf8_lossy(payload).into_owned(), retain));
        Ok(())
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.inbox.pop_front()
    }
}

// ── Command handler / updater ─────────────────────────────────

/// Records dispatches and answers every command with `reply`.
#[derive(Debug)]
pub struct RecordingHandler {
    pub halts: u32,
    pub dispatched: Vec<(Command, Origin)>,
    pub reply: Outcome,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self { halts: 0, dispatched: Vec::new(), reply: Outcome::Accepted }
    }
}

impl CommandHandler for RecordingHandler {
    fn halt_all(&mut self) {
        self.halts += 1;
    }

    fn dispatch(&mut self, command: Command, origin: Origin) -> Outcome {
        self.dispatched.push((command, origin));
        self.reply.clone()
    }
}

#[derive(Debug)]
pub struct MockUpdater {
    pub urls: Vec<String>,
    pub result: Result<(), FirmwareUpdateError>,
}

impl Default for MockUpdater {
    fn default() -> Self {
        Self { urls: Vec::new(), result: Err(FirmwareUpdateError::Download) }
    }
}

impl FirmwareUpdater for MockUpdater {
    fn perform_update(&mut self, url: &str) -> Result<(), FirmwareUpdateError> {
        self.urls.push(url.to_owned());
        self.result
    }
}

//! Transport resilience: link selection, broker session lifecycle and
//! command/telemetry exchange.
//!
//! ```text
//!   boot ──▶ wired? ──yes──▶ Wired ──link lost──▶ Wireless (one-way)
//!              │no                   ◀─ 3 connect failures ─┐
//!              ▼                                             │
//!          Wireless ─────── 3 connect failures ─────────────┘
//! ```
//!
//! Everything here runs on the main loop.  Only [`boot`](ConnectionManager::boot),
//! a failover bring-up and the broker connect block, each for a bounded time.

use core::fmt;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::commands::{Command, Origin, Outcome, SystemAction, parse_broker};
use crate::app::ports::{BrokerPort, CommandHandler, FirmwareUpdater, LinkPort, SessionParams};
use crate::config::{
    BrokerConfig, MAX_CONNECT_FAILURES, MAX_PUBLISH_FAILURES, MQTT_CONNECT_TIMEOUT_MS, MQTT_KEEPALIVE_S,
    MQTT_MAX_PAYLOAD, MQTT_PLAIN_PORT, MQTT_RETRY_INTERVAL_MS, MQTT_STALE_TIMEOUT_MS,
};
use crate::error::{FirmwareUpdateError, NetworkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "ETH")]
    Wired,
    #[serde(rename = "WiFi")]
    Wireless,
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wired => "ETH",
            Self::Wireless => "WiFi",
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Wired => Self::Wireless,
            Self::Wireless => Self::Wired,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker topics for one device, all under `fieldlink/<id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub telemetry: String,
    pub command: String,
    pub status: String,
    /// Wildcard subscription covering the device's namespace.
    pub subscribe: String,
}

impl Topics {
    pub fn for_device(device_id: &str) -> Self {
        let base = format!("fieldlink/{device_id}");
        Self {
            telemetry: format!("{base}/telemetry"),
            command: format!("{base}/command"),
            status: format!("{base}/status"),
            subscribe: format!("{base}/#"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub active: Option<Transport>,
    pub wired_up: bool,
    pub wireless_up: bool,
    pub session_up: bool,
    /// Last successful publish or inbound command.
    pub last_activity: Option<u64>,
    pub publish_failures: u8,
    pub connect_failures: u8,
    pub last_attempt: Option<u64>,
    /// Last standby bring-up after the active link dropped.
    pub last_probe: Option<u64>,
    pub sessions_opened: u32,
    pub switches: u32,
}

fn elapsed_since(now: u64, then: Option<u64>, interval: u64) -> bool {
    then.is_none_or(|t| now.saturating_sub(t) >= interval)
}

fn session_params<'a>(
    cfg: &'a BrokerConfig,
    topics: &'a Topics,
    client_id: &'a str,
    transport: Transport,
) -> SessionParams<'a> {
    // The wired stack has no TLS; it always uses the plain port.
    let wired = transport == Transport::Wired;
    SessionParams {
        client_id,
        host: cfg.host.as_str(),
        port: if wired { MQTT_PLAIN_PORT } else { cfg.port },
        use_tls: !wired && cfg.use_tls,
        username: (!cfg.username.is_empty()).then_some(cfg.username.as_str()),
        password: (!cfg.password.is_empty()).then_some(cfg.password.as_str()),
        will_topic: topics.status.as_str(),
        will_payload: "offline",
        keepalive_secs: MQTT_KEEPALIVE_S,
        buffer_size: MQTT_MAX_PAYLOAD,
        connect_timeout_ms: MQTT_CONNECT_TIMEOUT_MS,
    }
}

/// Owns both links and the broker session.
pub struct ConnectionManager<W, L, B> {
    wired: W,
    wireless: L,
    broker: B,
    config: BrokerConfig,
    topics: Topics,
    client_id: String,
    state: ConnectionState,
}

impl<W: LinkPort, L: LinkPort, B: BrokerPort> ConnectionManager<W, L, B> {
    pub fn new(wired: W, wireless: L, broker: B, config: BrokerConfig, device_id: &str) -> Self {
        Self {
            wired,
            wireless,
            broker,
            config,
            topics: Topics::for_device(device_id),
            client_id: device_id.to_string(),
            state: ConnectionState::default(),
        }
    }

    // ── Link selection ────────────────────────────────────────

    /// Wired first; wireless only if wired fails.  The loser is shut down.
    pub fn boot(&mut self) -> Result<Transport, NetworkError> {
        info!("Network: bringing up Ethernet");
        match self.wired.bring_up() {
            Ok(()) => {
                self.wireless.shutdown();
                self.state.wired_up = true;
                self.state.active = Some(Transport::Wired);
                info!("Network: using Ethernet, WiFi disabled");
                return Ok(Transport::Wired);
            }
            Err(e) => warn!("Network: Ethernet unavailable ({}), trying WiFi", e),
        }
        self.wired.shutdown();

        match self.wireless.bring_up() {
            Ok(()) => {
                self.state.wireless_up = true;
                self.state.active = Some(Transport::Wireless);
                info!("Network: using WiFi");
                Ok(Transport::Wireless)
            }
            Err(e) => {
                error!("Network: WiFi unavailable ({}), no transport", e);
                Err(NetworkError::NoTransport)
            }
        }
    }

    fn bring_up(&mut self, transport: Transport) -> Result<(), NetworkError> {
        match transport {
            Transport::Wired => self.wired.bring_up(),
            Transport::Wireless => self.wireless.bring_up(),
        }
    }

    /// Make `to` the active transport and drop the session so it is rebuilt
    /// on the next pass.
    fn switch_to(&mut self, to: Transport) {
        let from = self.state.active.replace(to);
        if self.state.session_up || self.broker.is_connected() {
            self.broker.disconnect();
        }
        match from {
            Some(Transport::Wired) if to == Transport::Wireless => self.wired.shutdown(),
            Some(Transport::Wireless) if to == Transport::Wired => self.wireless.shutdown(),
            _ => {}
        }
        match to {
            Transport::Wired => self.state.wired_up = true,
            Transport::Wireless => self.state.wireless_up = true,
        }
        self.state.session_up = false;
        self.state.last_activity = None;
        self.state.last_attempt = None;
        self.state.connect_failures = 0;
        self.state.publish_failures = 0;
        self.state.switches += 1;
        warn!("Network: switched {} -> {}", from.map_or("none", Transport::as_str), to);
    }

    fn supervise_links(&mut self, now: u64) {
        let Some(active) = self.state.active else {
            return;
        };
        let up = match active {
            Transport::Wired => self.wired.is_up(),
            Transport::Wireless => self.wireless.is_up(),
        };
        let was_up = match active {
            Transport::Wired => core::mem::replace(&mut self.state.wired_up, up),
            Transport::Wireless => core::mem::replace(&mut self.state.wireless_up, up),
        };
        if up {
            return;
        }
        if was_up {
            warn!("Network: {} link lost", active);
        }
        if !elapsed_since(now, self.state.last_probe, MQTT_RETRY_INTERVAL_MS) {
            return;
        }
        self.state.last_probe = Some(now);
        let standby = active.other();
        info!("Network: checking {}", standby);
        match self.bring_up(standby) {
            Ok(()) => self.switch_to(standby),
            Err(e) => warn!("Network: {} unavailable ({})", standby, e),
        }
    }

    // ── Session ───────────────────────────────────────────────

    fn establish(&mut self, transport: Transport) -> Result<(), NetworkError> {
        let params = session_params(&self.config, &self.topics, &self.client_id, transport);
        info!(
            "MQTT: connecting to {}:{} over {} (TLS: {})",
            params.host,
            params.port,
            transport,
            if params.use_tls { "yes" } else { "no" }
        );
        self.broker.connect(&params)?;
        let subscribed = self
            .broker
            .subscribe(&self.topics.subscribe)
            .and_then(|()| self.broker.publish(&self.topics.status, b"online", true));
        if let Err(e) = subscribed {
            self.broker.disconnect();
            return Err(e);
        }
        Ok(())
    }

    /// One connect attempt on the active transport.
    pub fn open_session(&mut self, now: u64) -> Result<(), NetworkError> {
        let transport = self.state.active.ok_or(NetworkError::NoTransport)?;
        if !self.config.is_configured() {
            return Err(NetworkError::NotConfigured);
        }
        self.state.last_attempt = Some(now);
        match self.establish(transport) {
            Ok(()) => {
                self.state.session_up = true;
                self.state.connect_failures = 0;
                self.state.publish_failures = 0;
                self.state.last_activity = Some(now);
                self.state.sessions_opened += 1;
                info!("MQTT: connected, subscribed to {}", self.topics.subscribe);
                Ok(())
            }
            Err(e) => {
                self.state.connect_failures = self.state.connect_failures.saturating_add(1);
                warn!("MQTT: connect failed ({}), {} consecutive", e, self.state.connect_failures);
                Err(e)
            }
        }
    }

    /// Per-loop supervision: link health, reconnect, failover and staleness.
    pub fn maintain(&mut self, now: u64) {
        self.supervise_links(now);

        if self.state.session_up && !self.broker.is_connected() {
            warn!("MQTT: session lost");
            self.state.session_up = false;
        }

        if !self.state.session_up {
            if self.state.active.is_none()
                || !elapsed_since(now, self.state.last_attempt, MQTT_RETRY_INTERVAL_MS)
            {
                return;
            }
            let failed = self.open_session(now).is_err();
            if failed && self.state.connect_failures >= MAX_CONNECT_FAILURES {
                self.fall_back(now);
            }
            return;
        }

        let stale = self
            .state
            .last_activity
            .is_none_or(|t| now.saturating_sub(t) > MQTT_STALE_TIMEOUT_MS);
        if stale {
            warn!("MQTT: no activity for {} ms, forcing reconnect", MQTT_STALE_TIMEOUT_MS);
            self.broker.disconnect();
            self.state.session_up = false;
            self.state.last_activity = None;
        }
    }

    /// Repeated connect failures: try the other transport.
    fn fall_back(&mut self, now: u64) {
        let Some(active) = self.state.active else {
            return;
        };
        let alternate = active.other();
        warn!(
            "MQTT: {} connect failures over {}, falling back to {}",
            self.state.connect_failures, active, alternate
        );
        self.state.last_probe = Some(now);
        match self.bring_up(alternate) {
            Ok(()) => self.switch_to(alternate),
            Err(e) => {
                warn!("Network: {} unavailable ({}), staying on {}", alternate, e, active);
                self.state.connect_failures = 0;
            }
        }
    }

    // ── Exchange ──────────────────────────────────────────────

    /// Publish on the telemetry topic.  Repeated failures tear the session down.
    pub fn publish_telemetry(&mut self, now: u64, payload: &[u8]) -> Result<(), NetworkError> {
        if !self.state.session_up {
            return Err(NetworkError::NotConnected);
        }
        match self.broker.publish(&self.topics.telemetry, payload, false) {
            Ok(()) => {
                self.state.publish_failures = 0;
                self.state.last_activity = Some(now);
                Ok(())
            }
            Err(e) => {
                self.state.publish_failures = self.state.publish_failures.saturating_add(1);
                warn!("MQTT: publish failed ({}), {} consecutive", e, self.state.publish_failures);
                if self.state.publish_failures >= MAX_PUBLISH_FAILURES {
                    warn!("MQTT: too many publish failures, forcing reconnect");
                    self.broker.disconnect();
                    self.state.session_up = false;
                    self.state.publish_failures = 0;
                }
                Err(e)
            }
        }
    }

    /// Drain inbound messages.  Firmware updates are handled here; everything
    /// else goes to `handler`.  Returns a system action for the caller to run.
    pub fn process_inbound(
        &mut self,
        now: u64,
        handler: &mut impl CommandHandler,
        updater: &mut impl FirmwareUpdater,
    ) -> Option<SystemAction> {
        let mut action = None;
        while let Some(msg) = self.broker.poll() {
            if msg.payload.len() >= MQTT_MAX_PAYLOAD {
                warn!("MQTT: dropped {} byte message on {}", msg.payload.len(), msg.topic);
                continue;
            }
            if msg.topic != self.topics.command {
                continue;
            }
            self.state.last_activity = Some(now);
            let Ok(text) = core::str::from_utf8(&msg.payload) else {
                warn!("MQTT: non-UTF-8 command dropped");
                continue;
            };
            info!("MQTT: command '{}'", text.trim());

            let command = match parse_broker(text) {
                Ok(c) => c,
                Err(e) => {
                    warn!("MQTT: {}", e);
                    continue;
                }
            };
            if let Command::UpdateFirmware { url } = command {
                self.hand_off_update(now, url.as_deref(), handler, updater);
                continue;
            }
            match handler.dispatch(command, Origin::Broker) {
                Outcome::Reply(body) => {
                    let _ = self.publish_telemetry(now, body.as_bytes());
                }
                Outcome::Ignored(reason) => info!("MQTT: command ignored ({})", reason),
                Outcome::System(a) => action = Some(a),
                Outcome::Accepted => {}
            }
        }
        action
    }

    fn hand_off_update(
        &mut self,
        now: u64,
        url: Option<&str>,
        handler: &mut impl CommandHandler,
        updater: &mut impl FirmwareUpdater,
    ) {
        handler.halt_all();
        let result = match url {
            Some(url) => {
                info!("OTA: update requested from {}", url);
                let _ = self.publish_telemetry(now, br#"{"status":"updating"}"#);
                updater.perform_update(url)
            }
            None => Err(FirmwareUpdateError::MissingUrl),
        };
        if let Err(e) = result {
            error!("OTA: update failed: {}", e);
            let body = serde_json::json!({ "status": "update_failed", "error": e.to_string() }).to_string();
            let _ = self.publish_telemetry(now, body.as_bytes());
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn active(&self) -> Option<Transport> {
        self.state.active
    }

    pub fn is_connected(&self) -> bool {
        self.state.session_up
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn wired_mut(&mut self) -> &mut W {
        &mut self.wired
    }

    pub fn wireless_mut(&mut self) -> &mut L {
        &mut self.wireless
    }
}

//! ConnectionManager: link selection, failover, session upkeep and the
//! inbound command path.

use fieldlink::adapters::mqtt::MqttBroker;
use fieldlink::app::commands::{Command, Origin, Outcome, PumpTarget, SystemAction};
use fieldlink::config::{BrokerConfig, MQTT_MAX_PAYLOAD, MQTT_RETRY_INTERVAL_MS, MQTT_STALE_TIMEOUT_MS};
use fieldlink::error::{FirmwareUpdateError, NetworkError};
use fieldlink::transport::{ConnectionManager, Transport};

use crate::mock_hw::{MockBroker, MockLink, MockUpdater, RecordingHandler};

const ID: &str = "FL-5E107B";
const COMMAND: &str = "fieldlink/FL-5E107B/command";
const TELEMETRY: &str = "fieldlink/FL-5E107B/telemetry";
const STATUS: &str = "fieldlink/FL-5E107B/status";

type Manager = ConnectionManager<MockLink, MockLink, MockBroker>;

fn broker_config() -> BrokerConfig {
    let mut cfg = BrokerConfig::default();
    cfg.host.clear();
    cfg.host.push_str("broker.fieldlink.test").unwrap();
    cfg.port = 8883;
    cfg.use_tls = true;
    cfg
}

fn manager(wired: MockLink, wireless: MockLink) -> Manager {
    ConnectionManager::new(wired, wireless, MockBroker::default(), broker_config(), ID)
}

/// Booted on `wired`-or-wireless with a live session at t = 0.
fn connected(wired: MockLink, wireless: MockLink) -> Manager {
    let mut m = manager(wired, wireless);
    m.boot().unwrap();
    m.open_session(0).unwrap();
    m
}

// ── Boot ──────────────────────────────────────────────────────

#[test]
fn boot_prefers_wired_and_shuts_wireless() {
    let mut m = manager(MockLink::available(), MockLink::available());
    assert_eq!(m.boot(), Ok(Transport::Wired));
    assert_eq!(m.wireless_mut().bring_ups, 0);
    assert_eq!(m.wireless_mut().shutdowns, 1);
}

#[test]
fn boot_falls_back_to_wireless() {
    let mut m = manager(MockLink::missing(), MockLink::available());
    assert_eq!(m.boot(), Ok(Transport::Wireless));
    assert_eq!(m.wired_mut().shutdowns, 1);
    assert_eq!(m.active(), Some(Transport::Wireless));
}

#[test]
fn boot_without_any_link_fails() {
    let mut m = manager(MockLink::missing(), MockLink::missing());
    assert_eq!(m.boot(), Err(NetworkError::NoTransport));
    assert_eq!(m.active(), None);
    assert_eq!(m.open_session(0), Err(NetworkError::NoTransport));
}

// ── Session ───────────────────────────────────────────────────

#[test]
fn wired_session_is_plain_and_announces_online() {
    let m = connected(MockLink::available(), MockLink::available());
    let b = m.broker();
    assert_eq!(b.sessions.len(), 1);
    assert_eq!(b.sessions[0].client_id, ID);
    assert_eq!((b.sessions[0].port, b.sessions[0].use_tls), (1883, false));
    assert_eq!(b.sessions[0].will_topic, STATUS);
    assert_eq!(b.subscriptions, vec!["fieldlink/FL-5E107B/#".to_string()]);
    assert_eq!(b.published, vec![(STATUS.to_string(), "online".to_string(), true)]);
}

#[test]
fn wireless_session_keeps_tls() {
    let m = connected(MockLink::missing(), MockLink::available());
    assert_eq!((m.broker().sessions[0].port, m.broker().sessions[0].use_tls), (8883, true));
}

#[test]
fn unconfigured_broker_is_not_attempted() {
    let mut m = ConnectionManager::new(
        MockLink::available(),
        MockLink::available(),
        MockBroker::default(),
        BrokerConfig { host: heapless::String::new(), ..broker_config() },
        ID,
    );
    m.boot().unwrap();
    assert_eq!(m.open_session(0), Err(NetworkError::NotConfigured));
    assert!(m.broker().sessions.is_empty());
}

#[test]
fn dropped_session_reconnects_after_retry_interval() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().connected = false;
    m.maintain(100);
    assert!(!m.is_connected());
    m.maintain(MQTT_RETRY_INTERVAL_MS - 1);
    assert_eq!(m.broker().sessions.len(), 1, "retry is paced from the last attempt");
    m.maintain(MQTT_RETRY_INTERVAL_MS);
    assert!(m.is_connected());
    assert_eq!(m.state().sessions_opened, 2);
}

#[test]
fn silent_session_is_torn_down() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.maintain(MQTT_STALE_TIMEOUT_MS);
    assert!(m.is_connected(), "exactly at the limit is not stale");
    m.maintain(MQTT_STALE_TIMEOUT_MS + 1);
    assert!(!m.is_connected());
    assert_eq!(m.broker().disconnects, 1);
}

#[test]
fn publishes_count_as_activity() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.publish_telemetry(60_000, b"{}").unwrap();
    m.maintain(60_000 + MQTT_STALE_TIMEOUT_MS);
    assert!(m.is_connected());
}

#[test]
fn repeated_publish_failures_force_reconnect() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().fail_publish = true;
    assert_eq!(m.publish_telemetry(10, b"{}"), Err(NetworkError::PublishFailed));
    assert_eq!(m.publish_telemetry(20, b"{}"), Err(NetworkError::PublishFailed));
    assert!(m.is_connected());
    assert_eq!(m.publish_telemetry(30, b"{}"), Err(NetworkError::PublishFailed));
    assert!(!m.is_connected());
    assert!(!m.broker().connected);
    assert_eq!(m.publish_telemetry(40, b"{}"), Err(NetworkError::NotConnected));
}

// ── Failover ──────────────────────────────────────────────────

#[test]
fn wired_loss_fails_over_and_rebuilds_session_once() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.wired_mut().drop_link();

    m.maintain(1_000);
    assert_eq!(m.active(), Some(Transport::Wireless));
    assert_eq!(m.state().switches, 1);
    assert_eq!(m.wired_mut().shutdowns, 1);
    assert!(m.is_connected());
    assert_eq!(m.broker().sessions.len(), 2);
    assert_eq!((m.broker().sessions[1].port, m.broker().sessions[1].use_tls), (8883, true));

    for t in [1_100, 6_000, 20_000] {
        m.maintain(t);
    }
    assert_eq!(m.state().sessions_opened, 2);
    assert_eq!(m.state().switches, 1);

    // No failback when the cable returns.
    m.wired_mut().available = true;
    m.maintain(30_000);
    assert_eq!(m.active(), Some(Transport::Wireless));
}

#[test]
fn standby_probe_is_paced_while_both_links_are_down() {
    let mut m = connected(MockLink::available(), MockLink::missing());
    m.wired_mut().drop_link();
    m.maintain(1_000);
    m.maintain(2_000);
    assert_eq!(m.wireless_mut().bring_ups, 1);
    m.maintain(1_000 + MQTT_RETRY_INTERVAL_MS);
    assert_eq!(m.wireless_mut().bring_ups, 2);
    assert_eq!(m.active(), Some(Transport::Wired));
}

#[test]
fn connect_failures_fall_back_to_other_transport() {
    let mut m = manager(MockLink::missing(), MockLink::available());
    m.boot().unwrap();
    m.broker_mut().refuse = true;
    m.wired_mut().available = true;

    assert!(m.open_session(0).is_err());
    m.maintain(MQTT_RETRY_INTERVAL_MS);
    assert_eq!(m.active(), Some(Transport::Wireless));
    m.maintain(2 * MQTT_RETRY_INTERVAL_MS);
    assert_eq!(m.active(), Some(Transport::Wired));
    assert_eq!(m.state().switches, 1);
    assert_eq!(m.state().connect_failures, 0);
}

#[test]
fn fallback_with_no_alternate_stays_put() {
    let mut m = manager(MockLink::missing(), MockLink::available());
    m.boot().unwrap();
    m.broker_mut().refuse = true;
    for i in 0..3 {
        m.maintain(i * MQTT_RETRY_INTERVAL_MS);
    }
    assert_eq!(m.active(), Some(Transport::Wireless));
    assert_eq!(m.state().connect_failures, 0, "counter restarts after a failed fallback");
}

// ── Inbound ───────────────────────────────────────────────────

#[test]
fn commands_reach_the_handler_with_broker_origin() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().deliver(COMMAND, "START");
    m.broker_mut().deliver(COMMAND, r#"{"command":"STOP","pump":2}"#);
    let (mut h, mut u) = (RecordingHandler::default(), MockUpdater::default());

    assert_eq!(m.process_inbound(50, &mut h, &mut u), None);
    assert_eq!(
        h.dispatched,
        vec![
            (Command::Start(PumpTarget::All), Origin::Broker),
            (Command::Stop(PumpTarget::One(2)), Origin::Broker),
        ]
    );
}

#[test]
fn queued_stop_survives_failover() {
    let mut m = ConnectionManager::new(MockLink::available(), MockLink::available(), MqttBroker::new(), broker_config(), ID);
    m.boot().unwrap();
    m.open_session(0).unwrap();
    m.broker().sim_deliver(COMMAND, b"STOP");

    // Link loss lands in the same loop pass, before the inbox is drained.
    m.wired_mut().drop_link();
    m.maintain(100);
    assert_eq!(m.active(), Some(Transport::Wireless));

    let (mut h, mut u) = (RecordingHandler::default(), MockUpdater::default());
    m.process_inbound(100, &mut h, &mut u);
    assert_eq!(h.dispatched, vec![(Command::Stop(PumpTarget::All), Origin::Broker)]);
}

#[test]
fn foreign_topics_and_oversized_payloads_are_dropped() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().deliver(TELEMETRY, "START");
    m.broker_mut().deliver(COMMAND, &"X".repeat(MQTT_MAX_PAYLOAD));
    m.broker_mut().deliver(COMMAND, "{broken");
    let (mut h, mut u) = (RecordingHandler::default(), MockUpdater::default());
    m.process_inbound(50, &mut h, &mut u);
    assert!(h.dispatched.is_empty());
}

#[test]
fn replies_are_published_on_telemetry() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().deliver(COMMAND, "GET_SETTINGS");
    let mut h = RecordingHandler { reply: Outcome::Reply(r#"{"type":"settings"}"#.into()), ..Default::default() };
    m.process_inbound(50, &mut h, &mut MockUpdater::default());
    assert_eq!(m.broker().published_on(TELEMETRY), vec![r#"{"type":"settings"}"#]);
}

#[test]
fn system_actions_are_returned_to_the_loop() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().deliver(COMMAND, "REBOOT");
    let mut h = RecordingHandler { reply: Outcome::System(SystemAction::Reboot), ..Default::default() };
    assert_eq!(m.process_inbound(50, &mut h, &mut MockUpdater::default()), Some(SystemAction::Reboot));
}

#[test]
fn inbound_command_refreshes_activity() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().deliver(COMMAND, "STATUS");
    m.process_inbound(80_000, &mut RecordingHandler::default(), &mut MockUpdater::default());
    m.maintain(80_000 + MQTT_STALE_TIMEOUT_MS);
    assert!(m.is_connected());
}

// ── Firmware update ───────────────────────────────────────────

#[test]
fn firmware_update_halts_then_reports_failure() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().deliver(COMMAND, r#"{"command":"UPDATE_FIRMWARE","url":"https://fw.test/fl.bin"}"#);
    let (mut h, mut u) = (RecordingHandler::default(), MockUpdater::default());

    m.process_inbound(50, &mut h, &mut u);
    assert_eq!(h.halts, 1);
    assert!(h.dispatched.is_empty(), "update never reaches the command handler");
    assert_eq!(u.urls, vec!["https://fw.test/fl.bin".to_string()]);

    let sent = m.broker().published_on(TELEMETRY);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], r#"{"status":"updating"}"#);
    let failed: serde_json::Value = serde_json::from_str(sent[1]).unwrap();
    assert_eq!(failed["status"], "update_failed");
    assert_eq!(failed["error"], FirmwareUpdateError::Download.to_string());
}

#[test]
fn firmware_update_without_url_still_halts() {
    let mut m = connected(MockLink::available(), MockLink::available());
    m.broker_mut().deliver(COMMAND, "UPDATE_FIRMWARE");
    let (mut h, mut u) = (RecordingHandler::default(), MockUpdater::default());

    m.process_inbound(50, &mut h, &mut u);
    assert_eq!(h.halts, 1);
    assert!(u.urls.is_empty());
    let sent = m.broker().published_on(TELEMETRY);
    let failed: serde_json::Value = serde_json::from_str(sent[0]).unwrap();
    assert_eq!(failed["error"], "missing url");
}

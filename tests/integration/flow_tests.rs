//! End to end: broker messages through the ConnectionManager into a real
//! PumpController via the Dispatcher, then back out as telemetry.

use fieldlink::app::ports::ClockPort;
use fieldlink::app::service::{Dispatcher, PumpController};
use fieldlink::config::{BrokerConfig, ControllerSettings, EngineTuning};
use fieldlink::pins::SINGLE_PUMP;
use fieldlink::pump::PumpState;
use fieldlink::transport::ConnectionManager;

use crate::mock_hw::{MemStore, MockBroker, MockClock, MockIo, MockLink, MockMeter, MockUpdater, RecordingSink};

const COMMAND: &str = "fieldlink/FL-5E107B/command";
const TELEMETRY: &str = "fieldlink/FL-5E107B/telemetry";

struct Device {
    controller: PumpController,
    conn: ConnectionManager<MockLink, MockLink, MockBroker>,
    io: MockIo,
    meter: MockMeter,
    clock: MockClock,
    store: MemStore,
    sink: RecordingSink,
    updater: MockUpdater,
}

impl Device {
    fn boot() -> Self {
        let mut cfg = BrokerConfig::default();
        cfg.host.clear();
        cfg.host.push_str("10.0.0.2").unwrap();
        let mut conn =
            ConnectionManager::new(MockLink::available(), MockLink::available(), MockBroker::default(), cfg, "FL-5E107B");
        conn.boot().unwrap();

        let clock = MockClock::at(0);
        let mut sink = RecordingSink::default();
        let mut controller = PumpController::new(&SINGLE_PUMP, ControllerSettings::defaults(1), EngineTuning::default());
        controller.boot(&clock, &mut sink);
        conn.open_session(0).unwrap();
        Self {
            controller,
            conn,
            io: MockIo::with_inputs(1 << 1),
            meter: MockMeter::new(),
            clock,
            store: MemStore::default(),
            sink,
            updater: MockUpdater::default(),
        }
    }

    /// One main-loop pass, 500 ms later.
    fn run_once(&mut self) {
        self.clock.advance(500);
        let now = self.clock.now_ms();
        self.conn.maintain(now);
        let mut handler = Dispatcher {
            controller: &mut self.controller,
            io: &mut self.io,
            store: &mut self.store,
            clock: &self.clock,
            sink: &mut self.sink,
        };
        let action = self.conn.process_inbound(now, &mut handler, &mut self.updater);
        assert_eq!(action, None);
        self.controller.poll_inputs(now, &mut self.io, &mut self.sink);
        self.controller.tick(&self.clock, &mut self.meter, &mut self.io, &mut self.sink);
        if self.conn.is_connected() && self.controller.telemetry_due(now) {
            let local = self.clock.local_time();
            let body = self.controller.telemetry(now, local.as_ref(), self.conn.active(), &self.io).to_json();
            let _ = self.conn.publish_telemetry(now, body.as_bytes());
        }
    }

    fn last_telemetry(&self) -> serde_json::Value {
        let sent = self.conn.broker().published_on(TELEMETRY);
        serde_json::from_str(sent.last().expect("telemetry published")).unwrap()
    }
}

#[test]
fn broker_start_runs_the_pump_and_telemetry_reports_it() {
    let mut dev = Device::boot();
    dev.conn.broker_mut().deliver(COMMAND, "START");
    dev.meter.set_amps(18.0);
    for _ in 0..8 {
        dev.run_once();
    }
    assert_eq!(dev.controller.pump(1).map(|p| p.state()), Some(PumpState::Running));
    let t = dev.last_telemetry();
    assert_eq!(t["state"], "RUNNING");
    assert_eq!(t["network"], "ETH");
    assert_eq!(t["Ia"], 18.0);
}

#[test]
fn firmware_request_stops_a_running_pump() {
    let mut dev = Device::boot();
    dev.conn.broker_mut().deliver(COMMAND, "START");
    dev.meter.set_amps(18.0);
    for _ in 0..5 {
        dev.run_once();
    }
    assert!(dev.io.on(0));

    dev.conn.broker_mut().deliver(COMMAND, r#"{"command":"UPDATE_FIRMWARE","url":"http://10.0.0.2/fl.bin"}"#);
    dev.run_once();
    assert!(!dev.io.on(0), "contactor dropped before the download");
    assert!(!dev.controller.pump(1).is_some_and(|p| p.start_command()));
    assert_eq!(dev.updater.urls.len(), 1);
}

#[test]
fn settings_query_round_trip() {
    let mut dev = Device::boot();
    dev.conn
        .broker_mut()
        .deliver(COMMAND, r#"{"command":"SET_THRESHOLDS","max_current":80,"dry_current":3.5}"#);
    dev.conn.broker_mut().deliver(COMMAND, "GET_SETTINGS");
    dev.run_once();

    let sent = dev.conn.broker().published_on(TELEMETRY);
    let settings: serde_json::Value = serde_json::from_str(sent[0]).unwrap();
    assert_eq!(settings["type"], "settings");
    assert_eq!(settings["max_current"], 80.0);
    assert_eq!(settings["dry_current"], 3.5);
}

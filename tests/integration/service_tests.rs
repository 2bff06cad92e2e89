//! PumpController against mock ports: arbitration, protection, schedule,
//! settings and telemetry.

use fieldlink::app::commands::{Command, Origin, Outcome, PumpTarget, SystemAction};
use fieldlink::app::events::AppEvent;
use fieldlink::app::ports::{ClockPort, ConfigStore};
use fieldlink::app::service::PumpController;
use fieldlink::config::{ControllerSettings, EngineTuning, SENSOR_READ_INTERVAL_MS, ScheduleUpdate};
use fieldlink::pins::{BoardProfile, SINGLE_PUMP, TRIPLE_PUMP};
use fieldlink::pump::{FaultKind, PumpState};
use fieldlink::transport::Transport;

use crate::mock_hw::{MemStore, MockClock, MockIo, MockMeter, RecordingSink};

/// Single-pump panel inputs.
const START_PRESSED: u8 = 1 << 0;
const STOP_CLOSED: u8 = 1 << 1;
const LOCAL: u8 = 1 << 2;
const FEEDBACK: u8 = 1 << 3;

struct Rig {
    controller: PumpController,
    io: MockIo,
    meter: MockMeter,
    clock: MockClock,
    store: MemStore,
    sink: RecordingSink,
}

impl Rig {
    fn single() -> Self {
        Self::build(&SINGLE_PUMP, ControllerSettings::defaults(1), MockClock::at(1_000), STOP_CLOSED)
    }

    fn triple() -> Self {
        Self::build(&TRIPLE_PUMP, ControllerSettings::defaults(3), MockClock::at(1_000), 0)
    }

    fn build(profile: &'static BoardProfile, settings: ControllerSettings, clock: MockClock, inputs: u8) -> Self {
        let mut sink = RecordingSink::default();
        let mut controller = PumpController::new(profile, settings, EngineTuning::default());
        controller.boot(&clock, &mut sink);
        Self { controller, io: MockIo::with_inputs(inputs), meter: MockMeter::new(), clock, store: MemStore::default(), sink }
    }

    /// Advance one sensing interval and run a full loop pass.
    fn step(&mut self) {
        self.clock.advance(SENSOR_READ_INTERVAL_MS);
        let now = self.clock.now_ms();
        self.controller.poll_inputs(now, &mut self.io, &mut self.sink);
        assert!(self.controller.tick(&self.clock, &mut self.meter, &mut self.io, &mut self.sink));
    }

    fn steps(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }

    fn send(&mut self, command: Command, origin: Origin) -> Outcome {
        self.controller.handle_command(command, origin, &self.clock, &mut self.io, &mut self.store, &mut self.sink)
    }

    fn pump(&self, n: u8) -> &fieldlink::pump::PumpControl {
        self.controller.pump(n).expect("pump exists")
    }

    /// Start pump 1 remotely and bring it to Running at 20 A.
    fn running(mut self) -> Self {
        assert_eq!(self.send(Command::Start(PumpTarget::All), Origin::Broker), Outcome::Accepted);
        self.meter.set_amps(20.0);
        self.steps(4);
        assert_eq!(self.pump(1).state(), PumpState::Running);
        self
    }
}

// ── Start / run / protection ──────────────────────────────────

#[test]
fn remote_start_energises_then_debounces_to_running() {
    let mut rig = Rig::single();
    assert_eq!(rig.send(Command::Start(PumpTarget::All), Origin::Broker), Outcome::Accepted);
    rig.step();
    assert!(rig.io.on(0), "contactor energised on the next tick");
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::ContactorChanged { pump: 1, on: true })), 1);

    rig.meter.set_amps(20.0);
    rig.steps(2);
    assert_eq!(rig.pump(1).state(), PumpState::Stopped, "two agreeing ticks are not enough");
    rig.step();
    assert_eq!(rig.pump(1).state(), PumpState::Running);
    assert!(rig.io.on(1), "run LED follows state");
}

#[test]
fn overcurrent_latches_until_reset() {
    let mut rig = Rig::single().running();
    rig.meter.set_amps(150.0);
    rig.step();

    let p = rig.pump(1);
    assert_eq!((p.state(), p.fault()), (PumpState::Fault, FaultKind::Overcurrent));
    assert!(!rig.io.on(0), "contactor off");
    assert!(rig.io.on(4), "alarm on");
    assert!(rig.io.on(2), "fault LED on");

    assert_eq!(rig.send(Command::Start(PumpTarget::All), Origin::Broker), Outcome::Ignored("pump faulted"));
    rig.meter.set_amps(0.0);
    rig.steps(3);
    assert!(rig.pump(1).is_faulted(), "stays latched with the cause gone");

    assert_eq!(rig.send(Command::Reset(PumpTarget::All), Origin::Broker), Outcome::Accepted);
    assert_eq!(rig.pump(1).state(), PumpState::Stopped);
    assert_eq!(rig.pump(1).fault(), FaultKind::None);
    assert!(!rig.io.on(4), "alarm cleared");
    assert_eq!(rig.send(Command::Reset(PumpTarget::All), Origin::Broker), Outcome::Ignored("not faulted"));
    rig.step();
    assert!(!rig.io.on(2), "fault LED cleared");
}

#[test]
fn running_pump_losing_load_trips_dry_run() {
    let mut rig = Rig::single().running();
    rig.meter.set_amps(0.2);
    rig.step();
    assert_eq!(rig.pump(1).fault(), FaultKind::DryRun);
}

#[test]
fn start_without_current_times_out_as_dry_run() {
    let mut rig = Rig::single();
    rig.send(Command::Start(PumpTarget::All), Origin::Broker);
    rig.step();
    rig.steps(20);
    assert!(!rig.pump(1).is_faulted(), "exactly at the timeout is still allowed");
    rig.step();
    assert_eq!(rig.pump(1).fault(), FaultKind::DryRun);
    assert!(!rig.io.on(0));
}

#[test]
fn meter_loss_faults_every_pump() {
    let mut rig = Rig::triple();
    rig.meter.failing = true;
    rig.steps(4);
    assert!(rig.controller.pumps().iter().all(|p| !p.is_faulted()));
    rig.step();
    assert!(rig.controller.pumps().iter().all(|p| p.fault() == FaultKind::SensorFault));
    assert!(!rig.controller.sensor_online());
    assert_eq!(rig.sink.count(|e| *e == AppEvent::SensorOnline(false)), 1);

    rig.meter.failing = false;
    rig.step();
    assert!(rig.controller.sensor_online());
    assert!(rig.controller.pumps().iter().all(|p| p.is_faulted()), "recovery does not clear the latch");
}

#[test]
fn meter_silent_at_boot_reports_no_spurious_offline_edge() {
    let mut rig = Rig::single();
    rig.meter = MockMeter::booting();
    rig.meter.failing = true;
    rig.step();
    assert!(!rig.controller.sensor_online());
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::SensorOnline(_))), 0);
    assert!(!rig.pump(1).is_faulted(), "one failed read is below the fault threshold");

    rig.meter.failing = false;
    rig.step();
    assert!(rig.controller.sensor_online());
    assert_eq!(rig.sink.count(|e| *e == AppEvent::SensorOnline(true)), 1);
}

#[test]
fn phase_current_only_faults_its_pump() {
    let mut rig = Rig::triple();
    rig.send(Command::Start(PumpTarget::All), Origin::Broker);
    rig.step();
    rig.meter.set_phase_amps([20.0, 150.0, 20.0]);
    rig.step();
    assert!(!rig.pump(1).is_faulted());
    assert_eq!(rig.pump(2).fault(), FaultKind::Overcurrent);
    assert!(!rig.pump(3).is_faulted());
    assert!(rig.io.on(0) && !rig.io.on(1) && rig.io.on(2));
}

#[test]
fn test_fault_latches_sensor_fault() {
    let mut rig = Rig::triple();
    assert_eq!(rig.send(Command::TestFault(PumpTarget::One(3)), Origin::Console), Outcome::Accepted);
    assert_eq!(rig.pump(3).fault(), FaultKind::SensorFault);
    assert!(rig.io.on(6), "pump 3 alarm");
    assert!(!rig.pump(1).is_faulted());
}

#[test]
fn contactor_confirmation_needs_feedback() {
    let mut rig = Rig::single();
    rig.send(Command::Start(PumpTarget::All), Origin::Broker);
    rig.step();
    rig.step();
    assert!(!rig.pump(1).contactor_confirmed());
    rig.io.inputs |= FEEDBACK;
    rig.step();
    assert!(rig.pump(1).contactor_confirmed());
}

// ── Arbitration ───────────────────────────────────────────────

#[test]
fn local_mode_blocks_remote_start_but_not_stop() {
    let mut rig = Rig::single();
    rig.step();
    rig.io.inputs |= LOCAL;
    rig.step();
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::ModeChanged(_))), 1);

    assert_eq!(rig.send(Command::Start(PumpTarget::All), Origin::Broker), Outcome::Ignored("wrong control mode"));
    assert!(!rig.pump(1).start_command());
    assert_eq!(rig.send(Command::Start(PumpTarget::All), Origin::Console), Outcome::Accepted);
    assert_eq!(rig.send(Command::Stop(PumpTarget::All), Origin::Broker), Outcome::Accepted);
    assert!(!rig.pump(1).start_command());
}

#[test]
fn panel_buttons_work_only_in_local_mode() {
    let mut rig = Rig::single();
    rig.step();
    rig.io.inputs |= START_PRESSED;
    rig.step();
    assert!(!rig.pump(1).start_command(), "start button ignored in remote");
    rig.io.inputs &= !START_PRESSED;
    rig.step();

    rig.io.inputs |= LOCAL;
    rig.step();
    rig.io.inputs |= START_PRESSED;
    rig.step();
    assert!(rig.pump(1).start_command());
    assert!(rig.io.on(0));

    rig.io.inputs &= !START_PRESSED;
    rig.step();
    rig.io.inputs &= !STOP_CLOSED;
    rig.step();
    assert!(!rig.pump(1).start_command());
    assert!(!rig.io.on(0));
}

#[test]
fn unknown_pump_is_rejected() {
    let mut rig = Rig::single();
    assert_eq!(rig.send(Command::Start(PumpTarget::One(2)), Origin::Broker), Outcome::Ignored("no such pump"));
}

#[test]
fn restart_class_commands_go_back_to_the_caller() {
    let mut rig = Rig::single();
    assert_eq!(rig.send(Command::WifiReset, Origin::Broker), Outcome::System(SystemAction::WifiReset));
    assert_eq!(rig.send(Command::FactoryReset, Origin::Console), Outcome::System(SystemAction::FactoryReset));
    assert_eq!(rig.send(Command::Reboot, Origin::Broker), Outcome::System(SystemAction::Reboot));
}

// ── Spare outputs ─────────────────────────────────────────────

#[test]
fn console_override_keeps_spare_output_on() {
    let mut rig = Rig::single();
    assert_eq!(rig.send(Command::SetOutput { channel: 3, on: true }, Origin::Console), Outcome::Accepted);
    rig.steps(2);
    assert!(rig.io.on(3));

    // Nothing claims channel 6: it is forced back off.
    rig.io.outputs |= 1 << 6;
    rig.step();
    assert!(!rig.io.on(6));

    rig.send(Command::SetOutput { channel: 3, on: false }, Origin::Console);
    assert!(!rig.io.on(3));
    assert_eq!(
        rig.send(Command::SetOutput { channel: 0, on: true }, Origin::Console),
        Outcome::Ignored("output owned by the controller")
    );
}

// ── Schedule ──────────────────────────────────────────────────

fn scheduled_rig(hour: u8, minute: u8) -> Rig {
    let mut settings = ControllerSettings::defaults(1);
    settings.schedule.enabled = true;
    let clock = MockClock::at(1_000);
    clock.set_local(hour, minute);
    Rig::build(&SINGLE_PUMP, settings, clock, STOP_CLOSED)
}

#[test]
fn window_edges_start_and_stop_pumps() {
    let mut rig = scheduled_rig(5, 59);
    rig.step();
    assert!(!rig.pump(1).start_command());
    assert!(!rig.controller.permitted());

    rig.clock.set_local(6, 0);
    rig.step();
    assert!(rig.pump(1).start_command());
    assert!(rig.io.on(0));

    rig.clock.set_local(18, 0);
    rig.step();
    assert!(!rig.pump(1).start_command());
    assert!(!rig.io.on(0));
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::ScheduleEdge { .. })), 2);
}

#[test]
fn boot_inside_window_starts_at_once() {
    let mut rig = scheduled_rig(12, 0);
    assert!(rig.pump(1).start_command());
    rig.step();
    assert!(rig.io.on(0));
}

#[test]
fn operator_intent_outlives_window_close() {
    let mut rig = scheduled_rig(12, 0);
    rig.send(Command::Start(PumpTarget::All), Origin::Broker);
    rig.clock.set_local(18, 30);
    rig.step();
    assert!(rig.pump(1).start_command(), "schedule only withdraws its own intent");
    assert!(!rig.io.on(0), "but the window still gates the contactor");

    rig.clock.set_local(6, 0);
    rig.step();
    assert!(rig.io.on(0));
}

#[test]
fn tariff_and_custom_window_are_exclusive() {
    let mut rig = Rig::single();
    let enable = ScheduleUpdate { enabled: Some(true), ..ScheduleUpdate::default() };
    assert_eq!(rig.send(Command::SetSchedule(enable), Origin::Broker), Outcome::Accepted);
    assert_eq!(rig.send(Command::SetTou { enabled: true }, Origin::Broker), Outcome::Accepted);
    assert!(rig.controller.tou().enabled);
    assert!(!rig.controller.schedule().enabled);
    assert!(!rig.store.get_bool("schedule", "enabled", true));

    rig.send(Command::SetSchedule(enable), Origin::Broker);
    assert!(!rig.controller.tou().enabled);
    assert!(!rig.store.get_bool("ruraflex", "enabled", true));
}

#[test]
fn invalid_schedule_update_changes_nothing() {
    let mut rig = Rig::single();
    let bad = ScheduleUpdate { start_hour: Some(7), end_minute: Some(75), ..ScheduleUpdate::default() };
    assert_eq!(rig.send(Command::SetSchedule(bad), Origin::Broker), Outcome::Ignored("value out of range"));
    assert_eq!(rig.controller.schedule().start_hour, 6);
}

// ── Settings ──────────────────────────────────────────────────

#[test]
fn thresholds_are_validated_and_persisted() {
    let mut rig = Rig::single();
    let too_high = Command::SetThresholds { pump: PumpTarget::All, max_current: Some(600.0), dry_current: None };
    assert_eq!(rig.send(too_high, Origin::Broker), Outcome::Ignored("value out of range"));
    assert_eq!(rig.pump(1).protection.max_current_a, 120.0);

    let ok = Command::SetThresholds { pump: PumpTarget::One(1), max_current: Some(95.5), dry_current: Some(2.0) };
    assert_eq!(rig.send(ok, Origin::Broker), Outcome::Accepted);
    assert_eq!(rig.store.get_f32("prot_p1", "max_i", 0.0), 95.5);

    let reloaded = ControllerSettings::load(&rig.store, &SINGLE_PUMP.namespaces());
    assert_eq!(reloaded.protection[0].max_current_a, 95.5);
    assert_eq!(reloaded.protection[0].dry_current_a, 2.0);
}

#[test]
fn delays_and_enables_apply_per_pump() {
    let mut rig = Rig::triple();
    let delays = Command::SetDelays { pump: PumpTarget::One(2), overcurrent_s: Some(5), dryrun_s: None };
    assert_eq!(rig.send(delays, Origin::Broker), Outcome::Accepted);
    let off = Command::SetProtection { pump: PumpTarget::One(3), overcurrent: Some(false), dryrun: None };
    assert_eq!(rig.send(off, Origin::Broker), Outcome::Accepted);

    assert_eq!(rig.pump(2).protection.overcurrent_delay_s, 5);
    assert_eq!(rig.pump(1).protection.overcurrent_delay_s, 0);
    assert!(!rig.pump(3).protection.overcurrent_enabled);
    assert_eq!(rig.store.get_u32("prot_p2", "oc_delay", 0), 5);

    let too_long = Command::SetDelays { pump: PumpTarget::All, overcurrent_s: Some(31), dryrun_s: None };
    assert_eq!(rig.send(too_long, Origin::Broker), Outcome::Ignored("value out of range"));
}

#[test]
fn settings_report_is_flat_for_one_pump() {
    let mut rig = Rig::single();
    rig.clock.set_local(9, 15);
    let Outcome::Reply(body) = rig.send(Command::GetSettings, Origin::Broker) else {
        panic!("expected a reply");
    };
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["type"], "settings");
    assert_eq!(v["max_current"], 120.0);
    assert_eq!(v["schedule_days"], 127);
    assert_eq!(v["current_time"], "09:15:00");
    assert!(v.get("protection").is_none());
}

#[test]
fn settings_report_nests_multi_pump_protection() {
    let mut rig = Rig::triple();
    let Outcome::Reply(body) = rig.send(Command::GetSettings, Origin::Broker) else {
        panic!("expected a reply");
    };
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["protection"]["p3"]["max_current"], 120.0);
    assert!(v.get("max_current").is_none());
    assert!(v.get("current_time").is_none(), "clock not synchronised");
}

// ── Telemetry ─────────────────────────────────────────────────

#[test]
fn telemetry_snapshot_fields() {
    let mut rig = Rig::single();
    rig.send(Command::Start(PumpTarget::All), Origin::Broker);
    rig.meter.set_amps(12.3456);
    rig.steps(4);
    rig.clock.set_local(12, 30);

    let local = rig.clock.local_time();
    let t = rig.controller.telemetry(rig.clock.now_ms(), local.as_ref(), Some(Transport::Wired), &rig.io);
    let v: serde_json::Value = serde_json::from_str(&t.to_json()).unwrap();
    assert_eq!(v["Ia"], 12.35);
    assert_eq!(v["Va"], 231.0);
    assert_eq!(v["state"], "RUNNING");
    assert_eq!(v["cmd"], true);
    assert_eq!(v["network"], "ETH");
    assert_eq!(v["mode"], "REMOTE");
    assert_eq!(v["hardware_type"], "PUMP_ESP32S3");
    assert_eq!(v["time"], "12:30:00");
    assert_eq!(v["do"], u64::from(rig.io.outputs));
    assert!(v.get("fault").is_none());
    assert!(v.get("pumps").is_none());
}

#[test]
fn multi_pump_telemetry_carries_per_pump_blocks() {
    let mut rig = Rig::triple();
    rig.send(Command::TestFault(PumpTarget::One(2)), Origin::Console);
    let t = rig.controller.telemetry(rig.clock.now_ms(), None, None, &rig.io);
    let v: serde_json::Value = serde_json::from_str(&t.to_json()).unwrap();
    assert_eq!(v["state"], "FAULT");
    assert_eq!(v["fault"], "SENSOR_FAULT");
    assert_eq!(v["pumps"].as_array().map(Vec::len), Some(3));
    assert_eq!(v["pumps"][1]["fault"], "SENSOR_FAULT");
    assert!(v["pumps"][0].get("fault").is_none());
    assert!(v["network"].is_null());
}

#[test]
fn status_request_forces_telemetry() {
    let mut rig = Rig::single();
    let now = rig.clock.now_ms();
    assert!(rig.controller.telemetry_due(now));
    assert!(!rig.controller.telemetry_due(now + 100));

    assert_eq!(rig.send(Command::Status, Origin::Broker), Outcome::Accepted);
    assert!(rig.controller.telemetry_due(now + 200));

    let Outcome::Reply(text) = rig.send(Command::Status, Origin::Console) else {
        panic!("console status is text");
    };
    assert!(text.contains("Pump1: STOPPED"));
}

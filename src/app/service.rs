//! Pump controller: the hexagonal core.
//!
//! [`PumpController`] owns every [`PumpControl`], the schedule settings and
//! the panel state.  All I/O flows through port traits injected at call
//! sites, so the whole controller runs against mock adapters in tests.
//!
//! ```text
//!  SensorPort ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!   InputPort ──▶ │      PumpController       │
//!  OutputPort ◀── │ engine · schedule · panel │ ◀── Command (Dispatcher)
//!                 └──────────────────────────┘
//! ```

use core::ops::Range;

use log::{info, warn};
use serde_json::json;

use super::commands::{CONSOLE_HELP, Command, ControlMode, Origin, Outcome, PumpTarget, SystemAction};
use super::events::{AppEvent, PumpTelemetry, Telemetry, round_current};
use super::ports::{
    ClockPort, CommandHandler, ConfigStore, EventSink, InputPort, OutputPort, PowerSample, SensorPort,
};
use crate::config::{
    ControllerSettings, EngineTuning, ProtectionConfig, SENSOR_READ_INTERVAL_MS, ScheduleConfig,
    TELEMETRY_INTERVAL_MS, TouConfig,
};
use crate::drivers::button::{ButtonEvent, Contact, PanelButton};
use crate::error::ConfigValidationError;
use crate::pins::BoardProfile;
use crate::pump::{FaultKind, PumpControl, PumpState};
use crate::schedule::{LocalTime, ScheduleEdge, ScheduleGate, operation_permitted};
use crate::transport::Transport;

fn due(last: Option<u64>, now: u64, interval: u64) -> bool {
    last.is_none_or(|t| now.saturating_sub(t) >= interval)
}

// ───────────────────────────────────────────────────────────────
// PumpController
// ───────────────────────────────────────────────────────────────

pub struct PumpController {
    profile: &'static BoardProfile,
    pumps: Vec<PumpControl>,
    schedule: ScheduleConfig,
    tou: TouConfig,
    tuning: EngineTuning,
    gate: ScheduleGate,
    /// Latest schedule verdict; gates the contactors.
    permitted: bool,
    mode: ControlMode,
    start_button: Option<PanelButton>,
    stop_button: Option<PanelButton>,
    inputs: u8,
    /// Spare outputs switched on from the console.
    overrides: u8,
    sample: PowerSample,
    /// Mirrors the meter, which starts offline.
    sensor_online: bool,
    last_read: Option<u64>,
    last_telemetry: Option<u64>,
    telemetry_forced: bool,
}

impl PumpController {
    /// Build one [`PumpControl`] per wired pump.  Pumps without stored
    /// settings get defaults.
    pub fn new(profile: &'static BoardProfile, settings: ControllerSettings, tuning: EngineTuning) -> Self {
        let pumps = profile
            .pumps
            .iter()
            .enumerate()
            .map(|(i, wiring)| {
                let protection = settings.protection.get(i).copied().unwrap_or_default();
                PumpControl::new(i as u8 + 1, *wiring, protection)
            })
            .collect();
        let (start_button, stop_button) = match profile.panel {
            Some(panel) => (
                Some(PanelButton::new(panel.start_bit, Contact::NormallyOpen)),
                Some(PanelButton::new(panel.stop_bit, Contact::NormallyClosed)),
            ),
            None => (None, None),
        };
        Self {
            profile,
            pumps,
            schedule: settings.schedule,
            tou: settings.tou,
            tuning,
            gate: ScheduleGate::new(true),
            permitted: true,
            mode: ControlMode::Remote,
            start_button,
            stop_button,
            inputs: 0,
            overrides: 0,
            sample: PowerSample::default(),
            sensor_online: false,
            last_read: None,
            last_telemetry: None,
            telemetry_forced: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Seed the schedule gate.  Inside an active window every pump is
    /// started as if the window had just opened.
    pub fn boot(&mut self, clock: &impl ClockPort, sink: &mut impl EventSink) {
        let now = clock.now_ms();
        let local = clock.local_time();
        self.permitted = operation_permitted(&self.schedule, &self.tou, local.as_ref());
        self.gate = ScheduleGate::new(self.permitted);
        info!(
            "Schedule: {} ({} window)",
            if self.tou.enabled {
                "tariff"
            } else if self.schedule.enabled {
                "custom"
            } else {
                "off"
            },
            if self.permitted { "within" } else { "outside" }
        );
        if self.schedule_active() && self.permitted {
            for pump in &mut self.pumps {
                pump.schedule_start(now);
            }
        }
        sink.emit(&AppEvent::Started { hardware_type: self.profile.hardware_type, pumps: self.pumps.len() as u8 });
        info!("Controller: {} with {} pump(s)", self.profile.hardware_type, self.pumps.len());
    }

    fn schedule_active(&self) -> bool {
        self.schedule.enabled || self.tou.enabled
    }

    // ── Per-loop work ─────────────────────────────────────────

    /// Sample the DI bank: contactor feedback, mode selector and panel buttons.
    /// Runs every loop iteration so button edges are not missed.
    pub fn poll_inputs<IO: InputPort + OutputPort>(&mut self, now: u64, io: &mut IO, sink: &mut impl EventSink) {
        self.inputs = io.read_inputs();
        for pump in &mut self.pumps {
            pump.refresh_feedback(self.inputs, &*io);
        }

        let Some(panel) = self.profile.panel else {
            return;
        };
        let mode = if self.inputs & (1 << panel.mode_bit) != 0 { ControlMode::Local } else { ControlMode::Remote };
        if mode != self.mode {
            self.mode = mode;
            info!("Panel: {} mode", mode.as_str());
            sink.emit(&AppEvent::ModeChanged(mode));
        }

        let inputs = self.inputs;
        let start = self.start_button.as_mut().and_then(|b| b.sample(inputs, now));
        let stop = self.stop_button.as_mut().and_then(|b| b.sample(inputs, now));
        if stop == Some(ButtonEvent::Pressed) {
            info!("Panel: stop pressed");
            self.stop(PumpTarget::All, io);
        } else if start == Some(ButtonEvent::Pressed) {
            let outcome = self.start(PumpTarget::All, Origin::Button, now);
            info!("Panel: start pressed ({:?})", outcome);
        }
    }

    /// One sensing tick, at most every [`SENSOR_READ_INTERVAL_MS`]: read the
    /// meter, run every pump's engine, evaluate the schedule, then drive the
    /// outputs.  Returns true if a tick ran.
    pub fn tick(
        &mut self,
        clock: &impl ClockPort,
        sensor: &mut impl SensorPort,
        io: &mut impl OutputPort,
        sink: &mut impl EventSink,
    ) -> bool {
        let now = clock.now_ms();
        if !due(self.last_read, now, SENSOR_READ_INTERVAL_MS) {
            return false;
        }
        self.last_read = Some(now);

        let reading = sensor.read();
        self.sample = reading.sample;
        let online = sensor.is_online();
        if online != self.sensor_online {
            self.sensor_online = online;
            if online {
                info!("Sensor: meter back online");
            } else {
                warn!("Sensor: meter offline after {} failures", sensor.consecutive_failures());
            }
            sink.emit(&AppEvent::SensorOnline(online));
        }
        // A shared meter failure faults every pump, running or not.
        let sensor_failed = !online && sensor.consecutive_failures() >= self.tuning.sensor_fault_threshold;

        for pump in &mut self.pumps {
            pump.update(now, &self.sample, sensor_failed, &self.tuning, io, sink);
        }

        self.evaluate_schedule(now, clock.local_time().as_ref(), io, sink);

        for pump in &mut self.pumps {
            pump.apply_contactor(now, self.permitted, io, sink);
        }
        self.drive_panel_leds(io);
        self.release_spare_outputs(io);
        true
    }

    fn evaluate_schedule(&mut self, now: u64, local: Option<&LocalTime>, io: &mut impl OutputPort, sink: &mut impl EventSink) {
        self.permitted = operation_permitted(&self.schedule, &self.tou, local);
        let Some(edge) = self.gate.observe(self.schedule_active(), self.permitted) else {
            return;
        };
        info!("Schedule: {} operating window", if edge == ScheduleEdge::Enter { "entered" } else { "left" });
        sink.emit(&AppEvent::ScheduleEdge { permitted: self.permitted });
        for pump in &mut self.pumps {
            match edge {
                ScheduleEdge::Enter => {
                    pump.schedule_start(now);
                }
                ScheduleEdge::Leave => {
                    pump.schedule_stop(io);
                }
            }
        }
    }

    fn drive_panel_leds(&self, io: &mut impl OutputPort) {
        let (Some(panel), Some(pump)) = (self.profile.panel, self.pumps.first()) else {
            return;
        };
        io.set_output(panel.run_led, pump.state() == PumpState::Running);
        io.set_output(panel.fault_led, pump.is_faulted());
    }

    /// Outputs the profile does not wire stay off unless overridden.
    fn release_spare_outputs(&self, io: &mut impl OutputPort) {
        let stray = io.output_bits() & !self.profile.used_outputs & !self.overrides;
        for ch in (0..8).filter(|ch| stray & (1 << ch) != 0) {
            io.set_output(ch, false);
        }
    }

    /// De-energise everything and drop all start intent.
    pub fn halt_all(&mut self, io: &mut impl OutputPort) {
        for pump in &mut self.pumps {
            pump.stop(io);
        }
        info!("Controller: all pumps halted");
    }

    // ── Telemetry ─────────────────────────────────────────────

    /// True once per telemetry interval, or straight after a STATUS request.
    pub fn telemetry_due(&mut self, now: u64) -> bool {
        if !self.telemetry_forced && !due(self.last_telemetry, now, TELEMETRY_INTERVAL_MS) {
            return false;
        }
        self.telemetry_forced = false;
        self.last_telemetry = Some(now);
        true
    }

    pub fn telemetry(
        &self,
        now: u64,
        local: Option<&LocalTime>,
        network: Option<Transport>,
        io: &impl OutputPort,
    ) -> Telemetry {
        let state = if self.pumps.iter().any(PumpControl::is_faulted) {
            PumpState::Fault
        } else if self.pumps.iter().any(|p| p.state() == PumpState::Running) {
            PumpState::Running
        } else {
            PumpState::Stopped
        };
        let fault = self.pumps.iter().map(PumpControl::fault).find(|k| *k != FaultKind::None);
        let pumps = (self.pumps.len() > 1).then(|| {
            self.pumps
                .iter()
                .map(|p| PumpTelemetry {
                    id: p.id(),
                    state: p.state(),
                    fault: p.is_faulted().then(|| p.fault()),
                    cmd: p.start_command(),
                    current: round_current(p.current()),
                    contactor_confirmed: p.contactor_confirmed(),
                })
                .collect()
        });

        let mut t = Telemetry {
            va: 0.0,
            vb: 0.0,
            vc: 0.0,
            ia: 0.0,
            ib: 0.0,
            ic: 0.0,
            state,
            fault,
            cmd: self.pumps.iter().any(PumpControl::start_command),
            sensor: self.sensor_online,
            contactor_confirmed: self.pumps.iter().any(PumpControl::contactor_confirmed),
            mode: self.mode,
            network,
            di: self.inputs,
            outputs: io.output_bits(),
            hardware_type: self.profile.hardware_type.to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            uptime: now / 1000,
            time: local.map(|l| l.hms().as_str().to_string()),
            pumps,
        };
        t.set_voltages(&self.sample.voltages);
        t.set_currents(&self.sample.currents);
        t
    }

    /// `GET_SETTINGS` reply.
    pub fn settings_report(&self, local: Option<&LocalTime>) -> String {
        let protection = |p: &ProtectionConfig| {
            json!({
                "overcurrent_enabled": p.overcurrent_enabled,
                "dryrun_enabled": p.dryrun_enabled,
                "max_current": p.max_current_a,
                "dry_current": p.dry_current_a,
                "overcurrent_delay_s": p.overcurrent_delay_s,
                "dryrun_delay_s": p.dryrun_delay_s,
            })
        };
        let mut doc = json!({
            "type": "settings",
            "schedule_enabled": self.schedule.enabled,
            "schedule_start_hour": self.schedule.start_hour,
            "schedule_start_minute": self.schedule.start_minute,
            "schedule_end_hour": self.schedule.end_hour,
            "schedule_end_minute": self.schedule.end_minute,
            "schedule_days": self.schedule.days,
            "ruraflex_enabled": self.tou.enabled,
        });
        if let [only] = self.pumps.as_slice() {
            let p = &only.protection;
            doc["overcurrent_protection"] = json!(p.overcurrent_enabled);
            doc["dryrun_protection"] = json!(p.dryrun_enabled);
            doc["max_current"] = json!(p.max_current_a);
            doc["dry_current"] = json!(p.dry_current_a);
            doc["overcurrent_delay_s"] = json!(p.overcurrent_delay_s);
            doc["dryrun_delay_s"] = json!(p.dryrun_delay_s);
        } else {
            let mut nested = serde_json::Map::new();
            for pump in &self.pumps {
                nested.insert(format!("p{}", pump.id()), protection(&pump.protection));
            }
            doc["protection"] = serde_json::Value::Object(nested);
        }
        if let Some(t) = local {
            doc["current_time"] = json!(t.hms().as_str());
        }
        doc.to_string()
    }

    /// Human-readable status for the console.
    pub fn status_text(&self) -> String {
        let mut out = format!(
            "Mode: {}  Sensor: {}  Schedule: {}\n",
            self.mode.as_str(),
            if self.sensor_online { "online" } else { "OFFLINE" },
            if self.permitted { "permitted" } else { "blocked" }
        );
        let v = &self.sample.voltages;
        out.push_str(&format!("V: {:.1} / {:.1} / {:.1}\n", v[0], v[1], v[2]));
        for p in &self.pumps {
            out.push_str(&format!(
                "Pump{}: {} fault={} cmd={} I={:.2}A confirmed={}\n",
                p.id(),
                p.state(),
                p.fault(),
                u8::from(p.start_command()),
                p.current(),
                u8::from(p.contactor_confirmed())
            ));
        }
        out
    }

    // ── Commands ──────────────────────────────────────────────

    fn select(&self, target: PumpTarget) -> Result<Range<usize>, ConfigValidationError> {
        match target {
            PumpTarget::All => Ok(0..self.pumps.len()),
            PumpTarget::One(n) if (1..=self.pumps.len()).contains(&(n as usize)) => {
                Ok(n as usize - 1..n as usize)
            }
            PumpTarget::One(n) => Err(ConfigValidationError::UnknownPump(n)),
        }
    }

    fn start(&mut self, target: PumpTarget, origin: Origin, now: u64) -> Outcome {
        if !origin.may_start(self.mode) {
            info!("Controller: {:?} start ignored in {} mode", origin, self.mode.as_str());
            return Outcome::Ignored("wrong control mode");
        }
        let range = match self.select(target) {
            Ok(r) => r,
            Err(e) => return reject(e),
        };
        let started = self.pumps[range].iter_mut().map(|p| p.request_start(now).is_ok()).filter(|ok| *ok).count();
        if started == 0 { Outcome::Ignored("pump faulted") } else { Outcome::Accepted }
    }

    fn stop(&mut self, target: PumpTarget, io: &mut impl OutputPort) -> Outcome {
        let range = match self.select(target) {
            Ok(r) => r,
            Err(e) => return reject(e),
        };
        for pump in &mut self.pumps[range] {
            pump.stop(io);
        }
        Outcome::Accepted
    }

    /// Apply `f` to each addressed pump's protection, then persist it.
    fn update_protection(
        &mut self,
        target: PumpTarget,
        store: &mut impl ConfigStore,
        mut f: impl FnMut(&mut ProtectionConfig) -> Result<(), ConfigValidationError>,
    ) -> Outcome {
        let range = match self.select(target) {
            Ok(r) => r,
            Err(e) => return reject(e),
        };
        let mut rejected = None;
        for pump in &mut self.pumps[range] {
            if let Err(e) = f(&mut pump.protection) {
                warn!("Config: pump {} {}, kept previous value", pump.id(), e);
                rejected = Some(e);
            }
            if let Err(e) = pump.protection.save(store, pump.wiring().namespace) {
                warn!("Config: saving {} failed: {}", pump.wiring().namespace, e);
            }
        }
        match rejected {
            Some(_) => Outcome::Ignored("value out of range"),
            None => Outcome::Accepted,
        }
    }

    pub fn handle_command(
        &mut self,
        command: Command,
        origin: Origin,
        clock: &impl ClockPort,
        io: &mut impl OutputPort,
        store: &mut impl ConfigStore,
        sink: &mut impl EventSink,
    ) -> Outcome {
        let now = clock.now_ms();
        match command {
            Command::Start(target) => self.start(target, origin, now),
            Command::Stop(target) => self.stop(target, io),
            Command::Reset(target) => {
                let range = match self.select(target) {
                    Ok(r) => r,
                    Err(e) => return reject(e),
                };
                let cleared = self.pumps[range]
                    .iter_mut()
                    .map(|p| p.reset_fault(&mut *io, &mut *sink))
                    .filter(|cleared| *cleared)
                    .count();
                if cleared == 0 { Outcome::Ignored("not faulted") } else { Outcome::Accepted }
            }
            Command::Status if origin == Origin::Console => Outcome::Reply(self.status_text()),
            Command::Status => {
                self.telemetry_forced = true;
                Outcome::Accepted
            }
            Command::SetProtection { pump, overcurrent, dryrun } => self.update_protection(pump, store, |p| {
                if let Some(v) = overcurrent {
                    p.overcurrent_enabled = v;
                }
                if let Some(v) = dryrun {
                    p.dryrun_enabled = v;
                }
                Ok(())
            }),
            Command::SetThresholds { pump, max_current, dry_current } => {
                self.update_protection(pump, store, |p| {
                    let a = max_current.map_or(Ok(()), |v| p.set_max_current(v));
                    let b = dry_current.map_or(Ok(()), |v| p.set_dry_current(v));
                    a.and(b)
                })
            }
            Command::SetDelays { pump, overcurrent_s, dryrun_s } => self.update_protection(pump, store, |p| {
                let a = overcurrent_s.map_or(Ok(()), |v| p.set_overcurrent_delay(v));
                let b = dryrun_s.map_or(Ok(()), |v| p.set_dryrun_delay(v));
                a.and(b)
            }),
            Command::SetSchedule(update) => {
                if let Err(e) = self.schedule.apply(&update) {
                    warn!("Schedule: {}, update rejected", e);
                    return Outcome::Ignored("value out of range");
                }
                if self.schedule.enabled && self.tou.enabled {
                    self.tou.enabled = false;
                    info!("Schedule: custom window enabled, tariff disabled");
                    persist("ruraflex", self.tou.save(store));
                }
                persist("schedule", self.schedule.save(store));
                Outcome::Accepted
            }
            Command::SetTou { enabled } => {
                self.tou.enabled = enabled;
                if enabled && self.schedule.enabled {
                    self.schedule.enabled = false;
                    info!("Schedule: tariff enabled, custom window disabled");
                    persist("schedule", self.schedule.save(store));
                }
                persist("ruraflex", self.tou.save(store));
                Outcome::Accepted
            }
            Command::GetSettings => Outcome::Reply(self.settings_report(clock.local_time().as_ref())),
            Command::UpdateFirmware { .. } => Outcome::Ignored("firmware updates arrive over the broker"),
            Command::TestFault(target) => {
                let range = match self.select(target) {
                    Ok(r) => r,
                    Err(e) => return reject(e),
                };
                warn!("Controller: test fault requested");
                for pump in &mut self.pumps[range] {
                    pump.trigger_fault(FaultKind::SensorFault, now, io, &mut *sink);
                }
                Outcome::Accepted
            }
            Command::SetOutput { channel, on } => {
                if channel >= 8 || self.profile.used_outputs & (1 << channel) != 0 {
                    return Outcome::Ignored("output owned by the controller");
                }
                if on {
                    self.overrides |= 1 << channel;
                } else {
                    self.overrides &= !(1 << channel);
                }
                io.set_output(channel, on);
                info!("IO: DO{} {}", channel + 1, if on { "ON" } else { "OFF" });
                Outcome::Accepted
            }
            Command::WifiReset => Outcome::System(SystemAction::WifiReset),
            Command::FactoryReset => Outcome::System(SystemAction::FactoryReset),
            Command::Reboot => Outcome::System(SystemAction::Reboot),
            Command::Help => Outcome::Reply(CONSOLE_HELP.to_string()),
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn pumps(&self) -> &[PumpControl] {
        &self.pumps
    }

    /// 1-based.
    pub fn pump(&self, n: u8) -> Option<&PumpControl> {
        self.pumps.get((n as usize).checked_sub(1)?)
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    pub fn tou(&self) -> &TouConfig {
        &self.tou
    }

    pub fn permitted(&self) -> bool {
        self.permitted
    }

    pub fn sensor_online(&self) -> bool {
        self.sensor_online
    }

    pub fn sample(&self) -> &PowerSample {
        &self.sample
    }
}

fn reject(e: ConfigValidationError) -> Outcome {
    warn!("Controller: {}", e);
    Outcome::Ignored("no such pump")
}

fn persist<E: core::fmt::Display>(what: &str, result: Result<(), E>) {
    if let Err(e) = result {
        warn!("Config: saving {} failed: {}", what, e);
    }
}

// ───────────────────────────────────────────────────────────────
// Dispatcher: the CommandHandler every source drives
// ───────────────────────────────────────────────────────────────

/// Borrows the controller and its ports for one dispatch round.
pub struct Dispatcher<'a, IO, ST, CK, SK> {
    pub controller: &'a mut PumpController,
    pub io: &'a mut IO,
    pub store: &'a mut ST,
    pub clock: &'a CK,
    pub sink: &'a mut SK,
}

impl<IO, ST, CK, SK> CommandHandler for Dispatcher<'_, IO, ST, CK, SK>
where
    IO: OutputPort,
    ST: ConfigStore,
    CK: ClockPort,
    SK: EventSink,
{
    fn halt_all(&mut self) {
        self.controller.halt_all(&mut *self.io);
    }

    fn dispatch(&mut self, command: Command, origin: Origin) -> Outcome {
        self.controller.handle_command(command, origin, self.clock, &mut *self.io, &mut *self.store, &mut *self.sink)
    }
}

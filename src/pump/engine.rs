use log::{error, info, warn};

use super::{FaultKind, PumpState};
use crate::app::events::AppEvent;
use crate::app::ports::{EventSink, OutputPort, PowerSample};
use crate::config::{EngineTuning, ProtectionConfig};
use crate::error::ElectricalFault;
use crate::pins::PumpWiring;

/// Outcome of one protection pass, before debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// No fault; the state the current suggests.
    Settle(PumpState),
    Trip(ElectricalFault),
}

/// Runtime state of one pump.
///
/// All timing is `now - timestamp` against the injected millisecond clock.
#[derive(Debug, Clone)]
pub struct PumpControl {
    /// 1-based pump number used on the wire.
    id: u8,
    wiring: PumpWiring,
    pub protection: ProtectionConfig,

    state: PumpState,
    pending: PumpState,
    debounce: u8,
    fault: FaultKind,
    fault_at: Option<u64>,
    fault_currents: [f32; 3],

    start_command: bool,
    /// When the current start intent was raised.
    start_command_at: Option<u64>,
    /// Start intent was raised by the schedule, not an operator.
    scheduled: bool,

    /// Last value written to the contactor by [`apply_contactor`](Self::apply_contactor).
    contactor_on: bool,
    /// When the contactor was last energised; the start timeout runs from here.
    energised_at: u64,
    contactor_confirmed: bool,

    overcurrent_since: Option<u64>,
    dryrun_since: Option<u64>,

    currents: [f32; 3],
    current: f32,
}

impl PumpControl {
    pub fn new(id: u8, wiring: PumpWiring, protection: ProtectionConfig) -> Self {
        Self {
            id,
            wiring,
            protection,
            state: PumpState::Stopped,
            pending: PumpState::Stopped,
            debounce: 0,
            fault: FaultKind::None,
            fault_at: None,
            fault_currents: [0.0; 3],
            start_command: false,
            start_command_at: None,
            scheduled: false,
            contactor_on: false,
            energised_at: 0,
            contactor_confirmed: false,
            overcurrent_since: None,
            dryrun_since: None,
            currents: [0.0; 3],
            current: 0.0,
        }
    }

    // ── Sensing tick ──────────────────────────────────────────

    /// Feed one sample through protection, debounce and state commit.
    ///
    /// `sensor_failed` is true once the meter has been offline for the
    /// consecutive-failure threshold; it faults the pump regardless of current.
    pub fn update(
        &mut self,
        now: u64,
        sample: &PowerSample,
        sensor_failed: bool,
        tuning: &EngineTuning,
        io: &mut impl OutputPort,
        sink: &mut impl EventSink,
    ) {
        self.currents = sample.currents;
        self.current = self.wiring.phase.current(&sample.currents);

        if self.state == PumpState::Fault {
            let expired = self
                .fault_at
                .is_some_and(|t| tuning.auto_reset_ms > 0 && now.saturating_sub(t) > tuning.auto_reset_ms);
            if expired {
                info!("Pump{}: auto-reset after {} ms", self.id, tuning.auto_reset_ms);
                self.reset_fault(io, sink);
            }
            return;
        }

        if sensor_failed {
            self.trigger_fault(FaultKind::SensorFault, now, io, sink);
            return;
        }

        match self.evaluate(now, tuning) {
            Evaluation::Trip(cause) => {
                if cause == ElectricalFault::StartTimeout {
                    warn!("Pump{}: no running current {} ms after start", self.id, tuning.start_timeout_ms);
                }
                self.trigger_fault(cause.into(), now, io, sink);
            }
            Evaluation::Settle(target) => self.debounce_towards(target, tuning, sink),
        }
    }

    /// Protection checks in priority order.  Updates the condition timers.
    pub fn evaluate(&mut self, now: u64, tuning: &EngineTuning) -> Evaluation {
        let p = self.protection;

        if p.overcurrent_enabled && self.current > p.max_current_a {
            let since = *self.overcurrent_since.get_or_insert(now);
            if now.saturating_sub(since) >= u64::from(p.overcurrent_delay_s) * 1000 {
                return Evaluation::Trip(ElectricalFault::Overcurrent);
            }
        } else {
            self.overcurrent_since = None;
        }

        let watch_dry_run =
            p.dryrun_enabled && p.dry_current_a > 0.0 && self.start_command && self.state == PumpState::Running;
        if watch_dry_run && self.current < p.dry_current_a {
            let since = *self.dryrun_since.get_or_insert(now);
            if now.saturating_sub(since) >= u64::from(p.dryrun_delay_s) * 1000 {
                return Evaluation::Trip(ElectricalFault::DryRun);
            }
        } else {
            self.dryrun_since = None;
        }

        if tuning.start_timeout_ms > 0
            && self.start_command
            && self.contactor_on
            && self.state != PumpState::Running
            && now.saturating_sub(self.energised_at) > tuning.start_timeout_ms
        {
            return Evaluation::Trip(ElectricalFault::StartTimeout);
        }

        let target = match self.state {
            PumpState::Running if self.current < tuning.run_threshold_a - tuning.hysteresis_a => PumpState::Stopped,
            PumpState::Running => PumpState::Running,
            _ if self.current > tuning.run_threshold_a => PumpState::Running,
            _ => PumpState::Stopped,
        };
        Evaluation::Settle(target)
    }

    fn debounce_towards(&mut self, target: PumpState, tuning: &EngineTuning, sink: &mut impl EventSink) {
        if target == self.state {
            self.pending = self.state;
            self.debounce = 0;
            return;
        }
        if target == self.pending {
            self.debounce = self.debounce.saturating_add(1);
        } else {
            self.pending = target;
            self.debounce = 1;
        }
        if self.debounce >= tuning.debounce_count {
            let from = core::mem::replace(&mut self.state, target);
            self.debounce = 0;
            info!("Pump{}: {} -> {} ({:.2} A)", self.id, from, target, self.current);
            sink.emit(&AppEvent::StateChanged { pump: self.id, from, to: target });
        }
    }

    // ── Fault latch ───────────────────────────────────────────

    /// Latch `kind`.  Returns false (and does nothing) if already faulted.
    ///
    /// The contactor is de-energised before any event is emitted.
    pub fn trigger_fault(&mut self, kind: FaultKind, now: u64, io: &mut impl OutputPort, sink: &mut impl EventSink) -> bool {
        if self.state == PumpState::Fault {
            return false;
        }
        io.set_output(self.wiring.contactor, false);
        io.set_output(self.wiring.alarm, true);
        self.contactor_on = false;

        self.state = PumpState::Fault;
        self.pending = PumpState::Fault;
        self.debounce = 0;
        self.fault = kind;
        self.fault_at = Some(now);
        self.fault_currents = self.currents;
        self.start_command = false;
        self.start_command_at = None;
        self.scheduled = false;
        self.contactor_confirmed = false;

        error!("Pump{}: FAULT {} at {:.2} A", self.id, kind, self.current);
        sink.emit(&AppEvent::FaultLatched { pump: self.id, kind, current_a: self.current });
        true
    }

    /// Clear a latched fault back to Stopped.  No-op unless faulted.
    pub fn reset_fault(&mut self, io: &mut impl OutputPort, sink: &mut impl EventSink) -> bool {
        if self.state != PumpState::Fault {
            return false;
        }
        let kind = core::mem::replace(&mut self.fault, FaultKind::None);
        self.state = PumpState::Stopped;
        self.pending = PumpState::Stopped;
        self.debounce = 0;
        self.fault_at = None;
        self.start_command = false;
        self.start_command_at = None;
        self.scheduled = false;
        self.overcurrent_since = None;
        self.dryrun_since = None;
        io.set_output(self.wiring.alarm, false);

        info!("Pump{}: fault {} cleared", self.id, kind);
        sink.emit(&AppEvent::FaultCleared { pump: self.id, kind });
        true
    }

    // ── Intent ────────────────────────────────────────────────

    /// Operator start at `now`.  Refused while faulted.
    pub fn request_start(&mut self, now: u64) -> Result<(), &'static str> {
        if self.state == PumpState::Fault {
            return Err("pump faulted");
        }
        if !self.start_command {
            self.start_command = true;
            self.start_command_at = Some(now);
            info!("Pump{}: start commanded", self.id);
        }
        self.scheduled = false;
        Ok(())
    }

    /// Schedule-driven start.  Returns true if intent was raised.
    pub fn schedule_start(&mut self, now: u64) -> bool {
        if self.state == PumpState::Fault || self.start_command {
            return false;
        }
        self.start_command = true;
        self.start_command_at = Some(now);
        self.scheduled = true;
        info!("Pump{}: schedule start", self.id);
        true
    }

    /// Schedule-driven stop.  Only withdraws intent the schedule raised.
    pub fn schedule_stop(&mut self, io: &mut impl OutputPort) -> bool {
        if !self.scheduled || !self.start_command {
            return false;
        }
        info!("Pump{}: schedule stop", self.id);
        self.stop(io);
        true
    }

    /// Stop, honoured in every mode.  Withdraws intent and opens the
    /// contactor; the state follows the measured current through the debounce.
    pub fn stop(&mut self, io: &mut impl OutputPort) {
        self.start_command = false;
        self.start_command_at = None;
        self.scheduled = false;
        io.set_output(self.wiring.contactor, false);
        if core::mem::take(&mut self.contactor_on) {
            info!("Pump{}: contactor OFF", self.id);
        }
    }

    // ── Outputs ───────────────────────────────────────────────

    /// Drive the contactor from intent, fault and schedule permission.
    /// Writes and logs only on change.
    pub fn apply_contactor(&mut self, now: u64, permitted: bool, io: &mut impl OutputPort, sink: &mut impl EventSink) {
        let desired = self.start_command && self.state != PumpState::Fault && permitted;
        if desired == self.contactor_on {
            return;
        }
        io.set_output(self.wiring.contactor, desired);
        self.contactor_on = desired;
        if desired {
            self.energised_at = now;
        }
        info!("Pump{}: contactor {}", self.id, if desired { "ON" } else { "OFF" });
        sink.emit(&AppEvent::ContactorChanged { pump: self.id, on: desired });
    }

    /// Contactor confirmed = commanded on AND auxiliary contact closed.
    pub fn refresh_feedback(&mut self, inputs: u8, io: &impl OutputPort) {
        self.contactor_confirmed =
            io.is_output_on(self.wiring.contactor) && inputs & (1 << self.wiring.feedback_bit) != 0;
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn wiring(&self) -> &PumpWiring {
        &self.wiring
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn fault(&self) -> FaultKind {
        self.fault
    }

    pub fn is_faulted(&self) -> bool {
        self.state == PumpState::Fault
    }

    pub fn fault_at(&self) -> Option<u64> {
        self.fault_at
    }

    pub fn fault_currents(&self) -> [f32; 3] {
        self.fault_currents
    }

    pub fn start_command(&self) -> bool {
        self.start_command
    }

    /// When the standing start intent was raised, if any.
    pub fn start_command_at(&self) -> Option<u64> {
        self.start_command_at
    }

    /// When the contactor was last energised.
    pub fn energised_at(&self) -> u64 {
        self.energised_at
    }

    pub fn contactor_confirmed(&self) -> bool {
        self.contactor_confirmed
    }

    /// Monitored current for this pump (A).
    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn debounce_count(&self) -> u8 {
        self.debounce
    }

    pub fn pending(&self) -> PumpState {
        self.pending
    }
}

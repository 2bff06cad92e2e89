//! Three-phase power meter on the RS-485 bus.
//!
//! One exchange reads 12 input registers from 0x0000: Va, Vb, Vc, Ia, Ib,
//! Ic as high-word-first IEEE-754 floats.  Readings are sanity-checked
//! before they reach the domain:
//!
//! - voltages outside 0..=500 V (or non-finite) keep the last good triplet,
//!   the read still counts as a success;
//! - currents outside -0.5..=500 A (or non-finite) keep the last good
//!   currents and report `ok = false`, since protection decisions hang on
//!   them.
//!
//! The meter starts offline and comes online on the first good exchange.

use log::{debug, warn};

use crate::app::ports::{PowerSample, SensorPort, SensorReading};
use crate::drivers::modbus::{RegisterBus, registers_to_f32};
use crate::error::SensorError;

const FIRST_REGISTER: u16 = 0x0000;
const REGISTER_COUNT: usize = 12;

/// Consecutive failed exchanges before the meter is reported offline.
pub const OFFLINE_AFTER: u32 = 5;

const VOLTAGE_RANGE: core::ops::RangeInclusive<f32> = 0.0..=500.0;
const CURRENT_RANGE: core::ops::RangeInclusive<f32> = -0.5..=500.0;

pub struct PowerMeter<B> {
    bus: B,
    slave: u8,
    last: PowerSample,
    failures: u32,
    online: bool,
    last_error: Option<SensorError>,
}

impl<B: RegisterBus> PowerMeter<B> {
    pub fn new(bus: B, slave: u8) -> Self {
        Self { bus, slave, last: PowerSample::default(), failures: 0, online: false, last_error: None }
    }

    pub fn last_error(&self) -> Option<SensorError> {
        self.last_error
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    fn exchange(&mut self) -> Result<([f32; 3], [f32; 3]), SensorError> {
        let mut regs = [0u16; REGISTER_COUNT];
        self.bus.read_input_registers(self.slave, FIRST_REGISTER, &mut regs)?;
        let mut values = [0f32; 6];
        for (v, pair) in values.iter_mut().zip(regs.chunks_exact(2)) {
            *v = registers_to_f32(pair[0], pair[1]);
        }
        Ok(([values[0], values[1], values[2]], [values[3], values[4], values[5]]))
    }

    fn record_failure(&mut self, e: SensorError) {
        self.failures = self.failures.saturating_add(1);
        self.last_error = Some(e);
        debug!("Meter: read failed ({}), {} in a row", e, self.failures);
        if self.online && self.failures >= OFFLINE_AFTER {
            self.online = false;
            warn!("Meter: offline after {} failed reads", self.failures);
        }
    }
}

fn all_within(values: &[f32; 3], range: &core::ops::RangeInclusive<f32>) -> bool {
    values.iter().all(|v| v.is_finite() && range.contains(v))
}

impl<B: RegisterBus> SensorPort for PowerMeter<B> {
    fn read(&mut self) -> SensorReading {
        let (voltages, currents) = match self.exchange() {
            Ok(v) => v,
            Err(e) => {
                self.record_failure(e);
                return SensorReading { sample: self.last, ok: false };
            }
        };

        self.failures = 0;
        self.last_error = None;
        self.online = true;

        if all_within(&voltages, &VOLTAGE_RANGE) {
            self.last.voltages = voltages;
        } else {
            warn!("Meter: implausible voltages {:?}, keeping last", voltages);
        }
        if !all_within(&currents, &CURRENT_RANGE) {
            warn!("Meter: implausible currents {:?}, keeping last", currents);
            self.last_error = Some(SensorError::InvalidReading);
            return SensorReading { sample: self.last, ok: false };
        }
        self.last.currents = currents;
        SensorReading { sample: self.last, ok: true }
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

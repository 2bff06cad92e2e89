//! Board IO adapter: relay expander + DI bank behind the domain IO ports.
//!
//! This and the meter adapter are the only places that touch board
//! peripherals.  Generic over the I2C bus so the host build can drive the
//! expander with a mock bus.

use embedded_hal::i2c::I2c;
use log::warn;

use crate::app::ports::{InputPort, OutputPort};
use crate::drivers::digital_inputs::DigitalInputs;
use crate::drivers::io_expander::Tca9554;

pub struct BoardIo<I2C> {
    relays: Tca9554<I2C>,
    inputs: DigitalInputs,
    bus_errors: u32,
}

impl<I2C: I2c> BoardIo<I2C> {
    /// Initialise the expander with every relay released.
    pub fn new(i2c: I2C, addr: u8, inputs: DigitalInputs) -> Result<Self, I2C::Error> {
        let mut relays = Tca9554::new(i2c, addr);
        relays.init()?;
        log::info!("IO: TCA9554 at 0x{:02X}, all outputs off", addr);
        Ok(Self { relays, inputs, bus_errors: 0 })
    }

    pub fn bus_errors(&self) -> u32 {
        self.bus_errors
    }
}

// ── OutputPort ────────────────────────────────────────────────

impl<I2C: I2c> OutputPort for BoardIo<I2C> {
    fn set_output(&mut self, channel: u8, on: bool) {
        if let Err(e) = self.relays.set(channel, on) {
            self.bus_errors += 1;
            warn!("IO: DO{} write failed: {:?}", channel + 1, e);
        }
    }

    fn is_output_on(&self, channel: u8) -> bool {
        self.relays.is_on(channel)
    }

    fn output_bits(&self) -> u8 {
        self.relays.energised()
    }
}

// ── InputPort ─────────────────────────────────────────────────

impl<I2C: I2c> InputPort for BoardIo<I2C> {
    fn read_inputs(&mut self) -> u8 {
        self.inputs.read()
    }
}

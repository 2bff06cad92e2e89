//! TCA9554 8-bit I2C output expander driving the relay bank.
//!
//! Outputs are active-low: a cleared port bit energises the relay.  The
//! driver keeps the raw port image and only touches the bus when the image
//! changes.
//!
//! Init order matters: the output latch is loaded with all-off *before*
//! the pins are switched to outputs, so relays never glitch on at boot.

use embedded_hal::i2c::I2c;

const REG_OUTPUT: u8 = 0x01;
const REG_POLARITY: u8 = 0x02;
const REG_CONFIG: u8 = 0x03;

/// Raw port value with every relay released.
const ALL_OFF: u8 = 0xFF;

pub struct Tca9554<I2C> {
    i2c: I2C,
    addr: u8,
    port: u8,
}

impl<I2C: I2c> Tca9554<I2C> {
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self { i2c, addr, port: ALL_OFF }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.addr, &[reg, value])
    }

    pub fn init(&mut self) -> Result<(), I2C::Error> {
        self.write_reg(REG_OUTPUT, ALL_OFF)?;
        self.write_reg(REG_POLARITY, 0x00)?;
        self.write_reg(REG_CONFIG, 0x00)?;
        self.write_reg(REG_OUTPUT, self.port)
    }

    /// Energise (`on`) or release relay `channel`.  Returns whether the bus
    /// was written.
    pub fn set(&mut self, channel: u8, on: bool) -> Result<bool, I2C::Error> {
        let mask = 1u8 << (channel & 7);
        let next = if on { self.port & !mask } else { self.port | mask };
        if next == self.port {
            return Ok(false);
        }
        self.write_reg(REG_OUTPUT, next)?;
        self.port = next;
        Ok(true)
    }

    pub fn is_on(&self, channel: u8) -> bool {
        self.port & (1 << (channel & 7)) == 0
    }

    /// Energised relays as a bitmap, bit n = channel n.
    pub fn energised(&self) -> u8 {
        !self.port
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}

//! Opto-isolated digital input bank DI0..DI7.
//!
//! Each input pulls its GPIO low when energised; the driver inverts so a
//! set bit means "input active".  On non-espidf targets the bitmap is a
//! plain field the simulator sets with [`DigitalInputs::sim_set`].

#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::gpio::{AnyIOPin, Input, PinDriver, Pull};

pub struct DigitalInputs {
    #[cfg(target_os = "espidf")]
    pins: Vec<PinDriver<'static, AnyIOPin, Input>>,
    #[cfg(not(target_os = "espidf"))]
    sim_bits: u8,
}

impl DigitalInputs {
    #[cfg(target_os = "espidf")]
    pub fn new(pins: [AnyIOPin; 8]) -> Result<Self, esp_idf_svc::sys::EspError> {
        let mut drivers = Vec::with_capacity(8);
        for pin in pins {
            let mut d = PinDriver::input(pin)?;
            d.set_pull(Pull::Up)?;
            drivers.push(d);
        }
        log::info!("DI: 8 inputs on GPIO {:?}", crate::pins::DI_GPIOS);
        Ok(Self { pins: drivers })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self { sim_bits: 0 }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set(&mut self, bits: u8) {
        self.sim_bits = bits;
    }

    /// Active inputs, bit n = DIn.
    pub fn read(&mut self) -> u8 {
        #[cfg(target_os = "espidf")]
        {
            self.pins
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_low())
                .fold(0u8, |bits, (i, _)| bits | (1 << i))
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_bits
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for DigitalInputs {
    fn default() -> Self {
        Self::new()
    }
}

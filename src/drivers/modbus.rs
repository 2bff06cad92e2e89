//! Modbus RTU master over the RS-485 transceiver.
//!
//! Only what the power meter needs: function 0x04 (read input registers)
//! with CRC-16/MODBUS framing.  Frame building and parsing are pure so they
//! run on the host; the half-duplex UART exchange is espidf-only.

use crate::error::SensorError;

pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;

/// Longest register block read in one exchange.
pub const MAX_REGISTERS: usize = 32;

/// Per-exchange response timeout.  Keeps a dead bus well inside one tick.
pub const RESPONSE_TIMEOUT_MS: u32 = 100;

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= u16::from(b);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

pub fn read_input_registers_request(slave: u8, start: u16, count: u16) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = slave;
    frame[1] = FN_READ_INPUT_REGISTERS;
    frame[2..4].copy_from_slice(&start.to_be_bytes());
    frame[4..6].copy_from_slice(&count.to_be_bytes());
    let crc = crc16(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Expected response length for a successful read of `count` registers.
pub const fn response_len(count: usize) -> usize {
    5 + count * 2
}

/// Validate a response frame and unpack its registers into `out`.
pub fn parse_registers(slave: u8, frame: &[u8], out: &mut [u16]) -> Result<(), SensorError> {
    if frame.len() < 5 {
        return Err(SensorError::Timeout);
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    if crc16(body).to_le_bytes() != [crc[0], crc[1]] {
        return Err(SensorError::Crc);
    }
    if body[0] != slave {
        return Err(SensorError::Malformed);
    }
    if body[1] == FN_READ_INPUT_REGISTERS | 0x80 {
        return Err(SensorError::Exception(body[2]));
    }
    if body[1] != FN_READ_INPUT_REGISTERS || usize::from(body[2]) != out.len() * 2 || body.len() != 3 + out.len() * 2 {
        return Err(SensorError::Malformed);
    }
    for (reg, pair) in out.iter_mut().zip(body[3..].chunks_exact(2)) {
        *reg = u16::from_be_bytes([pair[0], pair[1]]);
    }
    Ok(())
}

/// IEEE-754 float from a high-word-first register pair.
pub fn registers_to_f32(hi: u16, lo: u16) -> f32 {
    f32::from_bits((u32::from(hi) << 16) | u32::from(lo))
}

/// A bus that can answer "read input registers".
pub trait RegisterBus {
    fn read_input_registers(&mut self, slave: u8, start: u16, out: &mut [u16]) -> Result<(), SensorError>;
}

// ── Hardware bus ──────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod hw {
    use super::*;
    use esp_idf_svc::hal::delay::TickType;
    use esp_idf_svc::hal::gpio::{AnyOutputPin, Output, PinDriver};
    use esp_idf_svc::hal::uart::UartDriver;

    pub struct Rs485Bus {
        uart: UartDriver<'static>,
        de: PinDriver<'static, AnyOutputPin, Output>,
    }

    impl Rs485Bus {
        pub fn new(uart: UartDriver<'static>, de: PinDriver<'static, AnyOutputPin, Output>) -> Self {
            Self { uart, de }
        }

        fn transmit(&mut self, frame: &[u8]) -> Result<(), SensorError> {
            let _ = self.uart.clear_rx();
            self.de.set_high().map_err(|_| SensorError::Timeout)?;
            let sent = self.uart.write(frame).and_then(|_| self.uart.wait_tx_done(TickType::new_millis(50).ticks()));
            let _ = self.de.set_low();
            sent.map_err(|e| {
                log::warn!("Modbus: tx failed: {}", e);
                SensorError::Timeout
            })
        }

        fn receive(&mut self, buf: &mut [u8]) -> usize {
            let mut filled = 0;
            while filled < buf.len() {
                match self.uart.read(&mut buf[filled..], TickType::new_millis(u64::from(RESPONSE_TIMEOUT_MS)).ticks()) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => filled += n,
                }
                // An exception reply is shorter than the data reply.
                if filled >= 5 && buf[1] & 0x80 != 0 {
                    return 5;
                }
            }
            filled
        }
    }

    impl RegisterBus for Rs485Bus {
        fn read_input_registers(&mut self, slave: u8, start: u16, out: &mut [u16]) -> Result<(), SensorError> {
            if out.len() > MAX_REGISTERS {
                return Err(SensorError::Malformed);
            }
            let request = read_input_registers_request(slave, start, out.len() as u16);
            self.transmit(&request)?;

            let mut buf = [0u8; response_len(MAX_REGISTERS)];
            let want = response_len(out.len());
            let got = self.receive(&mut buf[..want]);
            if got == 0 {
                return Err(SensorError::Timeout);
            }
            parse_registers(slave, &buf[..got], out)
        }
    }
}

#[cfg(target_os = "espidf")]
pub use hw::Rs485Bus;

// ── Simulated bus ─────────────────────────────────────────────

/// Host-side bus answering from a register image.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimBus {
    pub registers: Vec<u16>,
    /// When set, every exchange fails with this error.
    pub fail_with: Option<SensorError>,
    pub exchanges: u32,
}

#[cfg(not(target_os = "espidf"))]
impl SimBus {
    /// Load float values as consecutive high-word-first register pairs.
    pub fn load_floats(&mut self, values: &[f32]) {
        self.registers = values
            .iter()
            .flat_map(|v| {
                let bits = v.to_bits();
                [(bits >> 16) as u16, bits as u16]
            })
            .collect();
    }
}

#[cfg(not(target_os = "espidf"))]
impl RegisterBus for SimBus {
    fn read_input_registers(&mut self, _slave: u8, start: u16, out: &mut [u16]) -> Result<(), SensorError> {
        self.exchanges += 1;
        if let Some(e) = self.fail_with {
            return Err(e);
        }
        let start = usize::from(start);
        let src = self.registers.get(start..start + out.len()).ok_or(SensorError::Exception(0x02))?;
        out.copy_from_slice(src);
        Ok(())
    }
}

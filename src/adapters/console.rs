//! Line-oriented serial console.
//!
//! Bytes are polled without blocking each loop iteration and assembled into
//! lines; CR, LF or CRLF all terminate a line.  Overlong lines are discarded
//! whole rather than truncated into a different command.

use log::warn;

#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::uart::UartDriver;

pub const MAX_LINE: usize = 64;

#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: heapless::String<MAX_LINE>,
    overflowed: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a complete, trimmed, non-empty line.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\r' | b'\n' => {
                let overflowed = core::mem::take(&mut self.overflowed);
                let line = self.buf.trim().to_owned();
                self.buf.clear();
                if overflowed {
                    warn!("Console: line longer than {} bytes dropped", MAX_LINE);
                    return None;
                }
                (!line.is_empty()).then_some(line)
            }
            b if b.is_ascii() && !b.is_ascii_control() => {
                if self.buf.push(b as char).is_err() {
                    self.overflowed = true;
                }
                None
            }
            _ => None,
        }
    }
}

pub struct SerialConsole {
    lines: LineAssembler,
    #[cfg(target_os = "espidf")]
    uart: UartDriver<'static>,
    #[cfg(not(target_os = "espidf"))]
    pub sim_input: std::collections::VecDeque<u8>,
    #[cfg(not(target_os = "espidf"))]
    pub sim_output: String,
}

impl SerialConsole {
    #[cfg(target_os = "espidf")]
    pub fn new(uart: UartDriver<'static>) -> Self {
        Self { lines: LineAssembler::new(), uart }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self { lines: LineAssembler::new(), sim_input: Default::default(), sim_output: String::new() }
    }

    /// Drain whatever has arrived; returns the first complete line.
    pub fn poll_line(&mut self) -> Option<String> {
        loop {
            let byte = self.next_byte()?;
            if let Some(line) = self.lines.push(byte) {
                return Some(line);
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn next_byte(&mut self) -> Option<u8> {
        let mut b = [0u8; 1];
        match self.uart.read(&mut b, esp_idf_svc::hal::delay::NON_BLOCK) {
            Ok(1) => Some(b[0]),
            _ => None,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn next_byte(&mut self) -> Option<u8> {
        self.sim_input.pop_front()
    }

    pub fn reply(&mut self, text: &str) {
        #[cfg(target_os = "espidf")]
        {
            let _ = self.uart.write(text.as_bytes());
            let _ = self.uart.write(b"\r\n");
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_output.push_str(text);
            self.sim_output.push('\n');
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SerialConsole {
    fn default() -> Self {
        Self::new()
    }
}

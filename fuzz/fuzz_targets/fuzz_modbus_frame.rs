//! Fuzz target: `modbus::parse_registers`
//!
//! Feeds arbitrary bytes to the RTU response parser as if they had arrived
//! from the meter.  The first byte picks the register count.
//!
//! Invariants checked:
//! - No panics for any frame length or content
//! - An accepted frame always has a valid CRC and the exact expected length
//!
//! cargo fuzz run fuzz_modbus_frame

#![no_main]

use fieldlink::drivers::modbus::{MAX_REGISTERS, crc16, parse_registers, response_len};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&count, frame)) = data.split_first() else {
        return;
    };
    let count = usize::from(count) % (MAX_REGISTERS + 1);
    let mut regs = [0u16; MAX_REGISTERS];

    if parse_registers(0x01, frame, &mut regs[..count]).is_ok() {
        assert_eq!(frame.len(), response_len(count), "accepted a frame of the wrong length");
        let (body, crc) = frame.split_at(frame.len() - 2);
        assert_eq!(crc16(body).to_le_bytes(), [crc[0], crc[1]], "accepted a bad CRC");
    }
});

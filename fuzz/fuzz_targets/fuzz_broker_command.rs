//! Fuzz target: `commands::parse_broker`
//!
//! Command-topic payloads come straight off the network.  Any byte string
//! that is valid UTF-8 must parse to a command or a typed error.
//!
//! cargo fuzz run fuzz_broker_command

#![no_main]

use fieldlink::app::commands::{Command, parse_broker};
use fieldlink::config::MQTT_MAX_PAYLOAD;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() >= MQTT_MAX_PAYLOAD {
        return;
    }
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(Command::UpdateFirmware { url: Some(url) }) = parse_broker(text) {
        assert!(!url.is_empty(), "empty firmware url must be normalised to None");
    }
});

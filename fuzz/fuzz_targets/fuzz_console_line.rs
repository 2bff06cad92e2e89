//! Fuzz target: console line assembly and parsing
//!
//! Pushes raw UART bytes through `LineAssembler` and parses every completed
//! line.  Lines must stay within `MAX_LINE` and `DOx` overrides must name a
//! real channel.
//!
//! cargo fuzz run fuzz_console_line

#![no_main]

use fieldlink::adapters::console::{LineAssembler, MAX_LINE};
use fieldlink::app::commands::{Command, parse_console};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut asm = LineAssembler::new();
    for &b in data {
        let Some(line) = asm.push(b) else {
            continue;
        };
        assert!(line.len() <= MAX_LINE, "line exceeds MAX_LINE");
        if let Ok(Command::SetOutput { channel, .. }) = parse_console(&line) {
            assert!(channel < 8, "override channel {channel} out of range");
        }
    }
});

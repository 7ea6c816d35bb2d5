#![no_main]

use libfuzzer_sys::fuzz_target;
use log2console_receivers::parser::serilog;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let msg = serilog::parse_or_degrade(text, "Fuzz");
        assert!(!msg.logger_name.is_empty());
    }
});

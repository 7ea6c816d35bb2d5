#![no_main]

use libfuzzer_sys::fuzz_target;
use log2console_receivers::parser::log4j;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let msg = log4j::parse_or_degrade(&text, "Fuzz");
    assert!(!msg.logger_name.is_empty());
});

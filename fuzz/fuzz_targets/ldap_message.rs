#![no_main]
use ldapd::parse_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = parse_message(data) {
        let _ = raw.parse_operation();
    }
});

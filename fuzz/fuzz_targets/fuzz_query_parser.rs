#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        // Parsing must never panic, and accepted names must translate
        if let Ok(d) = search_provider::query::parse(s) {
            let plan = search_provider::query::translate(&d, "ds_id");
            let _ = plan.to_string();
        }
    }
});

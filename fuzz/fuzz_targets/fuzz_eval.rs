#![no_main]
use libfuzzer_sys::fuzz_target;
use search_provider::query::{CompiledPlan, parse, translate};

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(d) = parse(s) {
            let plan = translate(&d, "ds_id");
            let Ok(compiled) = CompiledPlan::new(&plan) else { return };
            // A few records to exercise nested paths, type ranks and missing fields
            let rows = [
                serde_json::json!({"ds_id": "a", "x": 1, "name": "x"}),
                serde_json::json!({"ds_id": "b", "x": 10.5, "nested": {"z": [3, {"w": true}]}}),
                serde_json::json!({"ds_id": 7, "active": null}),
            ];
            let _ = compiled.run(rows.iter());
        }
    }
});

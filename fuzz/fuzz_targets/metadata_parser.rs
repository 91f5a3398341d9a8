#![no_main]

use libfuzzer_sys::fuzz_target;
use narps_stats::data::TeamRecord;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Malformed tables must come back as errors, never panics
        if let Ok(records) = TeamRecord::parse_str(input) {
            for r in &records {
                assert!((1..=9).contains(&r.hypothesis));
            }
        }
    }
});

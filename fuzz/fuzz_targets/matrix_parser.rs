#![no_main]

use libfuzzer_sys::fuzz_target;
use narps_stats::data::DelimitedTable;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = DelimitedTable::parse_matrix(input);
    }
});

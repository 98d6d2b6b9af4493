#![no_main]

use libfuzzer_sys::fuzz_target;
use perfc_trace::event::IntervalMarker;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Label must always be a substring of the attribute name
        if let Some(marker) = IntervalMarker::parse(input) {
            assert!(input.contains(marker.label));
        }
    }
});

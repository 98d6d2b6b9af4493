#![no_main]

use libfuzzer_sys::fuzz_target;
use perfc_trace::store::FnTagPattern;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // First line is the pattern, the rest a candidate fn_tag
        let (pattern, tag) = input.split_once('\n').unwrap_or((input, input));
        if let Ok(p) = FnTagPattern::new(pattern) {
            let _ = p.matches(tag);
            let _ = p.is_exact();
        }
    }
});

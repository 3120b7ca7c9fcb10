#![no_main]

use calltrace::filter::FileFilter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // First line is the path, the rest are patterns
        let mut lines = input.lines();
        let path = lines.next().unwrap_or_default();
        let patterns: Vec<&str> = lines.collect();
        if let Ok(filter) = FileFilter::new(&patterns) {
            let _ = filter.matches(path);
        }
    }
});

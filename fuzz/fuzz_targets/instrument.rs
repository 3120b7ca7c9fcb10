#![no_main]

use calltrace::ast::Ast;
use calltrace::error::InstrumentError;
use calltrace::injector::{instrument, InjectOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        if Ast::parse("fuzz.js", source).is_err() {
            return;
        }
        // Anything that parses must still parse after rewriting
        match instrument("fuzz.js", source, &InjectOptions::default()) {
            Ok(result) => assert_eq!(result.code.lines().count(), source.lines().count()),
            Err(InstrumentError::InvalidRewrite { line, column, .. }) => {
                panic!("rewrite broke the module at {line}:{column}")
            }
            Err(_) => {}
        }
    }
});

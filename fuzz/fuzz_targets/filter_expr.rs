#![no_main]

use libfuzzer_sys::fuzz_target;
use tracemodel::filter::FilterExpr;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = FilterExpr::from_expr(input);
    }
});

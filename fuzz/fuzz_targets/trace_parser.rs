#![no_main]

use libfuzzer_sys::fuzz_target;
use tracemodel::{ModelConfig, PerformanceModel};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Any document that parses must also build without panicking
        let mut model = PerformanceModel::new(ModelConfig::default());
        if model.add_trace_json(input).is_ok() {
            let _ = model.tracing_complete();
        }
    }
});

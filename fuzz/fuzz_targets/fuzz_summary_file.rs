//! Fuzz target for summary record decoding.
//!
//! The file may be left behind by an older or crashed process, so decoding
//! must never panic, and derived metrics of any decoded record must be
//! computable.

#![no_main]

use libfuzzer_sys::fuzz_target;
use qs_telemetry::summary_file::{decode_record, RECORD_SIZE};

fuzz_target!(|data: &[u8]| {
    for chunk in data.chunks(RECORD_SIZE) {
        if let Ok(summary) = decode_record(chunk) {
            let _ = summary.standard_deviation();
            let _ = summary.sigma4_deviation();
            let _ = summary.create_time();
            let _ = summary.exit_time();
        }
    }
});

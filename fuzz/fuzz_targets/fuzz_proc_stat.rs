//! Fuzz target for /proc/[pid]/stat parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use qs_core::collect::procfs::{parse_stat_comm, parse_stat_content};

fuzz_target!(|data: &str| {
    if let Some(fields) = parse_stat_content(data) {
        let _ = fields.is_dead();
    }
    let _ = parse_stat_comm(data);
});

//! Fuzz target for config.toml parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use qs_core::config::QuietConfig;

fuzz_target!(|data: &str| {
    if let Ok(config) = QuietConfig::from_toml_str(data) {
        let _ = config.validate();
    }
});

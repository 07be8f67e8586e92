//! Fuzz target for solver configuration parsing.
//!
//! Arbitrary JSON or TOML must parse to an error or a config that
//! validation can judge, never a panic.

#![no_main]

use amdp_config::{validate_config, SolverConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = serde_json::from_slice::<SolverConfig>(data) {
        let _ = validate_config(&config);
    }
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = SolverConfig::parse_toml(text) {
            let _ = validate_config(&config);
        }
    }
});

//! Fuzz target for explicit model files.
//!
//! A model that passes validation must also convert to dense tables and,
//! when its rows are full distributions, to an environment.

#![no_main]

use amdp_core::{ExplicitModel, TabularEnv};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(model) = serde_json::from_slice::<ExplicitModel>(data) else {
        return;
    };
    // Keep allocations bounded.
    if model.state_size > 64 || model.action_size > 64 {
        return;
    }
    if model.validate().is_err() {
        return;
    }
    let _ = model.dense_rewards();
    let _ = model.dense_values();
    if model.dense_transitions().is_ok() {
        let _ = TabularEnv::from_model(&model, Some(0));
    }
});

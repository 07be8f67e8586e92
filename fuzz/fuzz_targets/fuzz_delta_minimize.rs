//! Fuzz target for worst-case redistribution.
//!
//! Whenever `delta_minimize` accepts its input, the result must be a
//! distribution on the nominal support that respects the `1/alpha` cap.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    weights: Vec<u16>,
    values: Vec<f64>,
    alpha_raw: u16,
}

fuzz_target!(|input: Input| {
    let n = input.weights.len().min(input.values.len()).min(32);
    let total: f64 = input.weights[..n].iter().map(|&w| f64::from(w)).sum();
    if n == 0 || total == 0.0 {
        return;
    }
    let probs: Vec<f64> = input.weights[..n]
        .iter()
        .map(|&w| f64::from(w) / total)
        .collect();
    let values = &input.values[..n];
    let alpha = (f64::from(input.alpha_raw) + 1.0) / 65536.0;

    let Ok(perturbed) = amdp_math::delta_minimize(&probs, values, alpha) else {
        return;
    };
    assert_eq!(perturbed.len(), n);
    let sum: f64 = perturbed.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6, "mass {}", sum);
    for (&p, &q) in probs.iter().zip(&perturbed) {
        if p == 0.0 {
            assert_eq!(q, 0.0);
        }
        assert!(q >= 0.0 && q <= p / alpha + 1e-9);
    }
});

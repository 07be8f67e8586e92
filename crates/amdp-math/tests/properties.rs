//! Property-based tests for the worst-case redistribution procedure.
//!
//! Uses proptest to check that the output is a distribution inside the budget
//! box, that it never beats the nominal expectation, and that it matches the
//! fill-the-worst-first optimum.

use amdp_math::{delta_minimize, expectation, RedistributionError};
use proptest::prelude::*;

/// Tolerance for floating point comparisons.
const TOL: f64 = 1e-9;

/// A normalized distribution with 1..=8 outcomes, paired with outcome values.
fn distribution_strategy() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    (1usize..=8).prop_flat_map(|n| {
        (
            prop::collection::vec(0.0f64..1.0, n),
            prop::collection::vec(-50.0f64..50.0, n),
        )
            .prop_map(|(raw, values)| {
                let sum: f64 = raw.iter().sum();
                let probs = if sum <= 1e-9 {
                    vec![1.0 / raw.len() as f64; raw.len()]
                } else {
                    raw.iter().map(|p| p / sum).collect()
                };
                (probs, values)
            })
    })
}

/// Worst-case expectation by filling the lowest values first, each up to `p / alpha`.
fn greedy_optimum(probs: &[f64], values: &[f64], alpha: f64) -> f64 {
    let mut order: Vec<usize> = (0..probs.len()).filter(|&i| probs[i] > 0.0).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut remaining = 1.0;
    let mut total = 0.0;
    for i in order {
        if remaining <= 0.0 {
            break;
        }
        let mass = (probs[i] / alpha).min(remaining);
        total += mass * values[i];
        remaining -= mass;
    }
    total
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// The result is a probability distribution.
    #[test]
    fn output_sums_to_one((probs, values) in distribution_strategy(), alpha in 0.01f64..=1.0) {
        let out = delta_minimize(&probs, &values, alpha).unwrap();
        let sum: f64 = out.iter().sum();
        prop_assert!((sum - 1.0).abs() <= TOL, "sum={} probs={:?} values={:?} alpha={}", sum, probs, values, alpha);
        for p in &out {
            prop_assert!(*p >= -TOL, "negative probability {}", p);
        }
    }

    /// No outcome is scaled beyond 1/alpha, and empty outcomes stay empty.
    #[test]
    fn output_respects_budget((probs, values) in distribution_strategy(), alpha in 0.01f64..=1.0) {
        let out = delta_minimize(&probs, &values, alpha).unwrap();
        for (p, q) in probs.iter().zip(&out) {
            prop_assert!(*q <= p / alpha + TOL, "p={} q={} alpha={}", p, q, alpha);
            if *p == 0.0 {
                prop_assert_eq!(*q, 0.0);
            }
        }
    }

    /// The adversary can only lower the expectation.
    #[test]
    fn expectation_never_increases((probs, values) in distribution_strategy(), alpha in 0.01f64..=1.0) {
        let out = delta_minimize(&probs, &values, alpha).unwrap();
        let nominal = expectation(&probs, &values);
        let robust = expectation(&out, &values);
        prop_assert!(robust <= nominal + 1e-7, "robust={} nominal={}", robust, nominal);
    }

    /// The result attains the worst expectation over the whole budget box.
    #[test]
    fn expectation_is_the_worst_case((probs, values) in distribution_strategy(), alpha in 0.01f64..=1.0) {
        let out = delta_minimize(&probs, &values, alpha).unwrap();
        let robust = expectation(&out, &values);
        let optimum = greedy_optimum(&probs, &values, alpha);
        prop_assert!((robust - optimum).abs() <= 1e-6, "robust={} optimum={} probs={:?} values={:?} alpha={}", robust, optimum, probs, values, alpha);
    }

    /// Every output entry is a probability.
    #[test]
    fn output_entries_within_unit_interval((probs, values) in distribution_strategy(), alpha in 0.01f64..=1.0) {
        let out = delta_minimize(&probs, &values, alpha).unwrap();
        for q in &out {
            prop_assert!((0.0..=1.0).contains(q), "entry {} in {:?}", q, out);
        }
    }

    /// A tighter budget (smaller alpha) is at least as pessimistic.
    #[test]
    fn smaller_budget_is_more_pessimistic(
        (probs, values) in distribution_strategy(),
        a in 0.01f64..=1.0,
        b in 0.01f64..=1.0,
    ) {
        let (tight, loose) = if a <= b { (a, b) } else { (b, a) };
        let e_tight = expectation(&delta_minimize(&probs, &values, tight).unwrap(), &values);
        let e_loose = expectation(&delta_minimize(&probs, &values, loose).unwrap(), &values);
        prop_assert!(e_tight <= e_loose + 1e-7, "tight={} loose={}", e_tight, e_loose);
    }

    /// Out-of-range budgets are rejected at entry.
    #[test]
    fn invalid_budget_rejected(alpha in prop_oneof![-10.0f64..=0.0, 1.0001f64..10.0]) {
        let result = delta_minimize(&[1.0], &[0.0], alpha);
        let is_invalid_budget = matches!(result, Err(RedistributionError::InvalidBudget { .. }));
        prop_assert!(is_invalid_budget);
    }
}

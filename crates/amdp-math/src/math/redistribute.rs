//! Worst-case redistribution of a discrete distribution under a likelihood-ratio budget.
//!
//! Given a nominal distribution `p` over successor outcomes with values `v`, an
//! adversary may rescale every outcome's probability by a factor
//! `delta_i ∈ [0, 1/α]` as long as the result is still a distribution:
//!
//! ```text
//! min_delta  Σ_i delta_i · p_i · v_i
//! s.t.       Σ_i delta_i · p_i = 1,   0 ≤ delta_i ≤ 1/α
//! ```
//!
//! This is the inner problem of the iterated CVaR (ICVaR) Bellman operator.
//! Because the constraint set is a box intersected with one hyperplane, the
//! optimum has a closed form: push the worst outcomes to their cap `1/α`, empty
//! the best outcomes, and let a single "marginal" outcome absorb the remainder.
//! [`delta_minimize`] reaches it with one greedy pass after a sort.

use thiserror::Error;

/// Tolerance on the total mass of the input distribution.
pub const MASS_TOLERANCE: f64 = 1e-6;

/// Errors raised by the redistribution procedure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RedistributionError {
    #[error("empty distribution")]
    Empty,
    #[error("length mismatch: {probs} probabilities, {values} values")]
    LengthMismatch { probs: usize, values: usize },
    #[error("invalid perturbation budget: alpha must be in (0, 1], got {alpha}")]
    InvalidBudget { alpha: f64 },
    #[error("invalid probability at index {index}: {value}")]
    InvalidProbability { index: usize, value: f64 },
    #[error("probabilities must sum to 1, got {sum}")]
    MassMismatch { sum: f64 },
    #[error("non-finite value at index {index}: {value}")]
    NonFiniteValue { index: usize, value: f64 },
}

/// Check that a perturbation budget lies in `(0, 1]`.
pub fn validate_budget(alpha: f64) -> Result<(), RedistributionError> {
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(RedistributionError::InvalidBudget { alpha });
    }
    Ok(())
}

/// Compute the worst-case distribution reachable from `probs` under budget `alpha`.
///
/// Returns the perturbed probabilities `delta_i · probs_i` in the original order.
/// The result sums to 1, never scales an entry by more than `1/alpha`, and
/// minimizes the expectation of `values` among all such distributions.
///
/// Entries with zero probability stay at zero.
///
/// # Arguments
/// * `probs` - Nominal distribution (must sum to 1 within [`MASS_TOLERANCE`])
/// * `values` - Downstream value of each outcome (lower is worse)
/// * `alpha` - Perturbation budget in `(0, 1]`; `1/alpha` is the largest allowed factor
pub fn delta_minimize(
    probs: &[f64],
    values: &[f64],
    alpha: f64,
) -> Result<Vec<f64>, RedistributionError> {
    validate_budget(alpha)?;
    if probs.is_empty() {
        return Err(RedistributionError::Empty);
    }
    if probs.len() != values.len() {
        return Err(RedistributionError::LengthMismatch {
            probs: probs.len(),
            values: values.len(),
        });
    }
    for (index, &value) in probs.iter().enumerate() {
        if !value.is_finite() || value < 0.0 {
            return Err(RedistributionError::InvalidProbability { index, value });
        }
    }
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(RedistributionError::NonFiniteValue { index, value });
        }
    }
    let total: f64 = probs.iter().sum();
    if (total - 1.0).abs() > MASS_TOLERANCE {
        return Err(RedistributionError::MassMismatch { sum: total });
    }

    let max_factor = 1.0 / alpha;

    // Worst outcomes first. The sort is stable, so ties keep their input order.
    let mut order: Vec<usize> = (0..probs.len()).filter(|&i| probs[i] > 0.0).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut delta = vec![1.0; probs.len()];
    let mut mass = total;
    let mut last_raised: Option<usize> = None;
    let mut last_lowered: Option<usize> = None;

    // Raise from the bottom while the mass allows it, empty from the top otherwise.
    let (mut lo, mut hi) = (0, order.len());
    while lo < hi {
        if mass <= 1.0 {
            let i = order[lo];
            delta[i] = max_factor;
            mass += probs[i] * (max_factor - 1.0);
            last_raised = Some(i);
            lo += 1;
        } else {
            hi -= 1;
            let i = order[hi];
            delta[i] = 0.0;
            mass -= probs[i];
            last_lowered = Some(i);
        }
    }

    let mut out: Vec<f64> = probs.iter().zip(&delta).map(|(p, d)| p * d).collect();

    // The last change over- or undershoots; the marginal outcome takes up the
    // slack. Its mass is written directly so the total is 1 up to one rounding.
    let marginal = if mass < 1.0 {
        last_lowered.or(last_raised)
    } else {
        last_raised.or(last_lowered)
    };
    if let Some(i) = marginal {
        let others: f64 = out
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, &q)| q)
            .sum();
        out[i] = 1.0 - others;
    }
    for (q, &p) in out.iter_mut().zip(probs) {
        *q = q.clamp(0.0, (p * max_factor).min(1.0));
    }

    Ok(out)
}

/// Expectation of `values` under `probs`.
pub fn expectation(probs: &[f64], values: &[f64]) -> f64 {
    probs.iter().zip(values).map(|(p, v)| p * v).sum()
}

//! Post-processing of learned tables: transition pruning and reward biasing.
//!
//! The Laplace prior leaves a little mass on every successor, including ones
//! never observed. Pruning removes entries below `min(1/|S|, cap)` and
//! renormalizes; biasing folds measurement cost and optional self-loop and
//! terminal penalties into the reward table used by cost-aware planners.

use ndarray::{s, Array2, Array3, Axis};

use super::LearnerError;

/// Pruning threshold for a model with `state_size` states.
pub fn filter_threshold(state_size: usize, cap: f64) -> f64 {
    (1.0 / state_size as f64).min(cap)
}

/// Zero every transition below `threshold` and renormalize each row.
///
/// Applying this twice yields the same table as applying it once, because
/// renormalization only raises the surviving entries. A row left without
/// mass is a [`LearnerError::DegenerateRow`].
pub fn filter_transitions(transitions: &mut Array3<f64>, threshold: f64) -> Result<(), LearnerError> {
    let (states, actions, _) = transitions.dim();
    for state in 0..states {
        for action in 0..actions {
            let mut row = transitions.slice_mut(s![state, action, ..]);
            row.mapv_inplace(|p| if p < threshold { 0.0 } else { p });
            let mass = row.sum();
            if !(mass > 0.0) || !mass.is_finite() {
                return Err(LearnerError::DegenerateRow { state, action });
            }
            row /= mass;
        }
    }
    Ok(())
}

/// Penalty weights folded into biased rewards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// Cost charged by measuring actions.
    pub measure_cost: f64,
    /// Multiplier applied to `measure_cost`.
    pub measurement_cost_weight: f64,
    pub self_loop_penalty: f64,
    pub terminal_penalty: f64,
}

/// `R_biased[s,a] = R[s,a] - c·[a measures] - T[s,a,s]·loop - T[s,a,done]·terminal`.
///
/// Measuring actions are the first `physical_actions` columns.
pub fn biased_rewards(
    rewards: &Array2<f64>,
    transitions: &Array3<f64>,
    physical_actions: usize,
    weights: CostWeights,
) -> Array2<f64> {
    let done = rewards.nrows() - 1;
    let measure = weights.measure_cost * weights.measurement_cost_weight;

    let mut biased = rewards.clone();
    for ((state, action), value) in biased.indexed_iter_mut() {
        let row = transitions.index_axis(Axis(0), state);
        let self_prob = row[[action, state]];
        let done_prob = row[[action, done]];
        if action < physical_actions {
            *value -= measure;
        }
        *value -= self_prob * weights.self_loop_penalty + done_prob * weights.terminal_penalty;
    }
    biased
}

//! Table-driven environment.
//!
//! Successors are drawn from an explicit transition tensor `P[s, a, s']` and
//! rewards read from `R[s, a]`. The last state index is the terminal state:
//! stepping into it ends the episode, and it is never reported as a native
//! state by [`Environment::vars`].

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use super::{EnvVars, Environment, Measurement, StepOutcome};
use crate::model::ExplicitModel;

/// Mass tolerance for transition rows.
const ROW_TOLERANCE: f64 = 1e-6;

/// Errors raised while building a [`TabularEnv`].
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment needs at least one native state and one action, got shape {states}x{actions}")]
    Empty { states: usize, actions: usize },

    #[error("transition table shape {transitions:?} does not match reward table shape {rewards:?}")]
    ShapeMismatch {
        transitions: [usize; 3],
        rewards: [usize; 2],
    },

    #[error("transition row ({state}, {action}) sums to {sum}, expected 1")]
    RowMass { state: usize, action: usize, sum: f64 },

    #[error("invalid transition probability at ({state}, {action}, {next}): {value}")]
    InvalidProbability {
        state: usize,
        action: usize,
        next: usize,
        value: f64,
    },

    #[error("initial state {state} is not a native state (have {state_count})")]
    InitialState { state: usize, state_count: usize },

    #[error("measurement cost must be finite, got {0}")]
    MeasureCost(f64),

    #[error("model error: {0}")]
    Model(String),
}

/// An [`Environment`] backed by explicit transition and reward tables.
#[derive(Debug, Clone)]
pub struct TabularEnv {
    transitions: Array3<f64>,
    rewards: Array2<f64>,
    measure_cost: f64,
    initial_state: usize,
    current: usize,
    rng: StdRng,
}

impl TabularEnv {
    /// Build an environment from `P[s, a, s']` and `R[s, a]`.
    ///
    /// Both tables include the terminal state as their last state index.
    pub fn new(
        transitions: Array3<f64>,
        rewards: Array2<f64>,
        measure_cost: f64,
        initial_state: usize,
        seed: Option<u64>,
    ) -> Result<Self, EnvError> {
        let (states, actions, next_states) = transitions.dim();
        if states < 2 || actions == 0 {
            return Err(EnvError::Empty { states, actions });
        }
        if next_states != states || rewards.dim() != (states, actions) {
            return Err(EnvError::ShapeMismatch {
                transitions: [states, actions, next_states],
                rewards: [rewards.nrows(), rewards.ncols()],
            });
        }
        if !measure_cost.is_finite() {
            return Err(EnvError::MeasureCost(measure_cost));
        }
        if initial_state >= states - 1 {
            return Err(EnvError::InitialState {
                state: initial_state,
                state_count: states - 1,
            });
        }

        for state in 0..states {
            for action in 0..actions {
                let row = transitions.slice(ndarray::s![state, action, ..]);
                for (next, &value) in row.iter().enumerate() {
                    if !value.is_finite() || value < 0.0 {
                        return Err(EnvError::InvalidProbability {
                            state,
                            action,
                            next,
                            value,
                        });
                    }
                }
                let sum = row.sum();
                // The terminal row is never sampled and may be left empty.
                let terminal_empty = state == states - 1 && sum == 0.0;
                if !terminal_empty && (sum - 1.0).abs() > ROW_TOLERANCE {
                    return Err(EnvError::RowMass { state, action, sum });
                }
            }
        }

        Ok(Self {
            transitions,
            rewards,
            measure_cost,
            initial_state,
            current: initial_state,
            rng: crate::seeded_rng(seed),
        })
    }

    /// Build an environment from a persisted model's `P` and `R`.
    pub fn from_model(model: &ExplicitModel, seed: Option<u64>) -> Result<Self, EnvError> {
        let transitions = model
            .dense_transitions()
            .map_err(|e| EnvError::Model(e.to_string()))?;
        let rewards = model
            .dense_rewards()
            .map_err(|e| EnvError::Model(e.to_string()))?;
        Self::new(
            transitions,
            rewards,
            model.measure_cost,
            model.s_init,
            seed,
        )
    }

    /// A deterministic environment: action `a` in state `s` always leads to
    /// `successors[s][a]` and pays `rewards[s][a]`.
    ///
    /// `successors` covers native states only; a successor equal to the number
    /// of native states is the terminal state.
    pub fn deterministic(
        successors: &[Vec<usize>],
        rewards: &[Vec<f64>],
        measure_cost: f64,
        initial_state: usize,
        seed: Option<u64>,
    ) -> Result<Self, EnvError> {
        let native = successors.len();
        let actions = successors.first().map_or(0, Vec::len);
        if native == 0 || actions == 0 {
            return Err(EnvError::Empty {
                states: native,
                actions,
            });
        }
        let states = native + 1;
        let mut p = Array3::<f64>::zeros((states, actions, states));
        let mut r = Array2::<f64>::zeros((states, actions));

        for (s, row) in successors.iter().enumerate() {
            let reward_row = rewards.get(s).map(Vec::as_slice).unwrap_or(&[]);
            if row.len() != actions || reward_row.len() != actions {
                return Err(EnvError::ShapeMismatch {
                    transitions: [native, row.len(), states],
                    rewards: [rewards.len(), reward_row.len()],
                });
            }
            for (a, &next) in row.iter().enumerate() {
                if next >= states {
                    return Err(EnvError::InvalidProbability {
                        state: s,
                        action: a,
                        next,
                        value: 1.0,
                    });
                }
                p[[s, a, next]] = 1.0;
                r[[s, a]] = reward_row[a];
            }
        }
        for a in 0..actions {
            p[[native, a, native]] = 1.0;
        }

        Self::new(p, r, measure_cost, initial_state, seed)
    }

    /// Index of the terminal state.
    pub fn terminal_state(&self) -> usize {
        self.transitions.dim().0 - 1
    }

    /// The true transition tensor.
    pub fn transitions(&self) -> &Array3<f64> {
        &self.transitions
    }

    /// The true reward table.
    pub fn rewards(&self) -> &Array2<f64> {
        &self.rewards
    }
}

impl Environment for TabularEnv {
    fn reset(&mut self) {
        self.current = self.initial_state;
    }

    fn step(&mut self, action: usize) -> StepOutcome {
        let actions = self.rewards.ncols();
        assert!(
            action < actions,
            "action {action} out of range for an environment with {actions} actions"
        );
        let terminal = self.terminal_state();
        if self.current == terminal {
            return StepOutcome {
                reward: 0.0,
                done: true,
            };
        }

        let reward = self.rewards[[self.current, action]];
        let u: f64 = self.rng.random();
        let row = self.transitions.slice(ndarray::s![self.current, action, ..]);
        // Rows were validated at construction, so a positive entry exists.
        let next = amdp_math::sample_index(row.iter(), u).unwrap_or(terminal);
        self.current = next;

        StepOutcome {
            reward,
            done: next == terminal,
        }
    }

    fn measure(&mut self) -> Measurement {
        Measurement {
            state: self.current,
            cost: self.measure_cost,
        }
    }

    fn vars(&self) -> EnvVars {
        EnvVars {
            state_count: self.terminal_state(),
            action_count: self.rewards.ncols(),
            measure_cost: self.measure_cost,
            initial_state: self.initial_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> TabularEnv {
        // 0 -a0-> 1 -a0-> terminal; a1 stays put.
        TabularEnv::deterministic(
            &[vec![1, 0], vec![2, 1]],
            &[vec![0.0, -1.0], vec![1.0, -1.0]],
            0.25,
            0,
            Some(7),
        )
        .unwrap()
    }

    #[test]
    fn vars_exclude_terminal() {
        let env = chain();
        let vars = env.vars();
        assert_eq!(vars.state_count, 2);
        assert_eq!(vars.action_count, 2);
        assert_eq!(vars.initial_state, 0);
        assert!((vars.measure_cost - 0.25).abs() < 1e-12);
    }

    #[test]
    fn deterministic_walk_reaches_terminal() {
        let mut env = chain();
        env.reset();
        assert_eq!(env.measure().state, 0);

        let out = env.step(0);
        assert!(!out.done);
        assert_eq!(env.measure().state, 1);

        let out = env.step(0);
        assert!(out.done);
        assert!((out.reward - 1.0).abs() < 1e-12);

        let out = env.step(1);
        assert!(out.done);
        assert_eq!(out.reward, 0.0);

        env.reset();
        assert_eq!(env.measure().state, 0);
    }

    #[test]
    fn last_action_is_in_range() {
        let mut env = chain();
        env.reset();
        let out = env.step(1);
        assert!(!out.done);
        assert_eq!(env.measure().state, 0);
        assert!((out.reward + 1.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "action 3 out of range")]
    fn out_of_range_action_panics() {
        let mut env = chain();
        env.reset();
        env.step(3);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_action_panics_in_terminal_state() {
        let mut env = chain();
        env.reset();
        env.step(0);
        env.step(0);
        env.step(2);
    }

    #[test]
    fn stochastic_rows_are_sampled_by_seed() {
        let mut p = Array3::<f64>::zeros((3, 1, 3));
        p[[0, 0, 0]] = 0.5;
        p[[0, 0, 1]] = 0.5;
        p[[1, 0, 2]] = 1.0;
        p[[2, 0, 2]] = 1.0;
        let r = Array2::<f64>::zeros((3, 1));

        let trace = |seed| {
            let mut env = TabularEnv::new(p.clone(), r.clone(), 0.0, 0, Some(seed)).unwrap();
            (0..32)
                .map(|_| {
                    env.reset();
                    env.step(0);
                    env.measure().state
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(trace(3), trace(3));
        assert!(trace(3).contains(&0));
        assert!(trace(3).contains(&1));
    }

    #[test]
    fn rejects_bad_rows() {
        let mut p = Array3::<f64>::zeros((2, 1, 2));
        p[[0, 0, 0]] = 0.4;
        let r = Array2::<f64>::zeros((2, 1));
        let err = TabularEnv::new(p, r, 0.0, 0, None).unwrap_err();
        assert!(matches!(err, EnvError::RowMass { state: 0, action: 0, .. }));
    }

    #[test]
    fn rejects_terminal_initial_state() {
        let err = TabularEnv::deterministic(&[vec![1]], &[vec![0.0]], 0.0, 1, None).unwrap_err();
        assert!(matches!(err, EnvError::InitialState { state: 1, .. }));
    }

    #[test]
    fn rejects_mismatched_tables() {
        let p = Array3::<f64>::zeros((3, 2, 3));
        let r = Array2::<f64>::zeros((3, 1));
        assert!(matches!(
            TabularEnv::new(p, r, 0.0, 0, None),
            Err(EnvError::ShapeMismatch { .. })
        ));
    }
}

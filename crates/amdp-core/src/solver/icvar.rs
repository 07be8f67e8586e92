//! Iterated CVaR (ICVaR) value iteration.
//!
//! Alongside the nominal Bellman solution `Q`, the solver maintains a robust
//! value `ICVaR` in which an adversary may rescale each successor probability
//! by a factor in `[0, 1/α]`:
//!
//! ```text
//! Q[s,a]     = R[s,a] + γ · Σ_s' P[s,a,s']  · Q_max[s']
//! ICVaR[s,a] = R[s,a] + γ · Σ_s' ΔP[s,a,s'] · ICVaR_max[s']
//! ΔP[s,a,·]  = argmin over the budget of the expected ICVaR_max
//! ```
//!
//! Backups are asynchronous (Gauss-Seidel): a sweep visits every state once,
//! picks an action epsilon-greedily on `ICVaR`, and updates that single pair
//! in place, so later backups in the same sweep read values written earlier.
//!
//! # Soundness
//!
//! `Q` and `ICVaR` start equal and the adversary can only lower an
//! expectation, so `ICVaR_max[s] ≤ Q_max[s]` holds after every backup.

use amdp_config::{IcvarConfig, SolverConfig, SweepMode};
use amdp_math::{delta_minimize, RedistributionError};
use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::env::Environment;
use crate::logging::event_names;
use crate::learner::{LearnedModel, LearnerError, ModelDims, ModelLearner, SamplingReport};

/// Mass tolerance for supplied transition rows.
const ROW_TOLERANCE: f64 = 1e-6;

/// Errors raised by the ICVaR solver.
#[derive(Debug, Error)]
pub enum IcvarError {
    #[error("invalid perturbation budget: alpha must be in (0, 1], got {alpha}")]
    InvalidBudget { alpha: f64 },

    #[error("invalid exploration epsilon: must be in [0, 1], got {epsilon}")]
    InvalidEpsilon { epsilon: f64 },

    #[error("invalid discount factor: must be in [0, 1), got {discount}")]
    InvalidDiscount { discount: f64 },

    #[error("{table} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        table: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("transition row ({state}, {action}) sums to {sum}, expected 1")]
    RowMass { state: usize, action: usize, sum: f64 },

    #[error("model learning failed: {0}")]
    Learner(#[from] LearnerError),

    #[error("redistribution failed at ({state}, {action}): {source}")]
    Redistribution {
        state: usize,
        action: usize,
        #[source]
        source: RedistributionError,
    },
}

/// Summary of a [`IcvarSolver::solve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    /// Number of sweeps performed.
    pub sweeps: usize,
    /// Largest absolute ICVaR change during the last sweep.
    pub final_residual: f64,
}

/// Robust value iteration over a tabular model.
#[derive(Debug, Clone)]
pub struct IcvarSolver {
    config: IcvarConfig,
    dims: ModelDims,
    p: Array3<f64>,
    r: Array2<f64>,
    q: Array2<f64>,
    q_max: Array1<f64>,
    icvar: Array2<f64>,
    icvar_max: Array1<f64>,
    delta_p: Array3<f64>,
    rng: StdRng,
}

impl IcvarSolver {
    /// Set up a solver over supplied `P[s, a, s']` and `R[s, a]`.
    ///
    /// The last state is the done state. Values start at zero and `ΔP` at `P`.
    pub fn new(
        p: Array3<f64>,
        r: Array2<f64>,
        config: IcvarConfig,
        seed: Option<u64>,
    ) -> Result<Self, IcvarError> {
        validate_parameters(&config)?;

        let (states, actions, next_states) = p.dim();
        if states == 0 || actions == 0 || next_states != states {
            return Err(IcvarError::ShapeMismatch {
                table: "P",
                expected: vec![states.max(1), actions.max(1), states.max(1)],
                actual: vec![states, actions, next_states],
            });
        }
        if r.dim() != (states, actions) {
            return Err(IcvarError::ShapeMismatch {
                table: "R",
                expected: vec![states, actions],
                actual: vec![r.nrows(), r.ncols()],
            });
        }
        for state in 0..states {
            for action in 0..actions {
                let row = p.slice(s![state, action, ..]);
                let sum = row.sum();
                let valid = row.iter().all(|&v| v.is_finite() && v >= 0.0);
                if !valid || (sum - 1.0).abs() > ROW_TOLERANCE {
                    return Err(IcvarError::RowMass { state, action, sum });
                }
            }
        }

        let dims = ModelDims {
            state_size: states,
            physical_actions: actions,
            measure_cost: 0.0,
            initial_state: 0,
        };
        Ok(Self {
            config,
            dims,
            delta_p: p.clone(),
            q: Array2::zeros((states, actions)),
            q_max: Array1::zeros(states),
            icvar: Array2::zeros((states, actions)),
            icvar_max: Array1::zeros(states),
            p,
            r,
            rng: crate::seeded_rng(seed),
        })
    }

    /// Record where the model came from, for export.
    pub fn with_origin(mut self, measure_cost: f64, initial_state: usize) -> Self {
        self.dims.measure_cost = measure_cost;
        self.dims.initial_state = initial_state;
        self
    }

    /// Start `Q` and `ICVaR` from the same table.
    pub fn with_initial_values(mut self, values: Array2<f64>) -> Result<Self, IcvarError> {
        if values.dim() != self.q.dim() {
            return Err(IcvarError::ShapeMismatch {
                table: "Q",
                expected: vec![self.q.nrows(), self.q.ncols()],
                actual: vec![values.nrows(), values.ncols()],
            });
        }
        self.q_max = row_max(&values);
        self.icvar_max = self.q_max.clone();
        self.icvar = values.clone();
        self.q = values;
        Ok(self)
    }

    /// Solver over one half of a learned model, initialised from its exploration values.
    pub fn from_learned(
        model: &LearnedModel,
        config: IcvarConfig,
        seed: Option<u64>,
    ) -> Result<Self, IcvarError> {
        let (p, r) = model.block(config.action_block, config.use_biased_rewards);
        debug!(
            block = %config.action_block,
            biased = config.use_biased_rewards,
            "solver tables taken from learned model"
        );
        Self::new(p, r, config, seed)?
            .with_origin(model.dims.measure_cost, model.dims.initial_state)
            .with_initial_values(model.exploration_q.clone())
    }

    /// Learn a model from `env` over `episodes` episodes and set up a solver on it.
    pub fn learn_model<E: Environment>(
        env: E,
        config: &SolverConfig,
        episodes: usize,
    ) -> Result<(Self, SamplingReport), IcvarError> {
        let mut learner = ModelLearner::new(env, config.learner.clone())?;
        let report = learner.sample(episodes, config.learner.max_steps)?;
        let solver = Self::from_learned(&learner.snapshot(), config.icvar.clone(), config.seed)?;
        Ok((solver, report))
    }

    /// Learn a model, then run `updates` sweeps of robust value iteration.
    pub fn run<E: Environment>(
        env: E,
        config: &SolverConfig,
        updates: usize,
        episodes: usize,
    ) -> Result<(Self, SolveReport), IcvarError> {
        let (mut solver, _) = Self::learn_model(env, config, episodes)?;
        let report = solver.solve(updates)?;
        Ok((solver, report))
    }

    /// Perform `updates` sweeps.
    pub fn solve(&mut self, updates: usize) -> Result<SolveReport, IcvarError> {
        info!(
            target: event_names::SOLVE_STARTED,
            updates,
            alpha = self.config.perturbation_budget,
            sweep = %self.config.sweep,
            states = self.dims.state_size,
            actions = self.dims.physical_actions,
            "Computing ICVaR"
        );

        let interval = (updates / 10).max(1);
        let mut residual = 0.0;
        for sweep in 0..updates {
            residual = self.sweep()?;
            if sweep % interval == 0 {
                info!(
                    target: event_names::SOLVE_SWEEP,
                    sweep = sweep + 1,
                    total = updates,
                    residual,
                    "Sweep {} completed",
                    sweep + 1
                );
            }
        }

        info!(
            target: event_names::SOLVE_FINISHED,
            sweeps = updates,
            final_residual = residual,
            "ICVaR computed"
        );
        Ok(SolveReport {
            sweeps: updates,
            final_residual: residual,
        })
    }

    /// One sweep over the state space; returns the largest ICVaR change.
    pub fn sweep(&mut self) -> Result<f64, IcvarError> {
        let states = self.dims.state_size;
        let mut residual: f64 = 0.0;
        match self.config.sweep {
            SweepMode::Permutation => {
                let mut order: Vec<usize> = (0..states).collect();
                order.shuffle(&mut self.rng);
                for state in order {
                    let (_, change) = self.backup(state)?;
                    residual = residual.max(change);
                }
            }
            SweepMode::Walk => {
                let done = self.dims.done_state();
                let mut state = self.rng.random_range(0..states);
                for _ in 0..states {
                    let (action, change) = self.backup(state)?;
                    residual = residual.max(change);
                    let next = self.decide_next_state(state, action);
                    state = if next == done {
                        self.rng.random_range(0..states)
                    } else {
                        next
                    };
                }
            }
        }
        Ok(residual)
    }

    /// Pick an action for `state`, back up `Q` and `ICVaR` for it, and return
    /// the action with the absolute ICVaR change.
    fn backup(&mut self, state: usize) -> Result<(usize, f64), IcvarError> {
        let action = self.pick_action(state);
        self.update_q(state, action);
        let before = self.icvar[[state, action]];
        self.update_icvar(state, action)?;
        Ok((action, (self.icvar[[state, action]] - before).abs()))
    }

    /// Uniform action with probability epsilon, otherwise the ICVaR-greedy one.
    pub fn pick_action(&mut self, state: usize) -> usize {
        let actions = self.dims.physical_actions;
        if self.rng.random::<f64>() < self.config.exploration_epsilon {
            return self.rng.random_range(0..actions);
        }
        amdp_math::argmax(self.icvar.row(state).iter()).unwrap_or(0)
    }

    /// Nominal backup of `Q[s, a]`.
    pub fn update_q(&mut self, state: usize, action: usize) {
        let expected = self.p.slice(s![state, action, ..]).dot(&self.q_max);
        self.q[[state, action]] = self.r[[state, action]] + self.config.discount_factor * expected;
        self.q_max[state] = amdp_math::max_value(self.q.row(state).iter());
    }

    /// Robust backup of `ICVaR[s, a]` over the support of `P[s, a, ·]`.
    pub fn update_icvar(&mut self, state: usize, action: usize) -> Result<(), IcvarError> {
        let row = self.p.slice(s![state, action, ..]);
        let support: Vec<usize> = row
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p > 0.0)
            .map(|(i, _)| i)
            .collect();
        let probs: Vec<f64> = support.iter().map(|&i| row[i]).collect();
        let values: Vec<f64> = support.iter().map(|&i| self.icvar_max[i]).collect();

        let perturbed = delta_minimize(&probs, &values, self.config.perturbation_budget).map_err(
            |source| IcvarError::Redistribution {
                state,
                action,
                source,
            },
        )?;

        let mut delta_row = self.delta_p.slice_mut(s![state, action, ..]);
        delta_row.fill(0.0);
        for (&next, &mass) in support.iter().zip(&perturbed) {
            delta_row[next] = mass;
        }

        let expected: f64 = perturbed.iter().zip(&values).map(|(p, v)| p * v).sum();
        self.icvar[[state, action]] =
            self.r[[state, action]] + self.config.discount_factor * expected;
        self.icvar_max[state] = amdp_math::max_value(self.icvar.row(state).iter());
        Ok(())
    }

    /// Sample a successor under the unperturbed model.
    pub fn decide_next_state(&mut self, state: usize, action: usize) -> usize {
        let u: f64 = self.rng.random();
        amdp_math::sample_index(self.p.slice(s![state, action, ..]).iter(), u)
            .unwrap_or(self.dims.done_state())
    }

    /// `(P, R, Q, ICVaR)`.
    pub fn model(&self) -> (&Array3<f64>, &Array2<f64>, &Array2<f64>, &Array2<f64>) {
        (&self.p, &self.r, &self.q, &self.icvar)
    }

    pub fn p(&self) -> &Array3<f64> {
        &self.p
    }

    pub fn r(&self) -> &Array2<f64> {
        &self.r
    }

    pub fn q(&self) -> &Array2<f64> {
        &self.q
    }

    pub fn q_max(&self) -> &Array1<f64> {
        &self.q_max
    }

    pub fn icvar(&self) -> &Array2<f64> {
        &self.icvar
    }

    pub fn icvar_max(&self) -> &Array1<f64> {
        &self.icvar_max
    }

    /// The adversarial transition table realised by the latest backups.
    pub fn delta_p(&self) -> &Array3<f64> {
        &self.delta_p
    }

    pub fn dims(&self) -> ModelDims {
        self.dims
    }

    pub fn config(&self) -> &IcvarConfig {
        &self.config
    }
}

fn validate_parameters(config: &IcvarConfig) -> Result<(), IcvarError> {
    let alpha = config.perturbation_budget;
    if amdp_math::validate_budget(alpha).is_err() {
        return Err(IcvarError::InvalidBudget { alpha });
    }
    let epsilon = config.exploration_epsilon;
    if !(0.0..=1.0).contains(&epsilon) {
        return Err(IcvarError::InvalidEpsilon { epsilon });
    }
    let discount = config.discount_factor;
    if !(0.0..1.0).contains(&discount) {
        return Err(IcvarError::InvalidDiscount { discount });
    }
    Ok(())
}

fn row_max(table: &Array2<f64>) -> Array1<f64> {
    table.map_axis(Axis(1), |row| amdp_math::max_value(row.iter()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two native states plus done, one action.
    /// State 0 reaches state 1 (value 1 per step) or done with equal odds.
    fn fork() -> (Array3<f64>, Array2<f64>) {
        let mut p = Array3::<f64>::zeros((3, 1, 3));
        p[[0, 0, 1]] = 0.5;
        p[[0, 0, 2]] = 0.5;
        p[[1, 0, 1]] = 1.0;
        p[[2, 0, 2]] = 1.0;
        let mut r = Array2::<f64>::zeros((3, 1));
        r[[1, 0]] = 1.0;
        (p, r)
    }

    fn config(alpha: f64) -> IcvarConfig {
        IcvarConfig {
            perturbation_budget: alpha,
            discount_factor: 0.5,
            exploration_epsilon: 0.0,
            ..IcvarConfig::default()
        }
    }

    #[test]
    fn rejects_bad_budget() {
        let (p, r) = fork();
        for alpha in [0.0, 1.5, f64::NAN] {
            let err = IcvarSolver::new(p.clone(), r.clone(), config(alpha), Some(1)).unwrap_err();
            assert!(matches!(err, IcvarError::InvalidBudget { .. }));
        }
    }

    #[test]
    fn rejects_bad_epsilon() {
        let (p, r) = fork();
        let cfg = IcvarConfig {
            exploration_epsilon: 1.5,
            ..config(0.5)
        };
        assert!(matches!(
            IcvarSolver::new(p, r, cfg, None),
            Err(IcvarError::InvalidEpsilon { .. })
        ));
    }

    #[test]
    fn rejects_shape_mismatch() {
        let (p, _) = fork();
        let r = Array2::<f64>::zeros((3, 2));
        let err = IcvarSolver::new(p, r, config(0.5), None).unwrap_err();
        assert!(matches!(err, IcvarError::ShapeMismatch { table: "R", .. }));
    }

    #[test]
    fn rejects_unnormalized_rows() {
        let (mut p, r) = fork();
        p[[1, 0, 1]] = 0.7;
        let err = IcvarSolver::new(p, r, config(0.5), None).unwrap_err();
        assert!(matches!(err, IcvarError::RowMass { state: 1, action: 0, .. }));
    }

    #[test]
    fn nominal_values_converge() {
        let (p, r) = fork();
        let mut solver = IcvarSolver::new(p, r, config(1.0), Some(3)).unwrap();
        let report = solver.solve(200).unwrap();
        assert_eq!(report.sweeps, 200);
        assert!(report.final_residual < 1e-9);

        // Q[1] = 1 / (1 - 0.5) = 2, Q[0] = 0.5 * 0.5 * 2 = 0.5
        assert!((solver.q_max()[1] - 2.0).abs() < 1e-9);
        assert!((solver.q_max()[0] - 0.5).abs() < 1e-9);
        assert!(solver.q_max()[2].abs() < 1e-9);
        // alpha = 1 leaves no room for the adversary.
        for s in 0..3 {
            assert!((solver.icvar_max()[s] - solver.q_max()[s]).abs() < 1e-9);
        }
    }

    #[test]
    fn adversary_shifts_mass_to_worst_successor() {
        let (p, r) = fork();
        let mut solver = IcvarSolver::new(p, r, config(0.5), Some(3)).unwrap();
        solver.solve(200).unwrap();

        // Done (value 0) is worse than state 1 (value 2): budget 1/alpha = 2
        // doubles its 0.5 mass to 1.
        let delta = solver.delta_p();
        assert!((delta[[0, 0, 2]] - 1.0).abs() < 1e-9);
        assert!(delta[[0, 0, 1]].abs() < 1e-9);
        assert!(solver.icvar_max()[0].abs() < 1e-9);
        assert!((solver.icvar_max()[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn robust_value_never_exceeds_nominal() {
        let (p, r) = fork();
        let mut solver = IcvarSolver::new(p, r, config(0.3), Some(9)).unwrap();
        for _ in 0..20 {
            solver.sweep().unwrap();
            for s in 0..3 {
                assert!(solver.icvar_max()[s] <= solver.q_max()[s] + 1e-9);
            }
        }
    }

    #[test]
    fn delta_rows_are_distributions() {
        let (p, r) = fork();
        let mut solver = IcvarSolver::new(p, r, config(0.3), Some(5)).unwrap();
        solver.solve(10).unwrap();
        for row in solver.delta_p().lanes(Axis(2)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn walk_sweeps_cover_reachable_states() {
        let (p, r) = fork();
        let cfg = IcvarConfig {
            sweep: SweepMode::Walk,
            ..config(1.0)
        };
        let mut solver = IcvarSolver::new(p, r, cfg, Some(11)).unwrap();
        solver.solve(500).unwrap();
        assert!((solver.q_max()[1] - 2.0).abs() < 1e-6);
        assert!((solver.q_max()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn initial_values_seed_both_tables() {
        let (p, r) = fork();
        let init = Array2::from_shape_vec((3, 1), vec![0.3, 0.7, 1.0]).unwrap();
        let solver = IcvarSolver::new(p, r, config(0.5), None)
            .unwrap()
            .with_initial_values(init.clone())
            .unwrap();
        assert_eq!(solver.q(), &init);
        assert_eq!(solver.icvar(), &init);
        assert_eq!(solver.q_max(), solver.icvar_max());
        assert_eq!(solver.delta_p(), solver.p());
    }

    #[test]
    fn same_seed_same_result() {
        let (p, r) = fork();
        let cfg = IcvarConfig {
            exploration_epsilon: 0.5,
            ..config(0.4)
        };
        let run = |seed| {
            let mut solver = IcvarSolver::new(p.clone(), r.clone(), cfg.clone(), Some(seed)).unwrap();
            solver.solve(5).unwrap();
            solver.icvar().clone()
        };
        assert_eq!(run(42), run(42));
    }
}

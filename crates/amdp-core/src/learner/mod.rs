//! Empirical model learner for active-measurement MDPs.
//!
//! The learner drives an [`Environment`] through sampled episodes, measuring
//! after every step, and turns the observed transitions into an action-doubled
//! model: columns `0..A` are the measuring variants of each physical action and
//! `A..2A` their non-measuring twins. Both twins share counters, since the
//! environment cannot tell them apart.
//!
//! Actions are picked greedily from an exploration table initialised
//! optimistically to `1/visits`. Rarely tried actions keep a high value until
//! their counts grow, which is what drives exploration; there is no epsilon.
//!
//! # Table semantics
//!
//! ```text
//! T[s,a,s'] = counts[s,a,s'] / visits[s,a]
//! R[s,a]    = reward_sum[s,a] / max(visits[s,a] - 1, 1)
//! ```

pub mod counts;
pub mod postprocess;

pub use counts::ModelCounts;
pub use postprocess::{biased_rewards, filter_threshold, filter_transitions, CostWeights};

use amdp_config::{ActionBlock, LearnerConfig};
use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::env::Environment;
use crate::logging::event_names;

/// Errors raised by the model learner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LearnerError {
    #[error("environment reports {states} states and {actions} actions; both must be positive")]
    EmptyEnvironment { states: usize, actions: usize },

    #[error("initial state {state} is outside the native state range 0..{state_count}")]
    InitialState { state: usize, state_count: usize },

    #[error("environment measured state {state}, outside the native state range 0..{state_count}")]
    StateOutOfRange { state: usize, state_count: usize },

    #[error("transition row ({state}, {action}) lost all probability mass during filtering")]
    DegenerateRow { state: usize, action: usize },
}

/// Sizes of a learned model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelDims {
    /// Number of states including the synthetic done state.
    pub state_size: usize,
    /// Number of physical actions (half the learned action space).
    pub physical_actions: usize,
    pub measure_cost: f64,
    pub initial_state: usize,
}

impl ModelDims {
    /// Size of the action-doubled action space.
    pub fn action_size(&self) -> usize {
        2 * self.physical_actions
    }

    /// Index of the absorbing done state.
    pub fn done_state(&self) -> usize {
        self.state_size - 1
    }
}

/// Per-episode statistics of a sampling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingReport {
    /// Cumulative `reward - measure_cost` of each episode.
    pub rewards: Vec<f64>,
    /// Steps taken in each episode.
    pub steps: Vec<usize>,
}

impl SamplingReport {
    pub fn episodes(&self) -> usize {
        self.rewards.len()
    }

    pub fn mean_reward(&self) -> f64 {
        if self.rewards.is_empty() {
            return 0.0;
        }
        self.rewards.iter().sum::<f64>() / self.rewards.len() as f64
    }

    pub fn total_steps(&self) -> usize {
        self.steps.iter().sum()
    }
}

/// A frozen copy of the learner's tables.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnedModel {
    pub dims: ModelDims,
    /// `T[s, a, s']` over the action-doubled space.
    pub transitions: Array3<f64>,
    pub rewards: Array2<f64>,
    pub biased_rewards: Array2<f64>,
    /// Exploration values over the measuring half.
    pub exploration_q: Array2<f64>,
}

impl LearnedModel {
    /// Restrict `T` and `R` (or `R_biased`) to one half of the action space.
    pub fn block(&self, block: ActionBlock, biased: bool) -> (Array3<f64>, Array2<f64>) {
        let width = self.dims.physical_actions;
        let offset = block.offset(width);
        let rewards = if biased {
            &self.biased_rewards
        } else {
            &self.rewards
        };
        (
            self.transitions
                .slice(s![.., offset..offset + width, ..])
                .to_owned(),
            rewards.slice(s![.., offset..offset + width]).to_owned(),
        )
    }
}

/// Learns `(T, R, R_biased)` by sampling an environment.
pub struct ModelLearner<E> {
    env: E,
    config: LearnerConfig,
    dims: ModelDims,
    counts: ModelCounts,
    /// Pruned transitions, present once [`filter_transitions`](Self::filter_transitions) ran.
    filtered: Option<Array3<f64>>,
    biased: Array2<f64>,
    exploration_q: Array2<f64>,
}

impl<E: Environment> ModelLearner<E> {
    /// Read the environment's sizes and set up fresh tables.
    pub fn new(env: E, config: LearnerConfig) -> Result<Self, LearnerError> {
        let vars = env.vars();
        if vars.state_count == 0 || vars.action_count == 0 {
            return Err(LearnerError::EmptyEnvironment {
                states: vars.state_count,
                actions: vars.action_count,
            });
        }
        if vars.initial_state >= vars.state_count {
            return Err(LearnerError::InitialState {
                state: vars.initial_state,
                state_count: vars.state_count,
            });
        }

        let dims = ModelDims {
            state_size: vars.state_count + 1,
            physical_actions: vars.action_count,
            measure_cost: vars.measure_cost,
            initial_state: vars.initial_state,
        };
        let counts = ModelCounts::new(dims.state_size, dims.physical_actions);

        Ok(Self {
            biased: counts.rewards().clone(),
            exploration_q: Array2::ones((dims.state_size, dims.physical_actions)),
            filtered: None,
            counts,
            env,
            config,
            dims,
        })
    }

    /// Discard everything learned so far.
    pub fn reset_model(&mut self) {
        self.counts = ModelCounts::new(self.dims.state_size, self.dims.physical_actions);
        self.filtered = None;
        self.biased = self.counts.rewards().clone();
        self.exploration_q = Array2::ones((self.dims.state_size, self.dims.physical_actions));
    }

    /// Sample with the configured episode count and step cap.
    pub fn learn(&mut self) -> Result<SamplingReport, LearnerError> {
        self.sample(self.config.episodes, self.config.max_steps)
    }

    /// Learn a fresh model from `episodes` episodes of at most `max_steps` steps.
    ///
    /// With `post_process` enabled the transitions are pruned and the biased
    /// rewards computed once sampling finishes.
    pub fn sample(
        &mut self,
        episodes: usize,
        max_steps: usize,
    ) -> Result<SamplingReport, LearnerError> {
        self.reset_model();
        info!(
            target: event_names::LEARN_STARTED,
            episodes,
            max_steps,
            states = self.dims.state_size,
            actions = self.dims.action_size(),
            "Sampling environment"
        );

        let mut report = SamplingReport {
            rewards: Vec::with_capacity(episodes),
            steps: Vec::with_capacity(episodes),
        };
        let interval = self.config.progress_interval;
        for episode in 0..episodes {
            let (reward, steps) = self.sample_episode(max_steps)?;
            report.rewards.push(reward);
            report.steps.push(steps);

            if interval > 0 && (episode + 1) % interval == 0 {
                info!(
                    target: event_names::LEARN_PROGRESS,
                    episodes = episode + 1,
                    total = episodes,
                    last_reward = reward,
                    "{} exploration episodes completed",
                    episode + 1
                );
            }
        }

        if self.config.post_process {
            self.filter_transitions()?;
            self.add_costs();
        } else {
            self.biased = self.counts.rewards().clone();
        }

        info!(
            target: event_names::LEARN_FINISHED,
            episodes,
            total_steps = report.total_steps(),
            mean_reward = report.mean_reward(),
            post_processed = self.config.post_process,
            "Model learned"
        );
        Ok(report)
    }

    /// Run one episode; returns its cumulative `reward - measure_cost` and step count.
    pub fn sample_episode(&mut self, max_steps: usize) -> Result<(f64, usize), LearnerError> {
        let done_state = self.dims.done_state();
        self.env.reset();
        let mut prev = self.observe()?;

        let mut total = 0.0;
        let mut steps = 0;
        for _ in 0..max_steps {
            let action = amdp_math::argmax(self.exploration_q.row(prev).iter()).unwrap_or(0);

            let outcome = self.env.step(action);
            let next = if outcome.done {
                done_state
            } else {
                self.observe()?
            };

            total += outcome.reward - self.dims.measure_cost;
            steps += 1;

            self.counts.record(prev, action, next, outcome.reward);
            self.update_exploration(prev);
            prev = next;

            if outcome.done {
                break;
            }
        }
        debug!(steps, reward = total, "episode finished");
        Ok((total, steps))
    }

    /// Measure the environment and check the state is a native one.
    fn observe(&mut self) -> Result<usize, LearnerError> {
        let measurement = self.env.measure();
        let state_count = self.dims.state_size - 1;
        if measurement.state >= state_count {
            return Err(LearnerError::StateOutOfRange {
                state: measurement.state,
                state_count,
            });
        }
        Ok(measurement.state)
    }

    /// One asynchronous backup of the exploration row of `state`:
    ///
    /// ```text
    /// Q[s,a] ← (1-lr)·Q[s,a] + lr·(1/visits[s,a] + df·Σ_s' T[s,a,s']·max Q[s',·])
    /// ```
    ///
    /// The successor values are read before the row is written.
    pub fn update_exploration(&mut self, state: usize) {
        let lr = self.config.learning_rate;
        let df = self.config.discount_factor;
        let best = self
            .exploration_q
            .map_axis(Axis(1), |row| amdp_math::max_value(row.iter()));
        let transitions = self.counts.transitions();
        let visits = self.counts.visits();

        for action in 0..self.dims.physical_actions {
            let psi = transitions.slice(s![state, action, ..]).dot(&best);
            let q = &mut self.exploration_q[[state, action]];
            *q = (1.0 - lr) * *q + lr * (1.0 / visits[[state, action]] + df * psi);
        }
    }

    /// Prune transitions below `min(1/|S|, cap)` and renormalize.
    pub fn filter_transitions(&mut self) -> Result<(), LearnerError> {
        let threshold = filter_threshold(self.dims.state_size, self.config.filter_threshold_cap);
        let mut transitions = self.transitions().clone();
        filter_transitions(&mut transitions, threshold)?;
        debug!(threshold, "transitions filtered");
        self.filtered = Some(transitions);
        Ok(())
    }

    /// Recompute the biased reward table from the current `T` and `R`.
    pub fn add_costs(&mut self) {
        let weights = CostWeights {
            measure_cost: self.dims.measure_cost,
            measurement_cost_weight: self.config.measurement_cost_weight,
            self_loop_penalty: self.config.self_loop_penalty,
            terminal_penalty: self.config.terminal_penalty,
        };
        self.biased = biased_rewards(
            self.counts.rewards(),
            self.transitions(),
            self.dims.physical_actions,
            weights,
        );
    }

    /// Current transition table (pruned once filtering ran).
    pub fn transitions(&self) -> &Array3<f64> {
        self.filtered.as_ref().unwrap_or(self.counts.transitions())
    }

    /// `(T, R, R_biased)`.
    pub fn model(&self) -> (&Array3<f64>, &Array2<f64>, &Array2<f64>) {
        (self.transitions(), self.counts.rewards(), &self.biased)
    }

    pub fn exploration_q(&self) -> &Array2<f64> {
        &self.exploration_q
    }

    pub fn counts(&self) -> &ModelCounts {
        &self.counts
    }

    pub fn dims(&self) -> ModelDims {
        self.dims
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Copy the current tables out of the learner.
    pub fn snapshot(&self) -> LearnedModel {
        let (transitions, rewards, biased) = self.model();
        LearnedModel {
            dims: self.dims,
            transitions: transitions.clone(),
            rewards: rewards.clone(),
            biased_rewards: biased.clone(),
            exploration_q: self.exploration_q.clone(),
        }
    }

    pub fn into_env(self) -> E {
        self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvVars, Measurement, StepOutcome, TabularEnv};

    fn line_env() -> TabularEnv {
        // 0 -a0-> 1 -a0-> done; a1 stays put with a small penalty.
        TabularEnv::deterministic(
            &[vec![1, 0], vec![2, 1]],
            &[vec![0.0, -0.1], vec![1.0, -0.1]],
            0.1,
            0,
            Some(1),
        )
        .unwrap()
    }

    fn config(episodes: usize) -> LearnerConfig {
        LearnerConfig {
            episodes,
            max_steps: 50,
            progress_interval: 0,
            ..LearnerConfig::default()
        }
    }

    #[test]
    fn dims_include_done_state() {
        let learner = ModelLearner::new(line_env(), config(1)).unwrap();
        let dims = learner.dims();
        assert_eq!(dims.state_size, 3);
        assert_eq!(dims.action_size(), 4);
        assert_eq!(dims.done_state(), 2);
        assert_eq!(learner.exploration_q().dim(), (3, 2));
        assert!(learner.exploration_q().iter().all(|&q| q == 1.0));
    }

    #[test]
    fn report_lengths_match_episodes() {
        let mut learner = ModelLearner::new(line_env(), config(25)).unwrap();
        let report = learner.learn().unwrap();
        assert_eq!(report.rewards.len(), 25);
        assert_eq!(report.steps.len(), 25);
        assert!(report.steps.iter().all(|&n| (1..=50).contains(&n)));
    }

    #[test]
    fn episode_reward_charges_measure_cost_per_step() {
        let mut learner = ModelLearner::new(line_env(), config(1)).unwrap();
        let (reward, steps) = learner.sample_episode(50).unwrap();
        // Every step pays 0.1 on top of its reward; rewards are 0, 1 or -0.1.
        let min = -0.2 * steps as f64;
        let max = 1.0 - 0.1 * steps as f64;
        assert!(reward >= min - 1e-9 && reward <= max + 1e-9);
    }

    #[test]
    fn learns_deterministic_line() {
        let mut learner = ModelLearner::new(line_env(), config(300)).unwrap();
        learner.learn().unwrap();
        let (t, r, biased) = learner.model();

        for twin in [0, 2] {
            assert_eq!(t[[0, twin, 1]], 1.0);
            assert_eq!(t[[1, twin, 2]], 1.0);
        }
        for twin in [1, 3] {
            assert_eq!(t[[0, twin, 0]], 1.0);
            assert_eq!(t[[1, twin, 1]], 1.0);
        }
        assert!((r[[1, 0]] - 1.0).abs() < 1e-9);
        // Measuring twin pays the measurement cost in the biased table.
        assert!((biased[[1, 0]] - 0.9).abs() < 1e-9);
        assert!((biased[[1, 2]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn without_post_processing_biased_equals_raw() {
        let cfg = LearnerConfig {
            post_process: false,
            ..config(20)
        };
        let mut learner = ModelLearner::new(line_env(), cfg).unwrap();
        learner.learn().unwrap();
        let (t, r, biased) = learner.model();
        assert_eq!(r, biased);
        // The Laplace prior keeps mass on unobserved successors.
        assert!(t[[0, 0, 2]] > 0.0);
    }

    #[test]
    fn block_selects_half() {
        let mut learner = ModelLearner::new(line_env(), config(50)).unwrap();
        learner.learn().unwrap();
        let model = learner.snapshot();
        let (p, r) = model.block(ActionBlock::NonMeasuring, true);
        assert_eq!(p.dim(), (3, 2, 3));
        assert_eq!(r.dim(), (3, 2));
        assert_eq!(r[[1, 0]], model.biased_rewards[[1, 2]]);
        let (p_measuring, _) = model.block(ActionBlock::Measuring, false);
        assert_eq!(p, p_measuring);
    }

    struct Liar;

    impl Environment for Liar {
        fn reset(&mut self) {}
        fn step(&mut self, _action: usize) -> StepOutcome {
            StepOutcome {
                reward: 0.0,
                done: false,
            }
        }
        fn measure(&mut self) -> Measurement {
            Measurement { state: 5, cost: 0.0 }
        }
        fn vars(&self) -> EnvVars {
            EnvVars {
                state_count: 2,
                action_count: 1,
                measure_cost: 0.0,
                initial_state: 0,
            }
        }
    }

    #[test]
    fn out_of_range_measurement_is_fatal() {
        let mut learner = ModelLearner::new(Liar, config(1)).unwrap();
        let err = learner.learn().unwrap_err();
        assert_eq!(
            err,
            LearnerError::StateOutOfRange {
                state: 5,
                state_count: 2
            }
        );
    }

    #[test]
    fn learner_borrows_environment() {
        let mut env = line_env();
        {
            let mut learner = ModelLearner::new(&mut env, config(5)).unwrap();
            learner.learn().unwrap();
        }
        assert_eq!(env.vars().state_count, 2);
    }
}

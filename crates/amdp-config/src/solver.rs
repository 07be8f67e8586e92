//! Solver configuration types.
//!
//! Every knob of the model learner and the ICVaR solver lives here as one
//! immutable value. Missing fields fall back to their defaults, so an empty
//! file (`{}` or an empty TOML document) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::validate::{ValidationError, ValidationResult};

/// Complete solver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub schema_version: String,

    /// Seed for every random draw (environment sampling, solver sweeps).
    /// `None` seeds from the operating system.
    pub seed: Option<u64>,

    pub learner: LearnerConfig,
    pub icvar: IcvarConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            seed: None,
            learner: LearnerConfig::default(),
            icvar: IcvarConfig::default(),
        }
    }
}

/// Empirical model learner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Number of sampled episodes.
    pub episodes: usize,
    /// Step cap per episode.
    pub max_steps: usize,
    /// Learning rate of the exploration Q-table.
    pub learning_rate: f64,
    /// Discount of the exploration Q-table.
    pub discount_factor: f64,
    /// Multiplier on the measurement cost folded into biased rewards.
    pub measurement_cost_weight: f64,
    /// Penalty per unit of self-loop probability `T[s,a,s]`.
    pub self_loop_penalty: f64,
    /// Penalty per unit of terminal probability `T[s,a,done]`.
    pub terminal_penalty: f64,
    /// Upper cap on the pruning threshold `min(1/|S|, cap)`.
    pub filter_threshold_cap: f64,
    /// Filter transitions and bias rewards once sampling finishes.
    pub post_process: bool,
    /// Log progress every this many episodes (0 disables).
    pub progress_interval: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            episodes: 10_000,
            max_steps: 500,
            learning_rate: 0.3,
            discount_factor: 0.95,
            measurement_cost_weight: 1.0,
            self_loop_penalty: 0.0,
            terminal_penalty: 0.0,
            filter_threshold_cap: 0.05,
            post_process: true,
            progress_interval: 100,
        }
    }
}

/// Which half of the action-doubled learner tables the ICVaR solver reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionBlock {
    /// Actions `0..A`, where the resulting state is observed.
    Measuring,
    /// Actions `A..2A`, where the resulting state stays hidden.
    #[default]
    NonMeasuring,
}

impl ActionBlock {
    /// Column offset of this block in a table with `physical_actions` per half.
    pub fn offset(self, physical_actions: usize) -> usize {
        match self {
            ActionBlock::Measuring => 0,
            ActionBlock::NonMeasuring => physical_actions,
        }
    }
}

impl std::fmt::Display for ActionBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionBlock::Measuring => write!(f, "measuring"),
            ActionBlock::NonMeasuring => write!(f, "non_measuring"),
        }
    }
}

/// How a solver sweep chooses the states it backs up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Every state once, in a fresh random order each sweep.
    #[default]
    Permutation,
    /// A simulated trajectory of `|S|` steps under the nominal model.
    Walk,
}

impl std::fmt::Display for SweepMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepMode::Permutation => write!(f, "permutation"),
            SweepMode::Walk => write!(f, "walk"),
        }
    }
}

/// Robust (ICVaR) value iteration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcvarConfig {
    /// Perturbation budget alpha in (0, 1]; probabilities scale by at most 1/alpha.
    #[serde(alias = "alpha")]
    pub perturbation_budget: f64,
    pub discount_factor: f64,
    /// Probability of a uniformly random action during sweeps.
    pub exploration_epsilon: f64,
    /// Number of sweeps.
    pub updates: usize,
    pub action_block: ActionBlock,
    pub sweep: SweepMode,
    /// Read the cost-biased reward table instead of the raw one.
    pub use_biased_rewards: bool,
}

impl Default for IcvarConfig {
    fn default() -> Self {
        Self {
            perturbation_budget: 0.3,
            discount_factor: 0.95,
            exploration_epsilon: 0.5,
            updates: 1_000,
            action_block: ActionBlock::default(),
            sweep: SweepMode::default(),
            use_biased_rewards: false,
        }
    }
}

impl SolverConfig {
    /// Load configuration from a JSON or TOML file (chosen by extension).
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::parse_toml(&content),
            _ => Self::parse_json(&content),
        }
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(json: &str) -> ValidationResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(text: &str) -> ValidationResult<Self> {
        toml::from_str(text)
            .map_err(|e| ValidationError::ParseError(format!("Invalid TOML: {}", e)))
    }

    /// Load a file and validate it semantically.
    pub fn load(path: &Path) -> ValidationResult<Self> {
        let config = Self::from_file(path)?;
        crate::validate::validate_config(&config)?;
        Ok(config)
    }

    /// Replace the seed, keeping everything else.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if seed.is_some() {
            self.seed = seed;
        }
        self
    }
}

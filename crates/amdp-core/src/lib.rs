//! amdp core library.
//!
//! Learns tabular models of active-measurement MDPs, where observing the
//! state after a transition costs a penalty, and solves them with a
//! risk-sensitive (ICVaR) value iteration that guards against bounded
//! perturbations of the learned transition probabilities.
//!
//! Pipeline: [`env::Environment`] → [`learner::ModelLearner`] →
//! `(T, R, R_biased)` → [`solver::IcvarSolver`] → `(ICVaR, ICVaR_max, ΔP)`.

pub mod env;
pub mod exit_codes;
pub mod learner;
pub mod logging;
pub mod model;
pub mod output;
pub mod solver;

pub use env::{AugmentedAction, EnvVars, Environment, Measurement, StepOutcome, TabularEnv};
pub use learner::{LearnedModel, LearnerError, ModelDims, ModelLearner, SamplingReport};
pub use model::{ExplicitModel, ModelError, RobustModel};
pub use solver::{IcvarError, IcvarSolver, SolveReport};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seeded RNG, or one seeded from the operating system when `seed` is `None`.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

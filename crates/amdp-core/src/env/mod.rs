//! Environment interface for active-measurement MDPs.
//!
//! An environment advances on [`Environment::step`] without revealing the new
//! state; the agent pays [`Measurement::cost`] to observe it through
//! [`Environment::measure`]. The learner drives any implementation of this
//! trait; [`TabularEnv`] is a table-driven implementation.

pub mod tabular;

pub use tabular::{EnvError, TabularEnv};

use serde::{Deserialize, Serialize};

/// Static description reported by an environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvVars {
    /// Number of native states (the terminal state is not included).
    pub state_count: usize,
    /// Number of physical actions.
    pub action_count: usize,
    /// Cost charged by every measurement.
    pub measure_cost: f64,
    /// State after `reset`.
    pub initial_state: usize,
}

/// Result of taking one physical action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub reward: f64,
    /// The episode ended; the agent is now in the terminal state.
    pub done: bool,
}

/// Result of paying to observe the current state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub state: usize,
    pub cost: f64,
}

/// An active-measurement environment.
pub trait Environment {
    /// Restart an episode from the initial state.
    fn reset(&mut self);

    /// Take a physical action. The resulting state stays hidden.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `action` is not below
    /// [`EnvVars::action_count`].
    fn step(&mut self, action: usize) -> StepOutcome;

    /// Observe the current state, paying the measurement cost.
    fn measure(&mut self) -> Measurement;

    /// Sizes, measurement cost and initial state.
    fn vars(&self) -> EnvVars;
}

impl<E: Environment + ?Sized> Environment for &mut E {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn step(&mut self, action: usize) -> StepOutcome {
        (**self).step(action)
    }

    fn measure(&mut self) -> Measurement {
        (**self).measure()
    }

    fn vars(&self) -> EnvVars {
        (**self).vars()
    }
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn step(&mut self, action: usize) -> StepOutcome {
        (**self).step(action)
    }

    fn measure(&mut self) -> Measurement {
        (**self).measure()
    }

    fn vars(&self) -> EnvVars {
        (**self).vars()
    }
}

/// An index into the action-doubled action space `0..2A`.
///
/// Index `a` stands for physical action `a % A`; indices below `A` are the
/// measuring variants and indices `A..2A` their non-measuring twins. Both
/// variants move the environment identically and differ only in whether the
/// agent observes the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AugmentedAction {
    pub physical: usize,
    pub measuring: bool,
}

impl AugmentedAction {
    pub fn measuring(physical: usize) -> Self {
        Self {
            physical,
            measuring: true,
        }
    }

    pub fn non_measuring(physical: usize) -> Self {
        Self {
            physical,
            measuring: false,
        }
    }

    /// Decompose an augmented index. `None` if `index >= 2 * physical_actions`.
    pub fn from_index(index: usize, physical_actions: usize) -> Option<Self> {
        if physical_actions == 0 || index >= 2 * physical_actions {
            return None;
        }
        Some(Self {
            physical: index % physical_actions,
            measuring: index / physical_actions == 0,
        })
    }

    /// Position of this action in the action-doubled tables.
    pub fn index(self, physical_actions: usize) -> usize {
        if self.measuring {
            self.physical
        } else {
            self.physical + physical_actions
        }
    }

    /// The same physical action with the opposite measuring flag.
    pub fn twin(self) -> Self {
        Self {
            physical: self.physical,
            measuring: !self.measuring,
        }
    }
}

impl std::fmt::Display for AugmentedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.measuring {
            write!(f, "{}+measure", self.physical)
        } else {
            write!(f, "{}", self.physical)
        }
    }
}

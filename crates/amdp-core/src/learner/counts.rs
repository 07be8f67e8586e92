//! Laplace-smoothed counters and the tables derived from them.

use ndarray::{s, Array2, Array3};

/// Visit, transition and reward counters for an action-doubled model.
///
/// Invariants held from construction on:
/// - every `(s, a)` row of `transitions` sums to 1
/// - the done state is absorbing: `T[done, a, done] = 1` for every `a`
/// - measuring action `a` and its non-measuring twin `a + A` carry identical
///   counters
#[derive(Debug, Clone)]
pub struct ModelCounts {
    physical_actions: usize,
    visits: Array2<f64>,
    transition_counts: Array3<f64>,
    reward_sums: Array2<f64>,
    transitions: Array3<f64>,
    rewards: Array2<f64>,
}

impl ModelCounts {
    /// Fresh counters for `state_size` states (done state included) and
    /// `physical_actions` actions per half.
    pub fn new(state_size: usize, physical_actions: usize) -> Self {
        let action_size = 2 * physical_actions;
        let done = state_size - 1;

        let visits = Array2::<f64>::ones((state_size, action_size));
        let mut transition_counts =
            Array3::<f64>::from_elem((state_size, action_size, state_size), 1.0 / state_size as f64);
        transition_counts.slice_mut(s![done, .., ..]).fill(0.0);
        transition_counts.slice_mut(s![done, .., done]).fill(1.0);
        let reward_sums = Array2::<f64>::zeros((state_size, action_size));

        let mut counts = Self {
            physical_actions,
            transitions: Array3::zeros(transition_counts.raw_dim()),
            rewards: Array2::zeros(reward_sums.raw_dim()),
            visits,
            transition_counts,
            reward_sums,
        };
        counts.recompute_all();
        counts
    }

    /// Record one observed transition for both variants of the physical action.
    pub fn record(&mut self, state: usize, action: usize, next: usize, reward: f64) {
        let physical = action % self.physical_actions;
        for twin in [physical, physical + self.physical_actions] {
            self.visits[[state, twin]] += 1.0;
            self.transition_counts[[state, twin, next]] += 1.0;
            self.reward_sums[[state, twin]] += reward;
            self.refresh_row(state, twin);
        }
    }

    fn refresh_row(&mut self, state: usize, action: usize) {
        let visits = self.visits[[state, action]];
        let counts = self.transition_counts.slice(s![state, action, ..]);
        self.transitions
            .slice_mut(s![state, action, ..])
            .assign(&(&counts / visits));
        self.rewards[[state, action]] = self.reward_sums[[state, action]] / (visits - 1.0).max(1.0);
    }

    /// Divide every counter row again. Equivalent to the per-row refresh
    /// performed by [`record`](Self::record).
    pub fn recompute_all(&mut self) {
        let (states, actions) = self.visits.dim();
        for state in 0..states {
            for action in 0..actions {
                self.refresh_row(state, action);
            }
        }
    }

    /// Normalized transition table `T = counts / visits`.
    pub fn transitions(&self) -> &Array3<f64> {
        &self.transitions
    }

    /// Mean reward table `R = reward_sum / max(visits - 1, 1)`.
    pub fn rewards(&self) -> &Array2<f64> {
        &self.rewards
    }

    /// Laplace-smoothed visit counts (start at 1).
    pub fn visits(&self) -> &Array2<f64> {
        &self.visits
    }

    pub fn physical_actions(&self) -> usize {
        self.physical_actions
    }
}

//! Property-based tests for learned model invariants.

use amdp_config::LearnerConfig;
use amdp_core::learner::{biased_rewards, filter_threshold, filter_transitions, CostWeights};
use amdp_core::{ModelLearner, TabularEnv};
use ndarray::{s, Array2, Array3, Axis};
use proptest::prelude::*;

/// Random deterministic environment: `successors[s][a] ∈ 0..=native`.
fn env_strategy() -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<Vec<f64>>)> {
    (1usize..4, 1usize..3).prop_flat_map(|(native, actions)| {
        let successors =
            prop::collection::vec(prop::collection::vec(0..=native, actions), native);
        let rewards =
            prop::collection::vec(prop::collection::vec(-1.0f64..1.0, actions), native);
        (successors, rewards)
    })
}

/// Random row-stochastic table with a one-hot done row.
fn table_strategy() -> impl Strategy<Value = Array3<f64>> {
    (2usize..5, 1usize..3).prop_flat_map(|(states, actions)| {
        prop::collection::vec(0.0f64..1.0, states * actions * states).prop_map(move |raw| {
            let mut t = Array3::from_shape_vec((states, actions, states), raw).unwrap();
            for mut row in t.lanes_mut(Axis(2)) {
                // Keep every row away from all-zero.
                row[0] += 0.5;
                let sum = row.sum();
                row.mapv_inplace(|p| p / sum);
            }
            t
        })
    })
}

fn learner_config() -> LearnerConfig {
    LearnerConfig {
        episodes: 30,
        max_steps: 20,
        progress_interval: 0,
        ..LearnerConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn learned_tables_are_well_formed(
        (successors, rewards) in env_strategy(),
        seed in any::<u64>(),
    ) {
        let env = TabularEnv::deterministic(&successors, &rewards, 0.1, 0, Some(seed)).unwrap();
        let mut learner = ModelLearner::new(env, learner_config()).unwrap();
        learner.learn().unwrap();

        let dims = learner.dims();
        let done = dims.done_state();
        let (t, r, _) = learner.model();
        prop_assert_eq!(t.dim(), (dims.state_size, dims.action_size(), dims.state_size));

        for row in t.lanes(Axis(2)) {
            prop_assert!((row.sum() - 1.0).abs() < 1e-9);
            prop_assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
        for a in 0..dims.action_size() {
            prop_assert_eq!(t[[done, a, done]], 1.0);
            prop_assert_eq!(r[[done, a]], 0.0);
        }
        for state in 0..dims.state_size {
            for a in 0..dims.physical_actions {
                let twin = a + dims.physical_actions;
                prop_assert_eq!(t.slice(s![state, a, ..]), t.slice(s![state, twin, ..]));
            }
        }
    }

    #[test]
    fn filtering_prunes_and_renormalizes(table in table_strategy(), cap in 0.01f64..0.5) {
        let states = table.dim().0;
        let threshold = filter_threshold(states, cap);
        prop_assert!(threshold <= 1.0 / states as f64);

        let mut filtered = table.clone();
        filter_transitions(&mut filtered, threshold).unwrap();
        for (row, original) in filtered.lanes(Axis(2)).into_iter().zip(table.lanes(Axis(2))) {
            prop_assert!((row.sum() - 1.0).abs() < 1e-9);
            for (&p, &q) in row.iter().zip(original.iter()) {
                // Pruned entries go to zero; survivors only grow.
                prop_assert!(p == 0.0 || p >= q - 1e-12);
            }
        }

        let mut again = filtered.clone();
        filter_transitions(&mut again, threshold).unwrap();
        for (a, b) in again.iter().zip(filtered.iter()) {
            prop_assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn biased_rewards_never_exceed_raw(
        table in table_strategy(),
        cost in 0.0f64..1.0,
        weight in 0.0f64..2.0,
        self_loop in 0.0f64..1.0,
        terminal in 0.0f64..1.0,
    ) {
        let (states, actions, _) = table.dim();
        let rewards = Array2::<f64>::from_elem((states, actions), 0.25);
        let weights = CostWeights {
            measure_cost: cost,
            measurement_cost_weight: weight,
            self_loop_penalty: self_loop,
            terminal_penalty: terminal,
        };
        let biased = biased_rewards(&rewards, &table, actions, weights);
        for (b, r) in biased.iter().zip(rewards.iter()) {
            prop_assert!(*b <= *r + 1e-12);
        }
    }
}

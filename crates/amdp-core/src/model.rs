//! Persisted explicit models.
//!
//! A model file is a JSON object with the keys `P`, `R`, `Q`, `StateSize`,
//! `ActionSize`, `MeasureCost` and `s_init`. Robust models add `Pmin`, `Pmax`,
//! `PrMdp` and `QrMdp`.
//!
//! Transition tables are stored sparsely as `state → action → {next: prob}`.
//! JSON object keys are strings, so the integer keys are written as `"0"`,
//! `"1"`, ... and parsed back into integers on import. `R`, `Q` and `QrMdp`
//! are dense row-major arrays. `StateSize` counts the done state, which is
//! always the last index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::learner::LearnedModel;
use crate::logging::event_names;
use crate::solver::IcvarSolver;
use amdp_config::ActionBlock;

/// Sparse transition table: `state → action → {next_state: probability}`.
pub type SparseTransitions = BTreeMap<usize, BTreeMap<usize, BTreeMap<usize, f64>>>;

const ROW_TOLERANCE: f64 = 1e-6;

/// Errors raised while reading, writing or checking a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in model file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode model: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid model shape: {0}")]
    Shape(String),

    #[error("Invalid probability in {table}[{state}][{action}][{next}]: {value}")]
    Probability {
        table: &'static str,
        state: usize,
        action: usize,
        next: usize,
        value: f64,
    },

    #[error("{table}[{state}][{action}] sums to {sum}, expected 1")]
    RowMass {
        table: &'static str,
        state: usize,
        action: usize,
        sum: f64,
    },
}

/// An explicit active-measurement model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitModel {
    #[serde(rename = "P")]
    pub p: SparseTransitions,
    #[serde(rename = "R")]
    pub r: Vec<Vec<f64>>,
    #[serde(rename = "Q", default)]
    pub q: Vec<Vec<f64>>,
    #[serde(rename = "StateSize")]
    pub state_size: usize,
    #[serde(rename = "ActionSize")]
    pub action_size: usize,
    #[serde(rename = "MeasureCost")]
    pub measure_cost: f64,
    pub s_init: usize,
}

impl ExplicitModel {
    /// Build a model from dense tables. Zero transitions are not stored.
    pub fn from_tables(
        p: &Array3<f64>,
        r: &Array2<f64>,
        q: &Array2<f64>,
        measure_cost: f64,
        s_init: usize,
    ) -> Self {
        let (state_size, action_size, _) = p.dim();
        Self {
            p: sparse(p),
            r: rows(r),
            q: rows(q),
            state_size,
            action_size,
            measure_cost,
            s_init,
        }
    }

    /// Export one half of a learned model, with its exploration values as `Q`.
    pub fn from_learned(model: &LearnedModel, block: ActionBlock, biased: bool) -> Self {
        let (p, r) = model.block(block, biased);
        Self::from_tables(
            &p,
            &r,
            &model.exploration_q,
            model.dims.measure_cost,
            model.dims.initial_state,
        )
    }

    /// Check sizes, key ranges and that every stored row is a distribution.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.state_size < 2 || self.action_size == 0 {
            return Err(ModelError::Shape(format!(
                "StateSize must be at least 2 and ActionSize positive, got {} and {}",
                self.state_size, self.action_size
            )));
        }
        if self.s_init >= self.state_size - 1 {
            return Err(ModelError::Shape(format!(
                "s_init {} is the done state or beyond (StateSize {})",
                self.s_init, self.state_size
            )));
        }
        check_dense("R", &self.r, self.state_size, self.action_size)?;
        if !self.q.is_empty() {
            check_dense("Q", &self.q, self.state_size, self.action_size)?;
        }
        check_sparse("P", &self.p, self.state_size, self.action_size, true)
    }

    /// Dense `P[s, a, s']`.
    pub fn dense_transitions(&self) -> Result<Array3<f64>, ModelError> {
        self.validate()?;
        Ok(dense(&self.p, self.state_size, self.action_size))
    }

    /// Dense `R[s, a]`.
    pub fn dense_rewards(&self) -> Result<Array2<f64>, ModelError> {
        check_dense("R", &self.r, self.state_size, self.action_size)?;
        to_array("R", &self.r, self.state_size, self.action_size)
    }

    /// Dense `Q[s, a]`, or `None` when the model carries no values.
    pub fn dense_values(&self) -> Result<Option<Array2<f64>>, ModelError> {
        if self.q.is_empty() {
            return Ok(None);
        }
        check_dense("Q", &self.q, self.state_size, self.action_size)?;
        to_array("Q", &self.q, self.state_size, self.action_size).map(Some)
    }

    /// Write the model as JSON.
    pub fn export(&self, path: &Path) -> Result<(), ModelError> {
        write_json(self, path)
    }

    /// Read and validate a model.
    pub fn import(path: &Path) -> Result<Self, ModelError> {
        let model: Self = read_json(path)?;
        model.validate()?;
        Ok(model)
    }
}

/// An explicit model with per-transition uncertainty bounds and the
/// worst-case (robust MDP) tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustModel {
    #[serde(rename = "P")]
    pub p: SparseTransitions,
    #[serde(rename = "R")]
    pub r: Vec<Vec<f64>>,
    #[serde(rename = "Q", default)]
    pub q: Vec<Vec<f64>>,
    #[serde(rename = "StateSize")]
    pub state_size: usize,
    #[serde(rename = "ActionSize")]
    pub action_size: usize,
    #[serde(rename = "MeasureCost")]
    pub measure_cost: f64,
    pub s_init: usize,
    #[serde(rename = "Pmin")]
    pub p_min: SparseTransitions,
    #[serde(rename = "Pmax")]
    pub p_max: SparseTransitions,
    /// Adversarial transitions realised by the robust solver.
    #[serde(rename = "PrMdp")]
    pub pr_mdp: SparseTransitions,
    /// Robust values.
    #[serde(rename = "QrMdp")]
    pub qr_mdp: Vec<Vec<f64>>,
}

impl RobustModel {
    /// Package a solved ICVaR model.
    ///
    /// Every stored transition gets the bounds `[p - alpha, p + alpha]`
    /// clipped to `[0, 1]`.
    pub fn from_solver(solver: &IcvarSolver) -> Self {
        let dims = solver.dims();
        let alpha = solver.config().perturbation_budget;
        let p = sparse(solver.p());
        let bound = |shift: f64| -> SparseTransitions {
            p.iter()
                .map(|(&s, actions)| {
                    let actions = actions
                        .iter()
                        .map(|(&a, row)| {
                            let row = row
                                .iter()
                                .map(|(&next, &prob)| (next, (prob + shift).clamp(0.0, 1.0)))
                                .collect();
                            (a, row)
                        })
                        .collect();
                    (s, actions)
                })
                .collect()
        };

        Self {
            p_min: bound(-alpha),
            p_max: bound(alpha),
            pr_mdp: sparse(solver.delta_p()),
            qr_mdp: rows(solver.icvar()),
            r: rows(solver.r()),
            q: rows(solver.q()),
            state_size: dims.state_size,
            action_size: dims.physical_actions,
            measure_cost: dims.measure_cost,
            s_init: dims.initial_state,
            p,
        }
    }

    /// The nominal part of the model.
    pub fn explicit(&self) -> ExplicitModel {
        ExplicitModel {
            p: self.p.clone(),
            r: self.r.clone(),
            q: self.q.clone(),
            state_size: self.state_size,
            action_size: self.action_size,
            measure_cost: self.measure_cost,
            s_init: self.s_init,
        }
    }

    /// Check the nominal part, the bound tables and the robust tables.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.explicit().validate()?;
        check_sparse("Pmin", &self.p_min, self.state_size, self.action_size, false)?;
        check_sparse("Pmax", &self.p_max, self.state_size, self.action_size, false)?;
        check_sparse("PrMdp", &self.pr_mdp, self.state_size, self.action_size, true)?;
        check_dense("QrMdp", &self.qr_mdp, self.state_size, self.action_size)
    }

    pub fn export(&self, path: &Path) -> Result<(), ModelError> {
        write_json(self, path)
    }

    pub fn import(path: &Path) -> Result<Self, ModelError> {
        let model: Self = read_json(path)?;
        model.validate()?;
        Ok(model)
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ModelError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(target: event_names::MODEL_EXPORTED, path = %path.display(), "Model written");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ModelError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn sparse(table: &Array3<f64>) -> SparseTransitions {
    let (states, actions, next_states) = table.dim();
    let mut out = SparseTransitions::new();
    for s in 0..states {
        let by_action = out.entry(s).or_default();
        for a in 0..actions {
            let row = by_action.entry(a).or_default();
            for next in 0..next_states {
                let prob = table[[s, a, next]];
                if prob != 0.0 {
                    row.insert(next, prob);
                }
            }
        }
    }
    out
}

fn dense(table: &SparseTransitions, states: usize, actions: usize) -> Array3<f64> {
    let mut out = Array3::<f64>::zeros((states, actions, states));
    for (&s, by_action) in table {
        for (&a, row) in by_action {
            for (&next, &prob) in row {
                out[[s, a, next]] = prob;
            }
        }
    }
    out
}

fn rows(table: &Array2<f64>) -> Vec<Vec<f64>> {
    table.outer_iter().map(|row| row.to_vec()).collect()
}

fn to_array(
    name: &str,
    data: &[Vec<f64>],
    states: usize,
    actions: usize,
) -> Result<Array2<f64>, ModelError> {
    let flat: Vec<f64> = data.iter().flatten().copied().collect();
    Array2::from_shape_vec((states, actions), flat)
        .map_err(|e| ModelError::Shape(format!("{}: {}", name, e)))
}

fn check_dense(
    name: &str,
    rows: &[Vec<f64>],
    states: usize,
    actions: usize,
) -> Result<(), ModelError> {
    if rows.len() != states {
        return Err(ModelError::Shape(format!(
            "{} has {} rows, expected {}",
            name,
            rows.len(),
            states
        )));
    }
    if let Some((s, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != actions) {
        return Err(ModelError::Shape(format!(
            "{}[{}] has {} entries, expected {}",
            name,
            s,
            row.len(),
            actions
        )));
    }
    Ok(())
}

/// `[0, 1]` widened by the row tolerance to absorb rounding in computed tables.
fn in_unit_interval(value: f64) -> bool {
    value.is_finite() && (-ROW_TOLERANCE..=1.0 + ROW_TOLERANCE).contains(&value)
}

fn check_sparse(
    name: &'static str,
    table: &SparseTransitions,
    states: usize,
    actions: usize,
    distributions: bool,
) -> Result<(), ModelError> {
    for (&s, by_action) in table {
        if s >= states {
            return Err(ModelError::Shape(format!("{} has state key {} >= {}", name, s, states)));
        }
        for (&a, row) in by_action {
            if a >= actions {
                return Err(ModelError::Shape(format!(
                    "{}[{}] has action key {} >= {}",
                    name, s, a, actions
                )));
            }
            for (&next, &value) in row {
                if next >= states || !in_unit_interval(value) {
                    return Err(ModelError::Probability {
                        table: name,
                        state: s,
                        action: a,
                        next,
                        value,
                    });
                }
            }
            let sum: f64 = row.values().sum();
            if distributions && !row.is_empty() && (sum - 1.0).abs() > ROW_TOLERANCE {
                return Err(ModelError::RowMass {
                    table: name,
                    state: s,
                    action: a,
                    sum,
                });
            }
        }
    }
    Ok(())
}

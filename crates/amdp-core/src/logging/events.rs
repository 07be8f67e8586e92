//! Stable event names and stages for structured logs.
//!
//! Event names double as `tracing` targets, so a JSONL consumer can filter on
//! the `target` field.

use serde::{Deserialize, Serialize};

/// Pipeline stage carried on CLI-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Sampling the environment into a model.
    Learn,
    /// Robust value iteration.
    Solve,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Learn => "learn",
            Stage::Solve => "solve",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Learn stage
    pub const LEARN_STARTED: &str = "learn.started";
    pub const LEARN_PROGRESS: &str = "learn.progress";
    pub const LEARN_FINISHED: &str = "learn.finished";

    // Solve stage
    pub const SOLVE_STARTED: &str = "solve.started";
    pub const SOLVE_SWEEP: &str = "solve.sweep";
    pub const SOLVE_FINISHED: &str = "solve.finished";

    // Model files
    pub const MODEL_LOADED: &str = "model.loaded";
    pub const MODEL_EXPORTED: &str = "model.exported";

    // Config/init events
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";

    // Failures, keyed by exit code
    pub const ARGS_ERROR: &str = "args.error";
    pub const MODEL_ERROR: &str = "model.error";
    pub const IO_ERROR: &str = "io.error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Correlation data attached to every CLI-level event.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Unique ID for this invocation.
    pub run_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
        }
    }
}

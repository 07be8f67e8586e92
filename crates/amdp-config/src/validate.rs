//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::solver::{IcvarConfig, LearnerConfig, SolverConfig};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

/// Validate a solver configuration semantically.
pub fn validate_config(config: &SolverConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    validate_learner(&config.learner)?;
    validate_icvar(&config.icvar)?;

    Ok(())
}

/// Validate the model learner section.
pub fn validate_learner(learner: &LearnerConfig) -> ValidationResult<()> {
    positive_count("learner.episodes", learner.episodes)?;
    positive_count("learner.max_steps", learner.max_steps)?;

    if !(learner.learning_rate > 0.0 && learner.learning_rate <= 1.0) {
        return Err(invalid(
            "learner.learning_rate",
            format!("Must be in (0, 1], got {}", learner.learning_rate),
        ));
    }
    discount("learner.discount_factor", learner.discount_factor)?;
    non_negative("learner.measurement_cost_weight", learner.measurement_cost_weight)?;
    non_negative("learner.self_loop_penalty", learner.self_loop_penalty)?;
    non_negative("learner.terminal_penalty", learner.terminal_penalty)?;

    if !(learner.filter_threshold_cap > 0.0 && learner.filter_threshold_cap <= 1.0) {
        return Err(invalid(
            "learner.filter_threshold_cap",
            format!("Must be in (0, 1], got {}", learner.filter_threshold_cap),
        ));
    }

    Ok(())
}

/// Validate the ICVaR solver section.
pub fn validate_icvar(icvar: &IcvarConfig) -> ValidationResult<()> {
    let alpha = icvar.perturbation_budget;
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(invalid(
            "icvar.perturbation_budget",
            format!("Must be in (0, 1], got {}", alpha),
        ));
    }
    discount("icvar.discount_factor", icvar.discount_factor)?;

    if !(0.0..=1.0).contains(&icvar.exploration_epsilon) {
        return Err(invalid(
            "icvar.exploration_epsilon",
            format!("Must be in [0, 1], got {}", icvar.exploration_epsilon),
        ));
    }
    positive_count("icvar.updates", icvar.updates)?;

    Ok(())
}

fn invalid(field: &str, message: String) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message,
    }
}

fn positive_count(field: &str, value: usize) -> ValidationResult<()> {
    if value == 0 {
        return Err(invalid(field, "Must be positive".to_string()));
    }
    Ok(())
}

fn discount(field: &str, value: f64) -> ValidationResult<()> {
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(field, format!("Must be in [0, 1), got {}", value)));
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> ValidationResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(
            field,
            format!("Must be finite and non-negative, got {}", value),
        ));
    }
    Ok(())
}

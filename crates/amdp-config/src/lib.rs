//! Active-measurement MDP solver configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the solver configuration (JSON or TOML)
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation

pub mod resolve;
pub mod solver;
pub mod validate;

pub use resolve::{resolve_config, ConfigSource, ResolvedPath};
pub use solver::{ActionBlock, IcvarConfig, LearnerConfig, SolverConfig, SweepMode};
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

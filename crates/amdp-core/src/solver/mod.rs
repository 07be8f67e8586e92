//! Value iteration over learned models.

pub mod icvar;

pub use icvar::{IcvarError, IcvarSolver, SolveReport};

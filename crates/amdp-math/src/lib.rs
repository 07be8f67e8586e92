//! Active-measurement MDP math utilities.

pub mod math;

pub use math::redistribute::*;
pub use math::table::*;

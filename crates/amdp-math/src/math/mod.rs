//! Core math modules.

pub mod redistribute;
pub mod table;

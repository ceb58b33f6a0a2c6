//! Small shared utilities.

pub mod constants;

pub use constants::*;

//! Merit functions, constraint layout and multiplier estimation
mod constraints;
mod merit_engine;

pub use constraints::*;
pub use merit_engine::*;

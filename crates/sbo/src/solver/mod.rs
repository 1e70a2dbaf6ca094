//! Trust region surrogate-based optimizer: configuration, state and
//! the [argmin::core::Solver] implementation.
mod pareto_filter;
mod refresh;
mod relaxation;
mod sbo_config;
mod sbo_solver;
mod sbo_state;
mod solver_impl;
mod subproblem;
mod tr_state;
mod trust_region;

pub use pareto_filter::*;
pub use refresh::SurrogateRefresh;
pub use relaxation::*;
pub use sbo_config::*;
pub use sbo_solver::*;
pub use sbo_state::*;
pub use tr_state::*;

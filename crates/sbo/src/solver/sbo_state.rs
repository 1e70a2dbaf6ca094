//! Implementation of `argmin::IterState` for the trust region optimizer
use crate::solver::{TrStatus, TrustRegionState};

use argmin::core::{Problem, State, TerminationReason, TerminationStatus};
use ndarray::Array1;
use std::collections::HashMap;

/// Maintains the state from iteration to iteration of the [crate::TrustRegionSolver].
///
/// The current parameter vector is the trust region center, the cost is the
/// truth merit value at the center. As a candidate only becomes the center
/// when accepted, the best parameter vector is the current center.
#[derive(Clone, Debug)]
pub struct SboState {
    /// Current parameter vector (trust region center)
    pub param: Option<Array1<f64>>,
    /// Previous parameter vector
    pub prev_param: Option<Array1<f64>>,
    /// Current best parameter vector
    pub best_param: Option<Array1<f64>>,
    /// Previous best parameter vector
    pub prev_best_param: Option<Array1<f64>>,

    /// Truth function values at the current parameter vector
    /// `[primary fns | inequalities | equalities]`
    pub cost: Option<Array1<f64>>,
    /// Previous truth function values
    pub prev_cost: Option<Array1<f64>>,
    /// Truth function values at the best parameter vector
    pub best_cost: Option<Array1<f64>>,
    /// Previous best truth function values
    pub prev_best_cost: Option<Array1<f64>>,
    /// Truth merit value at the current parameter vector
    pub merit: f64,
    /// Truth merit value at the best parameter vector
    pub best_merit: f64,
    /// Target merit value
    pub target_cost: f64,

    /// Current iteration
    pub iter: u64,
    /// Iteration number of last best cost
    pub last_best_iter: u64,
    /// Maximum number of iterations
    pub max_iters: u64,
    /// Evaluation counts
    pub counts: HashMap<String, u64>,
    /// Time required so far
    pub time: Option<web_time::Duration>,
    /// Optimization status
    pub termination_status: TerminationStatus,

    /// Trust region data
    pub tr_state: TrustRegionState,
    /// Constraint relaxation progress (1 means original constraints)
    pub tau: f64,
}

impl SboState {
    /// Set parameter vector. This shifts the stored parameter vector to the previous parameter
    /// vector.
    ///
    /// ```
    /// # use argmin::core::State;
    /// # use trbox_sbo::SboState;
    /// # use ndarray::array;
    /// let state = SboState::new().param(array![1.0, 2.0]);
    /// # assert!(state.prev_param.is_none());
    /// let state = state.param(array![0.0, 3.0]);
    /// assert_eq!(state.prev_param, Some(array![1.0, 2.0]));
    /// ```
    #[must_use]
    pub fn param(mut self, param: Array1<f64>) -> Self {
        std::mem::swap(&mut self.prev_param, &mut self.param);
        self.param = Some(param);
        self
    }

    /// Set the truth function values at the current parameter vector.
    /// This shifts the stored values to the previous ones.
    #[must_use]
    pub fn cost(mut self, cost: Array1<f64>) -> Self {
        std::mem::swap(&mut self.prev_cost, &mut self.cost);
        self.cost = Some(cost);
        self
    }

    /// Set maximum number of iterations
    #[must_use]
    pub fn max_iters(mut self, iters: u64) -> Self {
        self.max_iters = iters;
        self
    }

    /// Returns truth function values at the best parameter vector
    pub fn get_full_best_cost(&self) -> Option<&Array1<f64>> {
        self.best_cost.as_ref()
    }

    /// Trust region data
    pub fn trust_region(&self) -> &TrustRegionState {
        &self.tr_state
    }

    /// Convergence bits currently set (empty while iterating)
    pub fn converged(&self) -> TrStatus {
        self.tr_state.converged()
    }
}

impl State for SboState {
    /// Type of parameter vector
    type Param = Array1<f64>;
    /// Floating point precision
    type Float = f64;

    /// Create new `SboState` instance
    ///
    /// ```
    /// # use argmin::core::{State, TerminationStatus};
    /// use trbox_sbo::SboState;
    /// let state = SboState::new();
    /// # assert!(state.param.is_none());
    /// # assert_eq!(state.iter, 0);
    /// # assert_eq!(state.max_iters, u64::MAX);
    /// # assert_eq!(state.termination_status, TerminationStatus::NotTerminated);
    /// ```
    fn new() -> Self {
        SboState {
            param: None,
            prev_param: None,
            best_param: None,
            prev_best_param: None,

            cost: None,
            prev_cost: None,
            best_cost: None,
            prev_best_cost: None,
            merit: f64::INFINITY,
            best_merit: f64::INFINITY,
            target_cost: f64::NEG_INFINITY,

            iter: 0,
            last_best_iter: 0,
            max_iters: u64::MAX,
            counts: HashMap::new(),
            time: Some(web_time::Duration::new(0, 0)),
            termination_status: TerminationStatus::NotTerminated,

            tr_state: TrustRegionState::default(),
            tau: 1.,
        }
    }

    /// The trust region center is the best point so far: best values follow
    /// the current ones whenever the center moved.
    fn update(&mut self) {
        let Some(param) = self.param.as_ref() else {
            return;
        };
        if self.best_param.as_ref() != Some(param) || self.best_cost.is_none() {
            std::mem::swap(&mut self.prev_best_param, &mut self.best_param);
            self.best_param = Some(param.clone());
            std::mem::swap(&mut self.prev_best_cost, &mut self.best_cost);
            self.best_cost = self.cost.clone();
            self.last_best_iter = self.iter;
        }
        self.best_merit = self.merit;
    }

    fn get_param(&self) -> Option<&Array1<f64>> {
        self.param.as_ref()
    }

    fn get_best_param(&self) -> Option<&Array1<f64>> {
        self.best_param.as_ref()
    }

    fn terminate_with(mut self, reason: TerminationReason) -> Self {
        self.termination_status = TerminationStatus::Terminated(reason);
        self
    }

    fn time(&mut self, time: Option<web_time::Duration>) -> &mut Self {
        self.time = time;
        self
    }

    fn get_cost(&self) -> f64 {
        self.merit
    }

    fn get_best_cost(&self) -> f64 {
        self.best_merit
    }

    fn get_target_cost(&self) -> f64 {
        self.target_cost
    }

    fn get_iter(&self) -> u64 {
        self.iter
    }

    fn get_last_best_iter(&self) -> u64 {
        self.last_best_iter
    }

    fn get_max_iters(&self) -> u64 {
        self.max_iters
    }

    fn get_termination_status(&self) -> &TerminationStatus {
        &self.termination_status
    }

    fn get_termination_reason(&self) -> Option<&TerminationReason> {
        match &self.termination_status {
            TerminationStatus::Terminated(reason) => Some(reason),
            TerminationStatus::NotTerminated => None,
        }
    }

    fn get_time(&self) -> Option<web_time::Duration> {
        self.time
    }

    fn increment_iter(&mut self) {
        self.iter += 1;
    }

    fn func_counts<O>(&mut self, problem: &Problem<O>) {
        for (k, &v) in problem.counts.iter() {
            let count = self.counts.entry(k.to_string()).or_insert(0);
            *count = v
        }
    }

    fn get_func_counts(&self) -> &HashMap<String, u64> {
        &self.counts
    }

    fn is_best(&self) -> bool {
        self.last_best_iter == self.iter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_best_follows_center() {
        let mut state = SboState::new().param(array![1., 1.]).cost(array![3.]);
        state.merit = 3.;
        state.update();
        assert_eq!(state.get_best_param(), Some(&array![1., 1.]));
        assert_eq!(state.get_best_cost(), 3.);
        assert!(state.is_best());

        state.increment_iter();
        state.update();
        assert!(!state.is_best());
        assert_eq!(state.get_last_best_iter(), 0);

        let mut state = state.param(array![0.5, 1.]).cost(array![1.]);
        state.merit = 1.;
        state.update();
        assert!(state.is_best());
        assert_eq!(state.prev_best_param, Some(array![1., 1.]));
        assert_eq!(state.get_full_best_cost(), Some(&array![1.]));
    }

    #[test]
    fn test_terminate_with_reason() {
        let state = SboState::new()
            .terminate_with(TerminationReason::SolverExit("trust region size below minimum".into()));
        assert_eq!(
            state.get_termination_reason(),
            Some(&TerminationReason::SolverExit(
                "trust region size below minimum".to_string()
            ))
        );
    }
}

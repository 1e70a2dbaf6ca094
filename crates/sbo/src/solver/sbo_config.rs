//! Trust region surrogate-based optimizer configuration.
use crate::errors::{Result, SboError};
use crate::merit::{ConstraintBounds, PrimaryReduction};
use crate::optimizers::SUBPROBLEM_MAX_EVAL_DEFAULT;
use crate::types::*;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Trust region sizing parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustRegionConfig {
    /// Initial trust region size as a fraction of the global variable range
    pub initial_factor: f64,
    /// Optimization stops once the trust region factor falls below this value
    pub min_factor: f64,
    /// Trust region contracts when ratio is below or equal to this value
    pub contract_threshold: f64,
    /// Trust region may expand when ratio is within `1 - expand_threshold` of 1
    pub expand_threshold: f64,
    /// Contraction multiplier
    pub gamma_contract: f64,
    /// Expansion multiplier
    pub gamma_expand: f64,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        TrustRegionConfig {
            initial_factor: 0.4,
            min_factor: 1e-6,
            contract_threshold: 0.25,
            expand_threshold: 0.75,
            gamma_contract: 0.25,
            gamma_expand: 2.0,
        }
    }
}

/// Penalty parameters of the penalty and augmented Lagrangian merit functions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Initial penalty parameter (augmented Lagrangian)
    pub initial_penalty: f64,
    /// Exponent of the forcing sequence reset when penalty increases
    pub alpha_eta: f64,
    /// Exponent of the forcing sequence decrease when multipliers are updated
    pub beta_eta: f64,
    /// Forcing sequence scale
    pub eta: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        PenaltyConfig {
            initial_penalty: 5.0,
            alpha_eta: 0.1,
            beta_eta: 0.9,
            eta: 1.0,
        }
    }
}

/// Constraint relaxation (homotopy) parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelaxationConfig {
    /// Whether constraints are relaxed when the center is infeasible
    pub enabled: bool,
    /// Damping of the relaxation parameter update
    pub alpha: f64,
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        RelaxationConfig {
            enabled: false,
            alpha: 0.9,
        }
    }
}

/// Trust region surrogate-based optimizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SboConfig {
    /// Initial trust region center (defaults to the middle of the variable bounds)
    pub(crate) x_start: Option<Array1<f64>>,
    /// Max number of outer iterations
    pub(crate) max_iters: usize,
    /// Tolerance used by hard and soft convergence tests
    pub(crate) convergence_tol: f64,
    /// Tolerance under which a constraint violation is ignored
    pub(crate) constraint_tol: f64,
    /// Number of consecutive non improving iterations triggering soft convergence
    pub(crate) soft_conv_limit: usize,
    /// Trust region sizing
    pub(crate) trust_region: TrustRegionConfig,
    /// Penalty parameters
    pub(crate) penalty: PenaltyConfig,
    /// Constraint relaxation
    pub(crate) relaxation: RelaxationConfig,
    /// Merit function used to accept candidates and size the trust region
    pub(crate) merit_fn: MeritFnType,
    /// Acceptance logic
    pub(crate) acceptance: AcceptanceLogic,
    /// Subproblem objective
    pub(crate) subproblem_objective: SubproblemObjective,
    /// Subproblem constraints
    pub(crate) subproblem_constraints: SubproblemConstraints,
    /// Discrepancy correction form
    pub(crate) correction_type: CorrectionType,
    /// Discrepancy correction order
    pub(crate) correction_order: CorrectionOrder,
    /// Approximation built when no lower fidelity model is given
    pub(crate) approx: ApproxSpec,
    /// Number of points sampled to build global approximations (besides the center)
    pub(crate) global_samples: Option<usize>,
    /// Subproblem optimizer
    pub(crate) optimizer: SubproblemOptimizer,
    /// Max number of approximation evaluations by the subproblem optimizer
    pub(crate) subproblem_max_eval: usize,
    /// Number of primary functions
    pub(crate) n_obj: usize,
    /// Optional primary functions weights (default to 1)
    pub(crate) weights: Option<Array1<f64>>,
    /// Optimization sense
    pub(crate) sense: Sense,
    /// Whether primary functions are least squares residuals
    pub(crate) least_squares: bool,
    /// Nonlinear constraints bounds
    pub(crate) cstr_bounds: ConstraintBounds,
    /// Whether truth evaluations skip the surrogate layer of the truth model
    pub(crate) truth_bypass: bool,
    /// Directory where configuration and history are saved
    pub(crate) outdir: Option<String>,
    /// A random generator seed used to get reproductible results
    pub(crate) seed: Option<u64>,
}

impl Default for SboConfig {
    fn default() -> Self {
        SboConfig {
            x_start: None,
            max_iters: 100,
            convergence_tol: 1e-4,
            constraint_tol: 1e-4,
            soft_conv_limit: 5,
            trust_region: TrustRegionConfig::default(),
            penalty: PenaltyConfig::default(),
            relaxation: RelaxationConfig::default(),
            merit_fn: MeritFnType::AugmentedLagrangian,
            acceptance: AcceptanceLogic::Filter,
            subproblem_objective: SubproblemObjective::OriginalPrimary,
            subproblem_constraints: SubproblemConstraints::Original,
            correction_type: CorrectionType::Additive,
            correction_order: CorrectionOrder::First,
            approx: ApproxSpec::LocalTaylor,
            global_samples: None,
            optimizer: SubproblemOptimizer::Slsqp,
            subproblem_max_eval: SUBPROBLEM_MAX_EVAL_DEFAULT,
            n_obj: 1,
            weights: None,
            sense: Sense::Minimize,
            least_squares: false,
            cstr_bounds: ConstraintBounds::unconstrained(),
            truth_bypass: false,
            outdir: None,
            seed: None,
        }
    }
}

impl SboConfig {
    /// Sets the initial trust region center
    pub fn x_start(mut self, x_start: &Array1<f64>) -> Self {
        self.x_start = Some(x_start.to_owned());
        self
    }

    /// Sets max number of outer iterations
    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Sets convergence tolerance
    pub fn convergence_tol(mut self, tol: f64) -> Self {
        self.convergence_tol = tol;
        self
    }

    /// Sets constraint violation tolerance
    pub fn constraint_tol(mut self, tol: f64) -> Self {
        self.constraint_tol = tol;
        self
    }

    /// Sets the number of consecutive non improving iterations triggering soft convergence
    pub fn soft_conv_limit(mut self, limit: usize) -> Self {
        self.soft_conv_limit = limit;
        self
    }

    /// Sets trust region parameters
    pub fn trust_region(mut self, trust_region: TrustRegionConfig) -> Self {
        self.trust_region = trust_region;
        self
    }

    /// Sets initial trust region factor
    pub fn initial_tr_factor(mut self, factor: f64) -> Self {
        self.trust_region.initial_factor = factor;
        self
    }

    /// Sets minimum trust region factor
    pub fn min_tr_factor(mut self, factor: f64) -> Self {
        self.trust_region.min_factor = factor;
        self
    }

    /// Sets penalty parameters
    pub fn penalty(mut self, penalty: PenaltyConfig) -> Self {
        self.penalty = penalty;
        self
    }

    /// Enables or disables constraint relaxation with given damping
    pub fn relaxation(mut self, enabled: bool, alpha: f64) -> Self {
        self.relaxation = RelaxationConfig { enabled, alpha };
        self
    }

    /// Sets merit function
    pub fn merit_fn(mut self, merit_fn: MeritFnType) -> Self {
        self.merit_fn = merit_fn;
        self
    }

    /// Sets acceptance logic
    pub fn acceptance(mut self, acceptance: AcceptanceLogic) -> Self {
        self.acceptance = acceptance;
        self
    }

    /// Sets subproblem objective
    pub fn subproblem_objective(mut self, objective: SubproblemObjective) -> Self {
        self.subproblem_objective = objective;
        self
    }

    /// Sets subproblem constraints
    pub fn subproblem_constraints(mut self, constraints: SubproblemConstraints) -> Self {
        self.subproblem_constraints = constraints;
        self
    }

    /// Sets discrepancy correction
    pub fn correction(mut self, kind: CorrectionType, order: CorrectionOrder) -> Self {
        self.correction_type = kind;
        self.correction_order = order;
        self
    }

    /// Sets approximation built when no lower fidelity model is given
    pub fn approximation(mut self, approx: ApproxSpec) -> Self {
        self.approx = approx;
        self
    }

    /// Sets the number of points sampled to build global approximations
    pub fn global_samples(mut self, n_samples: usize) -> Self {
        self.global_samples = Some(n_samples);
        self
    }

    /// Sets subproblem optimizer
    pub fn optimizer(mut self, optimizer: SubproblemOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Sets max number of approximation evaluations per subproblem optimization
    pub fn subproblem_max_eval(mut self, max_eval: usize) -> Self {
        self.subproblem_max_eval = max_eval;
        self
    }

    /// Sets number of primary functions (objectives or least squares residuals)
    pub fn n_obj(mut self, n_obj: usize) -> Self {
        self.n_obj = n_obj;
        self
    }

    /// Sets primary functions weights
    pub fn weights(mut self, weights: &Array1<f64>) -> Self {
        self.weights = Some(weights.to_owned());
        self
    }

    /// Sets optimization sense
    pub fn sense(mut self, sense: Sense) -> Self {
        self.sense = sense;
        self
    }

    /// Declares primary functions as least squares residuals
    pub fn least_squares(mut self, least_squares: bool) -> Self {
        self.least_squares = least_squares;
        self
    }

    /// Sets nonlinear inequality constraints bounds `lower <= g(x) <= upper`
    pub fn inequality_bounds(mut self, lower: &Array1<f64>, upper: &Array1<f64>) -> Self {
        self.cstr_bounds.ineq_lower = lower.to_owned();
        self.cstr_bounds.ineq_upper = upper.to_owned();
        self
    }

    /// Sets nonlinear equality constraints targets `h(x) = targets`
    pub fn equality_targets(mut self, targets: &Array1<f64>) -> Self {
        self.cstr_bounds.eq_targets = targets.to_owned();
        self
    }

    /// Requests truth evaluations skipping the surrogate layer of the truth model
    pub fn truth_bypass(mut self, bypass: bool) -> Self {
        self.truth_bypass = bypass;
        self
    }

    /// Sets a directory to write configuration and optimization history
    pub fn outdir(mut self, outdir: impl Into<String>) -> Self {
        self.outdir = Some(outdir.into());
        self
    }

    /// Sets a random seed for reproducibility
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn invalid<T>(msg: String) -> Result<T> {
        Err(SboError::InvalidConfigError(msg))
    }

    /// Checks configuration consistency for a problem with `n_vars` variables
    /// and a model returning `n_fns` functions.
    pub fn check(self, n_vars: usize, n_fns: usize) -> Result<ValidSboConfig> {
        if n_vars == 0 {
            return Self::invalid("no design variable".to_string());
        }
        if let Some(x_start) = self.x_start.as_ref() {
            if x_start.len() != n_vars {
                return Self::invalid(format!(
                    "starting point of size {} given for {} variables",
                    x_start.len(),
                    n_vars
                ));
            }
        }
        if self.n_obj == 0 {
            return Self::invalid("at least one primary function is required".to_string());
        }
        let bounds = &self.cstr_bounds;
        if bounds.ineq_lower.len() != bounds.ineq_upper.len() {
            return Self::invalid(format!(
                "inequality bounds sizes differ: lower={} upper={}",
                bounds.ineq_lower.len(),
                bounds.ineq_upper.len()
            ));
        }
        if bounds
            .ineq_lower
            .iter()
            .zip(bounds.ineq_upper.iter())
            .any(|(l, u)| l > u || l.is_nan() || u.is_nan())
        {
            return Self::invalid("inequality lower bound greater than upper bound".to_string());
        }
        if bounds.eq_targets.iter().any(|t| !t.is_finite()) {
            return Self::invalid("equality targets should be finite".to_string());
        }
        let expected = self.n_obj + bounds.n_cstr();
        if expected != n_fns {
            return Self::invalid(format!(
                "model returns {} functions, expected {} primary + {} inequality + {} equality",
                n_fns,
                self.n_obj,
                bounds.n_ineq(),
                bounds.n_eq()
            ));
        }
        if let Some(weights) = self.weights.as_ref() {
            if weights.len() != self.n_obj {
                return Self::invalid(format!(
                    "expected {} primary weights, got {}",
                    self.n_obj,
                    weights.len()
                ));
            }
        }
        if self.least_squares && self.sense == Sense::Maximize {
            return Self::invalid("least squares problems are minimized".to_string());
        }
        if self.max_iters == 0 || self.soft_conv_limit == 0 || self.subproblem_max_eval == 0 {
            return Self::invalid(
                "iteration limits should be strictly positive".to_string(),
            );
        }
        if self.convergence_tol <= 0. || self.constraint_tol < 0. {
            return Self::invalid("tolerances should be positive".to_string());
        }
        let tr = &self.trust_region;
        if !(tr.initial_factor > 0. && tr.initial_factor <= 1.) {
            return Self::invalid(format!(
                "initial trust region factor should be in ]0, 1], got {}",
                tr.initial_factor
            ));
        }
        if !(tr.min_factor > 0. && tr.min_factor < tr.initial_factor) {
            return Self::invalid(format!(
                "minimum trust region factor should be in ]0, {}[, got {}",
                tr.initial_factor, tr.min_factor
            ));
        }
        if !(0. < tr.contract_threshold && tr.contract_threshold < tr.expand_threshold && tr.expand_threshold <= 1.) {
            return Self::invalid(format!(
                "expected 0 < contract threshold < expand threshold <= 1, got {} and {}",
                tr.contract_threshold, tr.expand_threshold
            ));
        }
        if !(tr.gamma_contract > 0. && tr.gamma_contract < 1. && tr.gamma_expand >= 1.) {
            return Self::invalid(format!(
                "expected 0 < gamma contract < 1 <= gamma expand, got {} and {}",
                tr.gamma_contract, tr.gamma_expand
            ));
        }
        if self.penalty.initial_penalty <= 0. || self.penalty.eta <= 0. {
            return Self::invalid("penalty parameters should be strictly positive".to_string());
        }
        if !(self.relaxation.alpha > 0. && self.relaxation.alpha <= 1.) {
            return Self::invalid(format!(
                "relaxation damping should be in ]0, 1], got {}",
                self.relaxation.alpha
            ));
        }
        if self.global_samples == Some(0) {
            return Self::invalid("global approximation needs samples".to_string());
        }
        Ok(ValidSboConfig(self))
    }
}

/// A checked [`SboConfig`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidSboConfig(SboConfig);

impl Deref for ValidSboConfig {
    type Target = SboConfig;

    fn deref(&self) -> &SboConfig {
        &self.0
    }
}

impl ValidSboConfig {
    /// Reduction of primary functions to the objective
    pub fn reduction(&self) -> PrimaryReduction {
        PrimaryReduction {
            weights: self
                .weights
                .clone()
                .unwrap_or_else(|| Array1::ones(self.n_obj)),
            sense: self.sense,
            least_squares: self.least_squares,
        }
    }

    /// Whether nonlinear constraints are defined
    pub fn is_constrained(&self) -> bool {
        self.cstr_bounds.n_cstr() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_default_config() {
        let config = SboConfig::default().check(2, 1).unwrap();
        assert_eq!(config.max_iters, 100);
        assert_eq!(config.reduction(), PrimaryReduction::single());
        assert!(!config.is_constrained());
    }

    #[test]
    fn test_function_count_mismatch() {
        let res = SboConfig::default()
            .inequality_bounds(&array![f64::NEG_INFINITY], &array![0.])
            .check(2, 1);
        assert!(matches!(res, Err(SboError::InvalidConfigError(_))));
        let config = SboConfig::default()
            .inequality_bounds(&array![f64::NEG_INFINITY], &array![0.])
            .equality_targets(&array![1.])
            .check(2, 3)
            .unwrap();
        assert!(config.is_constrained());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SboConfig::default().initial_tr_factor(1.5).check(1, 1).is_err());
        assert!(SboConfig::default().min_tr_factor(0.5).check(1, 1).is_err());
        assert!(SboConfig::default()
            .least_squares(true)
            .sense(Sense::Maximize)
            .check(1, 1)
            .is_err());
        assert!(SboConfig::default()
            .inequality_bounds(&array![1.], &array![0.])
            .check(1, 2)
            .is_err());
        assert!(SboConfig::default()
            .n_obj(2)
            .weights(&array![1.])
            .check(1, 2)
            .is_err());
        assert!(SboConfig::default().relaxation(true, 0.).check(1, 1).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = SboConfig::default().seed(42).outdir("out");
        let json = serde_json::to_string(&config).unwrap();
        let back: SboConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seed, Some(42));
        assert_eq!(back.outdir.as_deref(), Some("out"));
    }
}

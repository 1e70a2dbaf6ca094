use crate::errors::{Result, SboError};
use crate::solver::{SboState, TrStatus};
use bitflags::bitflags;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Request vector specifying what a model evaluation has to compute.
    ///
    /// ```
    /// use trbox_sbo::ActiveSet;
    /// let asv = ActiveSet::VALUE | ActiveSet::GRADIENT;
    /// assert!(asv.contains(ActiveSet::GRADIENT));
    /// ```
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct ActiveSet: u8 {
        /// Function values
        const VALUE = 0x01;
        /// Function gradients
        const GRADIENT = 0x02;
        /// Function hessians
        const HESSIAN = 0x04;
    }
}

/// Values, and optionally derivatives, of the functions of a model at a given point.
///
/// Functions are ordered as `[primary functions | inequality constraints | equality constraints]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Function values
    pub fn_vals: Array1<f64>,
    /// Function gradients as a (n_fns, n_vars) matrix
    pub fn_grads: Option<Array2<f64>>,
    /// Function hessians, one (n_vars, n_vars) matrix per function
    pub fn_hessians: Option<Vec<Array2<f64>>>,
    /// Evaluation identifier (0 when not coming from a recorded evaluation)
    pub eval_id: usize,
}

impl Response {
    /// Constructor of a response holding only function values
    pub fn new(fn_vals: Array1<f64>) -> Self {
        Response {
            fn_vals,
            fn_grads: None,
            fn_hessians: None,
            eval_id: 0,
        }
    }

    /// Sets function gradients
    pub fn with_gradients(mut self, fn_grads: Array2<f64>) -> Self {
        self.fn_grads = Some(fn_grads);
        self
    }

    /// Sets function hessians
    pub fn with_hessians(mut self, fn_hessians: Vec<Array2<f64>>) -> Self {
        self.fn_hessians = Some(fn_hessians);
        self
    }

    /// Sets evaluation identifier
    pub fn with_eval_id(mut self, eval_id: usize) -> Self {
        self.eval_id = eval_id;
        self
    }

    /// Number of functions
    pub fn n_fns(&self) -> usize {
        self.fn_vals.len()
    }

    /// Whether the response holds everything requested by `asv`
    pub fn satisfies(&self, asv: ActiveSet) -> bool {
        (!asv.contains(ActiveSet::GRADIENT) || self.fn_grads.is_some())
            && (!asv.contains(ActiveSet::HESSIAN) || self.fn_hessians.is_some())
    }

    /// Function gradients or a [`SboError::MissingDerivative`] error
    pub fn gradients(&self) -> Result<&Array2<f64>> {
        self.fn_grads
            .as_ref()
            .ok_or_else(|| SboError::MissingDerivative("response without gradients".to_string()))
    }

    /// Checks response consistency against expected sizes
    pub fn check(&self, n_fns: usize, n_vars: usize) -> Result<()> {
        if self.fn_vals.len() != n_fns {
            return Err(SboError::ModelError(format!(
                "expected {} function values, got {}",
                n_fns,
                self.fn_vals.len()
            )));
        }
        if let Some(grads) = self.fn_grads.as_ref() {
            if grads.dim() != (n_fns, n_vars) {
                return Err(SboError::ModelError(format!(
                    "expected gradients of shape ({}, {}), got {:?}",
                    n_fns,
                    n_vars,
                    grads.dim()
                )));
            }
        }
        Ok(())
    }
}

/// Response slot selector: (truth | approximation) x (corrected | uncorrected)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    /// Approximate response with discrepancy correction applied
    CorrectedApprox,
    /// Raw approximate response
    UncorrectedApprox,
    /// Truth response as seen through the (possibly layered) truth model
    CorrectedTruth,
    /// Raw truth response
    UncorrectedTruth,
}

/// Approximation families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproxKind {
    /// Response surface fitted over samples of the trust region
    Global,
    /// Series expansion at the trust region center
    Local,
    /// Expansion using the current and previous centers
    Multipoint,
    /// Lower fidelity model
    Hierarchical,
}

/// Approximation built by the optimizer when no lower fidelity model is given
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproxSpec {
    /// First order Taylor series (second order when truth hessians are available)
    LocalTaylor,
    /// Two point adaptive expansion
    MultipointTwoPoint,
    /// Polynomial response surface of given degree
    GlobalPolynomial(PolynomialDegree),
}

/// Degree of the polynomial response surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolynomialDegree {
    /// 1 + n coefficients
    Linear,
    /// (n + 1)(n + 2) / 2 coefficients
    Quadratic,
}

/// Merit function used to accept a candidate and size the trust region
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeritFnType {
    /// Objective plus multipliers times active constraints
    Lagrangian,
    /// Objective plus augmented Lagrangian terms for every constraint
    AugmentedLagrangian,
    /// Objective plus exponentially ramped quadratic penalty
    Penalty,
    /// Objective plus quadratic penalty ramped only when required
    AdaptivePenalty,
}

/// Candidate acceptance logic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptanceLogic {
    /// Accept on truth merit decrease
    TrRatio,
    /// Accept when not dominated by the (objective, violation) filter
    Filter,
}

/// Objective of the approximate subproblem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubproblemObjective {
    /// Primary functions reduced to one objective
    OriginalPrimary,
    /// Lagrangian merit function
    Lagrangian,
    /// Augmented Lagrangian merit function
    AugmentedLagrangian,
}

/// Constraints of the approximate subproblem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubproblemConstraints {
    /// Only trust region bounds
    NoConstraints,
    /// First order expansion of the approximate constraints at the center
    Linearized,
    /// Approximate constraints
    Original,
}

/// Discrepancy correction form
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionType {
    /// truth ~ approx + delta
    Additive,
    /// truth ~ approx * beta
    Multiplicative,
}

/// Discrepancy correction order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionOrder {
    /// Match values at the center
    Zeroth,
    /// Match values and gradients at the center
    First,
}

/// Optimizer used to solve subproblems
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubproblemOptimizer {
    /// Gradient free COBYLA
    Cobyla,
    /// Gradient based SLSQP
    Slsqp,
}

/// Sense of primary functions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    /// Minimization
    Minimize,
    /// Maximization
    Maximize,
}

/// Optimization result
#[derive(Clone, Debug)]
pub struct OptimResult {
    /// Final trust region center
    pub x_opt: Array1<f64>,
    /// Truth function values at `x_opt`
    pub y_opt: Array1<f64>,
    /// Truth merit function value at `x_opt`
    pub merit: f64,
    /// Convergence status bits
    pub status: TrStatus,
    /// Number of outer iterations
    pub iterations: u64,
    /// Optimizer final state
    pub state: SboState,
}

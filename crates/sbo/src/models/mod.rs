//! Truth models, approximations and their collaborators (evaluation cache,
//! discrepancy correction) used by the trust region optimizer.
use crate::errors::Result;
use crate::types::{ActiveSet, ApproxKind, Response};
use ndarray::ArrayView1;

mod correction;
mod eval_cache;
mod fn_model;
mod hierarchical;
mod polynomial;
mod taylor;
mod two_point;

pub use correction::*;
pub use eval_cache::*;
pub use fn_model::*;
pub use hierarchical::*;
pub use polynomial::*;
pub use taylor::*;
pub use two_point::*;

/// An expensive model evaluated at trust region centers and candidates.
///
/// Function values are ordered as `[primary fns | nonlinear inequalities | nonlinear equalities]`.
pub trait TruthModel: Send + Sync {
    /// Number of input variables
    fn n_vars(&self) -> usize;
    /// Number of output functions
    fn n_fns(&self) -> usize;
    /// Evaluates the functions (and the derivatives requested by `asv`) at `x`
    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response>;
    /// Whether gradients can be requested
    fn supports_gradients(&self) -> bool;
    /// Whether hessians can be requested
    fn supports_hessians(&self) -> bool {
        false
    }
    /// Evaluation skipping any surrogate layer owned by the model itself
    fn evaluate_bypass(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        self.evaluate(x, asv)
    }
}

impl<T: TruthModel + ?Sized> TruthModel for Box<T> {
    fn n_vars(&self) -> usize {
        (**self).n_vars()
    }
    fn n_fns(&self) -> usize {
        (**self).n_fns()
    }
    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        (**self).evaluate(x, asv)
    }
    fn supports_gradients(&self) -> bool {
        (**self).supports_gradients()
    }
    fn supports_hessians(&self) -> bool {
        (**self).supports_hessians()
    }
    fn evaluate_bypass(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        (**self).evaluate_bypass(x, asv)
    }
}

/// Truth evaluation callback handed to approximations while they build
/// (evaluations are routed through the optimizer cache and counters).
pub type TruthFn<'a> = dyn FnMut(&ArrayView1<f64>, ActiveSet) -> Result<Response> + 'a;

/// Result of an approximation (re)build
#[derive(Clone, Debug, Default)]
pub struct BuildOutcome {
    /// Whether the approximation already matches truth at the center
    /// (no discrepancy correction to apply)
    pub embeds_correction: bool,
    /// Truth response at the center when evaluated during the build
    pub center_truth: Option<Response>,
}

/// A cheap model of the truth rebuilt around each trust region center
pub trait Approximation: Send + Sync {
    /// Approximation family
    fn kind(&self) -> ApproxKind;

    /// Whether the truth gradients are required to build
    fn requires_truth_gradients(&self) -> bool {
        false
    }

    /// Whether evaluated gradients are available
    fn supports_gradients(&self) -> bool {
        true
    }

    /// (Re)builds the approximation anchored at `center` within trust region bounds.
    fn build(
        &mut self,
        truth: &mut TruthFn,
        center: &ArrayView1<f64>,
        center_truth: Option<&Response>,
        tr_lower: &ArrayView1<f64>,
        tr_upper: &ArrayView1<f64>,
    ) -> Result<BuildOutcome>;

    /// Evaluates the uncorrected approximation at `x`
    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response>;
}

use crate::errors::Result;
use crate::models::{Approximation, BuildOutcome, TruthFn, TruthModel};
use crate::types::{ActiveSet, ApproxKind, Response};

use ndarray::ArrayView1;

/// A lower fidelity model standing as the approximation of the truth.
///
/// Nothing is built around the center: agreement with truth comes from the
/// discrepancy correction computed at each center.
pub struct HierarchicalApprox {
    low_fidelity: Box<dyn TruthModel>,
}

impl HierarchicalApprox {
    /// Constructor
    pub fn new(low_fidelity: Box<dyn TruthModel>) -> Self {
        HierarchicalApprox { low_fidelity }
    }

    /// The wrapped low fidelity model
    pub fn low_fidelity(&self) -> &dyn TruthModel {
        self.low_fidelity.as_ref()
    }
}

impl Approximation for HierarchicalApprox {
    fn kind(&self) -> ApproxKind {
        ApproxKind::Hierarchical
    }

    fn supports_gradients(&self) -> bool {
        self.low_fidelity.supports_gradients()
    }

    fn build(
        &mut self,
        _truth: &mut TruthFn,
        _center: &ArrayView1<f64>,
        _center_truth: Option<&Response>,
        _tr_lower: &ArrayView1<f64>,
        _tr_upper: &ArrayView1<f64>,
    ) -> Result<BuildOutcome> {
        Ok(BuildOutcome {
            embeds_correction: false,
            center_truth: None,
        })
    }

    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        self.low_fidelity.evaluate(x, asv)
    }
}

impl std::fmt::Debug for HierarchicalApprox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalApprox")
            .field("n_fns", &self.low_fidelity.n_fns())
            .finish()
    }
}

use crate::errors::{Result, SboError};
use crate::models::{Approximation, BuildOutcome, TruthFn};
use crate::types::{ActiveSet, ApproxKind, Response};

use ndarray::{Array1, Array2, ArrayView1};

/// Taylor series expansion at the trust region center.
///
/// First order, or second order when `with_hessians` is set (truth hessians required).
/// The expansion interpolates truth value and gradient at the center hence
/// embeds the discrepancy correction.
#[derive(Clone, Debug, Default)]
pub struct TaylorApprox {
    use_hessians: bool,
    center: Option<Array1<f64>>,
    values: Array1<f64>,
    grads: Array2<f64>,
    hessians: Option<Vec<Array2<f64>>>,
}

impl TaylorApprox {
    /// First order expansion
    pub fn new() -> Self {
        Self::default()
    }

    /// Second order expansion using truth hessians
    pub fn with_hessians(mut self, use_hessians: bool) -> Self {
        self.use_hessians = use_hessians;
        self
    }
}

impl Approximation for TaylorApprox {
    fn kind(&self) -> ApproxKind {
        ApproxKind::Local
    }

    fn requires_truth_gradients(&self) -> bool {
        true
    }

    fn build(
        &mut self,
        truth: &mut TruthFn,
        center: &ArrayView1<f64>,
        center_truth: Option<&Response>,
        _tr_lower: &ArrayView1<f64>,
        _tr_upper: &ArrayView1<f64>,
    ) -> Result<BuildOutcome> {
        let mut asv = ActiveSet::VALUE | ActiveSet::GRADIENT;
        if self.use_hessians {
            asv |= ActiveSet::HESSIAN;
        }
        let resp = match center_truth {
            Some(resp) if resp.satisfies(asv) => resp.clone(),
            _ => truth(center, asv)?,
        };
        self.center = Some(center.to_owned());
        self.values = resp.fn_vals.clone();
        self.grads = resp.gradients()?.to_owned();
        self.hessians = if self.use_hessians {
            resp.fn_hessians.clone()
        } else {
            None
        };
        Ok(BuildOutcome {
            embeds_correction: true,
            center_truth: Some(resp),
        })
    }

    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        let center = self
            .center
            .as_ref()
            .ok_or_else(|| SboError::ModelError("Taylor series used before build".to_string()))?;
        let dx = x - center;
        let mut values = &self.values + &self.grads.dot(&dx);
        let mut grads = self.grads.clone();
        if let Some(hessians) = self.hessians.as_ref() {
            for (i, h) in hessians.iter().enumerate() {
                let hdx = h.dot(&dx);
                values[i] += 0.5 * dx.dot(&hdx);
                grads.row_mut(i).scaled_add(1., &hdx);
            }
        }
        let mut response = Response::new(values);
        if asv.contains(ActiveSet::GRADIENT) {
            response = response.with_gradients(grads);
        }
        if asv.contains(ActiveSet::HESSIAN) {
            let n = dx.len();
            let hessians = self
                .hessians
                .clone()
                .unwrap_or_else(|| vec![Array2::zeros((n, n)); self.values.len()]);
            response = response.with_hessians(hessians);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn truth(x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        let mut resp = Response::new(array![x[0] * x[0] + x[1]]);
        if asv.contains(ActiveSet::GRADIENT) {
            resp = resp.with_gradients(array![[2. * x[0], 1.]]);
        }
        if asv.contains(ActiveSet::HESSIAN) {
            resp = resp.with_hessians(vec![array![[2., 0.], [0., 0.]]]);
        }
        Ok(resp)
    }

    #[test]
    fn test_first_order() {
        let mut approx = TaylorApprox::new();
        let (lo, up) = (array![-1., -1.], array![3., 3.]);
        let outcome = approx
            .build(&mut truth, &array![1., 1.].view(), None, &lo.view(), &up.view())
            .unwrap();
        assert!(outcome.embeds_correction);
        assert_abs_diff_eq!(outcome.center_truth.unwrap().fn_vals[0], 2.);
        let resp = approx
            .evaluate(&array![2., 1.].view(), ActiveSet::VALUE | ActiveSet::GRADIENT)
            .unwrap();
        assert_abs_diff_eq!(resp.fn_vals[0], 4.);
        assert_abs_diff_eq!(resp.fn_grads.unwrap(), array![[2., 1.]]);
    }

    #[test]
    fn test_second_order_is_exact_on_quadratic() {
        let mut approx = TaylorApprox::new().with_hessians(true);
        let (lo, up) = (array![-1., -1.], array![3., 3.]);
        approx
            .build(&mut truth, &array![1., 1.].view(), None, &lo.view(), &up.view())
            .unwrap();
        let x = array![2.5, -0.5];
        let resp = approx
            .evaluate(&x.view(), ActiveSet::VALUE | ActiveSet::GRADIENT)
            .unwrap();
        let expected = truth(&x.view(), ActiveSet::VALUE | ActiveSet::GRADIENT).unwrap();
        assert_abs_diff_eq!(resp.fn_vals, expected.fn_vals, epsilon = 1e-12);
        assert_abs_diff_eq!(resp.fn_grads.unwrap(), expected.fn_grads.unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_reuse_center_truth() {
        let mut approx = TaylorApprox::new();
        let calls = std::cell::Cell::new(0);
        let counted: &mut TruthFn = &mut |x, asv| {
            calls.set(calls.get() + 1);
            truth(x, asv)
        };
        let center = array![0., 0.];
        let known = truth(&center.view(), ActiveSet::VALUE | ActiveSet::GRADIENT).unwrap();
        let (lo, up) = (array![-1., -1.], array![1., 1.]);
        approx
            .build(counted, &center.view(), Some(&known), &lo.view(), &up.view())
            .unwrap();
        let value_only = Response::new(array![0.]);
        approx
            .build(counted, &center.view(), Some(&value_only), &lo.view(), &up.view())
            .unwrap();
        assert_eq!(calls.get(), 1);
    }
}

use crate::errors::{Result, SboError};
use crate::models::{Approximation, BuildOutcome, TruthFn};
use crate::types::{ActiveSet, ApproxKind, Response};

use log::debug;
use ndarray::{Array1, Array2, ArrayView1};

/// Two point expansion: first order Taylor series at the current center plus, for each
/// function, an isotropic quadratic term `0.5 * h_i * ||x - c||^2` fitted so that the
/// expansion also reproduces the truth value at the previous center.
///
/// Value and gradient are exact at the center (the quadratic term vanishes there),
/// so the discrepancy correction is embedded.
#[derive(Clone, Debug, Default)]
pub struct TwoPointApprox {
    center: Option<Array1<f64>>,
    values: Array1<f64>,
    grads: Array2<f64>,
    curvatures: Array1<f64>,
    previous: Option<(Array1<f64>, Array1<f64>)>,
}

impl TwoPointApprox {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Per function quadratic coefficients
    pub fn curvatures(&self) -> &Array1<f64> {
        &self.curvatures
    }
}

impl Approximation for TwoPointApprox {
    fn kind(&self) -> ApproxKind {
        ApproxKind::Multipoint
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
        let asv = ActiveSet::VALUE | ActiveSet::GRADIENT;
        let resp = match center_truth {
            Some(resp) if resp.satisfies(asv) => resp.clone(),
            _ => truth(center, asv)?,
        };
        // Keep previous expansion point only when the center moved
        if let Some(old_center) = self.center.as_ref() {
            if old_center != center {
                self.previous = Some((old_center.clone(), self.values.clone()));
            }
        }
        self.center = Some(center.to_owned());
        self.values = resp.fn_vals.clone();
        self.grads = resp.gradients()?.to_owned();

        self.curvatures = Array1::zeros(self.values.len());
        if let Some((prev_x, prev_vals)) = self.previous.as_ref() {
            let d = prev_x - center;
            let d2 = d.dot(&d);
            if d2 > f64::EPSILON {
                let linear = &self.values + &self.grads.dot(&d);
                self.curvatures = (prev_vals - &linear) * (2. / d2);
                debug!("Two point curvatures = {}", self.curvatures);
            }
        }
        Ok(BuildOutcome {
            embeds_correction: true,
            center_truth: Some(resp),
        })
    }

    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        let center = self.center.as_ref().ok_or_else(|| {
            SboError::ModelError("Two point expansion used before build".to_string())
        })?;
        let dx = x - center;
        let dx2 = dx.dot(&dx);
        let values = &self.values + &self.grads.dot(&dx) + &self.curvatures * (0.5 * dx2);
        let mut response = Response::new(values);
        if asv.contains(ActiveSet::GRADIENT) {
            let mut grads = self.grads.clone();
            for (i, mut row) in grads.rows_mut().into_iter().enumerate() {
                row.scaled_add(self.curvatures[i], &dx);
            }
            response = response.with_gradients(grads);
        }
        if asv.contains(ActiveSet::HESSIAN) {
            let n = dx.len();
            let hessians = self
                .curvatures
                .iter()
                .map(|&h| Array2::eye(n) * h)
                .collect();
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

    fn truth(x: &ArrayView1<f64>, _asv: ActiveSet) -> Result<Response> {
        Ok(Response::new(array![x[0].powi(3)]).with_gradients(array![[3. * x[0] * x[0]]]))
    }

    #[test]
    fn test_two_point_interpolation() {
        let mut approx = TwoPointApprox::new();
        let (lo, up) = (array![-5.], array![5.]);
        approx
            .build(&mut truth, &array![1.].view(), None, &lo.view(), &up.view())
            .unwrap();
        // first build is a plain linear expansion
        assert_abs_diff_eq!(approx.curvatures()[0], 0.);
        approx
            .build(&mut truth, &array![2.].view(), None, &lo.view(), &up.view())
            .unwrap();
        // exact at current center (value and gradient) and at previous center (value)
        let at_center = approx
            .evaluate(&array![2.].view(), ActiveSet::VALUE | ActiveSet::GRADIENT)
            .unwrap();
        assert_abs_diff_eq!(at_center.fn_vals[0], 8.);
        assert_abs_diff_eq!(at_center.fn_grads.unwrap()[[0, 0]], 12.);
        let at_prev = approx.evaluate(&array![1.].view(), ActiveSet::VALUE).unwrap();
        assert_abs_diff_eq!(at_prev.fn_vals[0], 1., epsilon = 1e-12);
    }

    #[test]
    fn test_same_center_keeps_previous() {
        let mut approx = TwoPointApprox::new();
        let (lo, up) = (array![-5.], array![5.]);
        for c in [1., 2., 2.] {
            approx
                .build(&mut truth, &array![c].view(), None, &lo.view(), &up.view())
                .unwrap();
        }
        let at_prev = approx.evaluate(&array![1.].view(), ActiveSet::VALUE).unwrap();
        assert_abs_diff_eq!(at_prev.fn_vals[0], 1., epsilon = 1e-12);
    }
}

use crate::errors::{Result, SboError};
use crate::types::{CorrectionOrder, CorrectionType, Response};

use log::warn;
use ndarray::{Array1, Array2, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

/// Multiplicative correction is not computed when approximate value magnitude is below
const MULTIPLICATIVE_MIN_VALUE: f64 = 1e-10;

/// Correction of an approximate response matching truth at the trust region center.
///
/// Additive: `truth ~ approx + delta(x)`, multiplicative: `truth ~ approx * beta(x)` where
/// `delta`/`beta` are constant (zeroth order) or linear (first order) around the center.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscrepancyCorrection {
    kind: CorrectionType,
    order: CorrectionOrder,
    /// Correction form actually used per function (multiplicative may fall back to additive)
    kinds: Vec<CorrectionType>,
    center: Option<Array1<f64>>,
    offsets: Array1<f64>,
    offset_grads: Option<Array2<f64>>,
}

impl DiscrepancyCorrection {
    /// Constructor
    pub fn new(kind: CorrectionType, order: CorrectionOrder) -> Self {
        DiscrepancyCorrection {
            kind,
            order,
            kinds: vec![],
            center: None,
            offsets: Array1::zeros(0),
            offset_grads: None,
        }
    }

    /// Correction form
    pub fn kind(&self) -> CorrectionType {
        self.kind
    }

    /// Correction order
    pub fn order(&self) -> CorrectionOrder {
        self.order
    }

    /// Whether gradients are needed to compute the correction
    pub fn requires_gradients(&self) -> bool {
        self.order == CorrectionOrder::First
    }

    /// Whether a correction was computed
    pub fn computed(&self) -> bool {
        self.center.is_some()
    }

    /// Computes the correction from truth and uncorrected approximate responses at `center`
    pub fn compute(&mut self, center: &ArrayView1<f64>, truth: &Response, approx: &Response) -> Result<()> {
        let n_fns = truth.n_fns();
        if approx.n_fns() != n_fns {
            return Err(SboError::ModelError(format!(
                "approximation returns {} functions, truth returns {}",
                approx.n_fns(),
                n_fns
            )));
        }
        let first_order = self.requires_gradients();
        let grads = if first_order {
            Some((truth.gradients()?, approx.gradients()?))
        } else {
            None
        };

        self.kinds = Vec::with_capacity(n_fns);
        let mut offsets = Array1::zeros(n_fns);
        let mut offset_grads = grads.map(|(tg, _)| Array2::zeros(tg.dim()));
        for i in 0..n_fns {
            let (t, a) = (truth.fn_vals[i], approx.fn_vals[i]);
            let kind = if self.kind == CorrectionType::Multiplicative
                && a.abs() < MULTIPLICATIVE_MIN_VALUE
            {
                warn!(
                    "Approximate value of function {} too small for multiplicative correction, use additive",
                    i
                );
                CorrectionType::Additive
            } else {
                self.kind
            };
            match kind {
                CorrectionType::Additive => {
                    offsets[i] = t - a;
                    if let (Some(og), Some((tg, ag))) = (offset_grads.as_mut(), grads) {
                        og.row_mut(i).assign(&(&tg.row(i) - &ag.row(i)));
                    }
                }
                CorrectionType::Multiplicative => {
                    let beta = t / a;
                    offsets[i] = beta;
                    if let (Some(og), Some((tg, ag))) = (offset_grads.as_mut(), grads) {
                        og.row_mut(i)
                            .assign(&((&tg.row(i) - &(&ag.row(i) * beta)) / a));
                    }
                }
            }
            self.kinds.push(kind);
        }
        self.center = Some(center.to_owned());
        self.offsets = offsets;
        self.offset_grads = offset_grads;
        Ok(())
    }

    /// Applies the correction in place to an approximate response at `x`.
    /// Does nothing when no correction was computed yet.
    pub fn apply(&self, x: &ArrayView1<f64>, response: &mut Response) {
        let Some(center) = self.center.as_ref() else {
            return;
        };
        let dx = x - center;
        for (i, kind) in self.kinds.iter().enumerate() {
            let (mut offset, offset_grad) = (self.offsets[i], self.offset_grads.as_ref().map(|g| g.row(i)));
            if let Some(og) = offset_grad {
                offset += og.dot(&dx);
            }
            let a = response.fn_vals[i];
            match kind {
                CorrectionType::Additive => {
                    response.fn_vals[i] = a + offset;
                    if let (Some(grads), Some(og)) = (response.fn_grads.as_mut(), offset_grad) {
                        let mut row = grads.row_mut(i);
                        row += &og;
                    }
                }
                CorrectionType::Multiplicative => {
                    response.fn_vals[i] = a * offset;
                    if let Some(grads) = response.fn_grads.as_mut() {
                        let mut row = grads.row_mut(i);
                        match offset_grad {
                            Some(og) => Zip::from(&mut row)
                                .and(&og)
                                .for_each(|g, &ogj| *g = *g * offset + a * ogj),
                            None => row *= offset,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_additive_first_order() {
        let mut corr = DiscrepancyCorrection::new(CorrectionType::Additive, CorrectionOrder::First);
        let center = array![1., 1.];
        let truth = Response::new(array![3.]).with_gradients(array![[1., 2.]]);
        let approx = Response::new(array![2.]).with_gradients(array![[0., 1.]]);
        corr.compute(&center.view(), &truth, &approx).unwrap();

        let mut at_center = approx.clone();
        corr.apply(&center.view(), &mut at_center);
        assert_abs_diff_eq!(at_center.fn_vals, truth.fn_vals);
        assert_abs_diff_eq!(at_center.fn_grads.unwrap(), truth.fn_grads.unwrap());

        let mut away = Response::new(array![2.]);
        corr.apply(&array![2., 1.].view(), &mut away);
        assert_abs_diff_eq!(away.fn_vals[0], 2. + 1. + 1.);
    }

    #[test]
    fn test_multiplicative_first_order() {
        let mut corr =
            DiscrepancyCorrection::new(CorrectionType::Multiplicative, CorrectionOrder::First);
        let center = array![0.];
        let truth = Response::new(array![4.]).with_gradients(array![[2.]]);
        let approx = Response::new(array![2.]).with_gradients(array![[3.]]);
        corr.compute(&center.view(), &truth, &approx).unwrap();
        let mut at_center = approx.clone();
        corr.apply(&center.view(), &mut at_center);
        assert_abs_diff_eq!(at_center.fn_vals[0], 4.);
        assert_abs_diff_eq!(at_center.fn_grads.unwrap()[[0, 0]], 2.);
    }

    #[test]
    fn test_multiplicative_fallback() {
        let mut corr =
            DiscrepancyCorrection::new(CorrectionType::Multiplicative, CorrectionOrder::Zeroth);
        let center = array![0.];
        let truth = Response::new(array![1., 6.]);
        let approx = Response::new(array![0., 2.]);
        corr.compute(&center.view(), &truth, &approx).unwrap();
        let mut resp = Response::new(array![0.5, 1.]);
        corr.apply(&array![3.].view(), &mut resp);
        assert_abs_diff_eq!(resp.fn_vals, array![1.5, 3.]);
    }

    #[test]
    fn test_first_order_requires_gradients() {
        let mut corr = DiscrepancyCorrection::new(CorrectionType::Additive, CorrectionOrder::First);
        let res = corr.compute(
            &array![0.].view(),
            &Response::new(array![1.]),
            &Response::new(array![0.]),
        );
        assert!(matches!(res, Err(SboError::MissingDerivative(_))));
        assert!(!corr.computed());
    }
}

use crate::errors::{Result, SboError};
use crate::models::TruthModel;
use crate::types::{ActiveSet, Response};

use finitediff::FiniteDiff;
use ndarray::{Array1, Array2, ArrayView1};

/// Function values as `[primary fns | inequalities | equalities]`
pub type ValuesFn = dyn Fn(&ArrayView1<f64>) -> Array1<f64> + Send + Sync;
/// Function gradients as a (n_fns, n_vars) matrix
pub type GradientsFn = dyn Fn(&ArrayView1<f64>) -> Array2<f64> + Send + Sync;
/// Function hessians, one (n_vars, n_vars) matrix per function
pub type HessiansFn = dyn Fn(&ArrayView1<f64>) -> Vec<Array2<f64>> + Send + Sync;

/// A truth model backed by closures.
///
/// Gradients are either given analytically or computed with central finite differences
/// when enabled with [`FnModel::with_finite_differences`].
///
/// ```
/// use ndarray::{array, ArrayView1};
/// use trbox_sbo::{ActiveSet, FnModel, TruthModel};
///
/// let model = FnModel::new(2, 1, |x: &ArrayView1<f64>| array![x[0] * x[0] + x[1]])
///     .with_finite_differences();
/// let resp = model
///     .evaluate(&array![1., 2.].view(), ActiveSet::VALUE | ActiveSet::GRADIENT)
///     .unwrap();
/// assert_eq!(resp.fn_vals[0], 3.);
/// assert!((resp.fn_grads.unwrap()[[0, 0]] - 2.).abs() < 1e-6);
/// ```
pub struct FnModel {
    n_vars: usize,
    n_fns: usize,
    values: Box<ValuesFn>,
    gradients: Option<Box<GradientsFn>>,
    hessians: Option<Box<HessiansFn>>,
    finite_diff: bool,
}

impl FnModel {
    /// Constructor from the function values closure
    pub fn new<F>(n_vars: usize, n_fns: usize, values: F) -> Self
    where
        F: Fn(&ArrayView1<f64>) -> Array1<f64> + Send + Sync + 'static,
    {
        FnModel {
            n_vars,
            n_fns,
            values: Box::new(values),
            gradients: None,
            hessians: None,
            finite_diff: false,
        }
    }

    /// Sets analytic gradients
    pub fn with_gradients<G>(mut self, gradients: G) -> Self
    where
        G: Fn(&ArrayView1<f64>) -> Array2<f64> + Send + Sync + 'static,
    {
        self.gradients = Some(Box::new(gradients));
        self
    }

    /// Sets analytic hessians
    pub fn with_hessians<H>(mut self, hessians: H) -> Self
    where
        H: Fn(&ArrayView1<f64>) -> Vec<Array2<f64>> + Send + Sync + 'static,
    {
        self.hessians = Some(Box::new(hessians));
        self
    }

    /// Computes gradients with central finite differences when no analytic gradients are given
    pub fn with_finite_differences(mut self) -> Self {
        self.finite_diff = true;
        self
    }

    fn finite_diff_gradients(&self, x: &ArrayView1<f64>) -> Array2<f64> {
        let x = x.to_vec();
        let mut grads = Array2::zeros((self.n_fns, self.n_vars));
        for i in 0..self.n_fns {
            let f = |x: &Vec<f64>| -> f64 { (self.values)(&ArrayView1::from(x))[i] };
            let g = x.central_diff(&f);
            grads.row_mut(i).assign(&Array1::from(g));
        }
        grads
    }
}

impl TruthModel for FnModel {
    fn n_vars(&self) -> usize {
        self.n_vars
    }

    fn n_fns(&self) -> usize {
        self.n_fns
    }

    fn supports_gradients(&self) -> bool {
        self.gradients.is_some() || self.finite_diff
    }

    fn supports_hessians(&self) -> bool {
        self.hessians.is_some()
    }

    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        let mut response = Response::new((self.values)(x));
        if asv.contains(ActiveSet::GRADIENT) {
            let grads = match self.gradients.as_ref() {
                Some(gradients) => gradients(x),
                None if self.finite_diff => self.finite_diff_gradients(x),
                None => {
                    return Err(SboError::MissingDerivative(
                        "model gradients requested but not available".to_string(),
                    ))
                }
            };
            response = response.with_gradients(grads);
        }
        if asv.contains(ActiveSet::HESSIAN) {
            let hessians = self.hessians.as_ref().ok_or_else(|| {
                SboError::MissingDerivative("model hessians requested but not available".to_string())
            })?;
            response = response.with_hessians(hessians(x));
        }
        response.check(self.n_fns, self.n_vars)?;
        Ok(response)
    }
}

impl std::fmt::Debug for FnModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnModel")
            .field("n_vars", &self.n_vars)
            .field("n_fns", &self.n_fns)
            .field("gradients", &self.supports_gradients())
            .field("hessians", &self.supports_hessians())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn quadratic(x: &ArrayView1<f64>) -> Array1<f64> {
        array![x[0] * x[0] + 3. * x[1], x[0] - x[1]]
    }

    #[test]
    fn test_finite_differences() {
        let model = FnModel::new(2, 2, quadratic).with_finite_differences();
        let resp = model
            .evaluate(&array![1., 2.].view(), ActiveSet::VALUE | ActiveSet::GRADIENT)
            .unwrap();
        assert_abs_diff_eq!(resp.fn_vals, array![7., -1.]);
        assert_abs_diff_eq!(
            resp.fn_grads.unwrap(),
            array![[2., 3.], [1., -1.]],
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_missing_gradients() {
        let model = FnModel::new(2, 2, quadratic);
        assert!(!model.supports_gradients());
        let res = model.evaluate(&array![1., 2.].view(), ActiveSet::GRADIENT);
        assert!(matches!(res, Err(SboError::MissingDerivative(_))));
        let resp = model.evaluate(&array![1., 2.].view(), ActiveSet::VALUE).unwrap();
        assert!(resp.fn_grads.is_none());
    }

    #[test]
    fn test_bad_output_size() {
        let model = FnModel::new(2, 3, quadratic);
        let res = model.evaluate(&array![1., 2.].view(), ActiveSet::VALUE);
        assert!(matches!(res, Err(SboError::ModelError(_))));
    }
}

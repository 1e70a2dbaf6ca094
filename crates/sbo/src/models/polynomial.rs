use crate::errors::{Result, SboError};
use crate::models::{Approximation, BuildOutcome, TruthFn};
use crate::types::{ActiveSet, ApproxKind, PolynomialDegree, Response};

use egobox_doe::{Lhs, LhsKind, SamplingMethod};
use log::debug;
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use trbox_lsq::lstsq;

/// Polynomial response surface fitted by least squares on the center and a
/// Latin hypercube sample of the trust region.
///
/// Inputs are scaled to `[-1, 1]` over the trust region around its center.
/// The surface does not interpolate the center in general hence the
/// discrepancy correction is not embedded.
#[derive(Clone, Debug)]
pub struct PolynomialApprox {
    degree: PolynomialDegree,
    n_samples: Option<usize>,
    rng: Xoshiro256Plus,
    center: Option<Array1<f64>>,
    scale: Array1<f64>,
    /// (n_fns, n_coeffs) coefficients
    coeffs: Array2<f64>,
}

/// Number of polynomial coefficients in dimension `n`
pub fn n_coeffs(degree: PolynomialDegree, n: usize) -> usize {
    match degree {
        PolynomialDegree::Linear => n + 1,
        PolynomialDegree::Quadratic => (n + 1) * (n + 2) / 2,
    }
}

impl PolynomialApprox {
    /// Constructor
    pub fn new(degree: PolynomialDegree) -> Self {
        PolynomialApprox {
            degree,
            n_samples: None,
            rng: Xoshiro256Plus::from_entropy(),
            center: None,
            scale: Array1::zeros(0),
            coeffs: Array2::zeros((0, 0)),
        }
    }

    /// Sets the number of sampled points besides the center
    /// (defaults to the number of coefficients)
    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = Some(n_samples);
        self
    }

    /// Sets the random generator seed used for sampling
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256Plus::seed_from_u64(seed);
        self
    }

    /// Fitted coefficients as a (n_fns, n_coeffs) matrix
    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coeffs
    }

    fn features(&self, u: &ArrayView1<f64>) -> Array1<f64> {
        let n = u.len();
        let mut feats = Vec::with_capacity(n_coeffs(self.degree, n));
        feats.push(1.);
        feats.extend(u.iter());
        if self.degree == PolynomialDegree::Quadratic {
            for j in 0..n {
                for k in j..n {
                    feats.push(u[j] * u[k]);
                }
            }
        }
        Array1::from(feats)
    }

    /// (n_coeffs, n) derivatives of features wrt scaled inputs
    fn feature_gradients(&self, u: &ArrayView1<f64>) -> Array2<f64> {
        let n = u.len();
        let mut dfeats = Array2::zeros((n_coeffs(self.degree, n), n));
        for j in 0..n {
            dfeats[[1 + j, j]] = 1.;
        }
        if self.degree == PolynomialDegree::Quadratic {
            let mut row = n + 1;
            for j in 0..n {
                for k in j..n {
                    dfeats[[row, j]] += u[k];
                    dfeats[[row, k]] += u[j];
                    row += 1;
                }
            }
        }
        dfeats
    }

    /// Hessian wrt scaled inputs of function `i`
    fn scaled_hessian(&self, i: usize, n: usize) -> Array2<f64> {
        let mut hess = Array2::zeros((n, n));
        if self.degree == PolynomialDegree::Quadratic {
            let mut row = n + 1;
            for j in 0..n {
                for k in j..n {
                    let c = self.coeffs[[i, row]];
                    hess[[j, k]] += c;
                    hess[[k, j]] += c;
                    row += 1;
                }
            }
        }
        hess
    }
}

impl Approximation for PolynomialApprox {
    fn kind(&self) -> ApproxKind {
        ApproxKind::Global
    }

    fn build(
        &mut self,
        truth: &mut TruthFn,
        center: &ArrayView1<f64>,
        center_truth: Option<&Response>,
        tr_lower: &ArrayView1<f64>,
        tr_upper: &ArrayView1<f64>,
    ) -> Result<BuildOutcome> {
        let n = center.len();
        let center_resp = match center_truth {
            Some(resp) => resp.clone(),
            None => truth(center, ActiveSet::VALUE)?,
        };
        let xlimits = concatenate![
            Axis(1),
            tr_lower.view().insert_axis(Axis(1)),
            tr_upper.view().insert_axis(Axis(1))
        ];
        let n_samples = self.n_samples.unwrap_or(n_coeffs(self.degree, n));
        let doe = Lhs::new(&xlimits)
            .kind(LhsKind::Maximin)
            .with_rng(Xoshiro256Plus::seed_from_u64(self.rng.gen()))
            .sample(n_samples);

        self.center = Some(center.to_owned());
        self.scale = Zip::from(tr_lower)
            .and(tr_upper)
            .map_collect(|&lo, &up| ((up - lo) / 2.).max(f64::EPSILON));

        let n_fns = center_resp.n_fns();
        let n_points = n_samples + 1;
        let mut feats = Array2::zeros((n_points, n_coeffs(self.degree, n)));
        let mut ys = Array2::zeros((n_points, n_fns));
        feats.row_mut(0).assign(&self.features(&Array1::zeros(n).view()));
        ys.row_mut(0).assign(&center_resp.fn_vals);
        for (k, x) in doe.rows().into_iter().enumerate() {
            let resp = truth(&x, ActiveSet::VALUE)?;
            if resp.n_fns() != n_fns {
                return Err(SboError::ModelError(format!(
                    "expected {} function values, got {}",
                    n_fns,
                    resp.n_fns()
                )));
            }
            let u = (&x - center) / &self.scale;
            feats.row_mut(k + 1).assign(&self.features(&u.view()));
            ys.row_mut(k + 1).assign(&resp.fn_vals);
        }

        let mut coeffs = Array2::zeros((n_fns, feats.ncols()));
        for (i, y) in ys.columns().into_iter().enumerate() {
            coeffs.row_mut(i).assign(&lstsq(&feats, &y)?);
        }
        debug!("Polynomial coefficients = {}", coeffs);
        self.coeffs = coeffs;

        Ok(BuildOutcome {
            embeds_correction: false,
            center_truth: Some(center_resp),
        })
    }

    fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        let center = self.center.as_ref().ok_or_else(|| {
            SboError::ModelError("Polynomial response surface used before build".to_string())
        })?;
        let u = (x - center) / &self.scale;
        let mut response = Response::new(self.coeffs.dot(&self.features(&u.view())));
        if asv.contains(ActiveSet::GRADIENT) {
            let grads = self.coeffs.dot(&self.feature_gradients(&u.view())) / &self.scale;
            response = response.with_gradients(grads);
        }
        if asv.contains(ActiveSet::HESSIAN) {
            let n = x.len();
            let scale2 = self
                .scale
                .view()
                .insert_axis(Axis(1))
                .dot(&self.scale.view().insert_axis(Axis(0)));
            let hessians = (0..self.coeffs.nrows())
                .map(|i| self.scaled_hessian(i, n) / &scale2)
                .collect();
            response = response.with_hessians(hessians);
        }
        Ok(response)
    }
}

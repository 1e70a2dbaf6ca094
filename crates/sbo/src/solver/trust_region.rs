//! Trust region geometry and sizing.
use crate::solver::{TrStatus, TrustRegionSolver, TrustRegionState};
use crate::types::{ApproxKind, ResponseKind};

use log::{debug, info, warn};
use ndarray::{Array1, ArrayBase, ArrayView1, Data, Ix2, Zip};

/// Predicted improvement, relative to the merit magnitude, below which
/// the trust region ratio is not computed
const RATIO_DENOMINATOR_RTOL: f64 = 1e-12;
/// Relative distance to trust region bounds under which a point is on the boundary
const BOUNDARY_TOL: f64 = 1e-6;

/// Updates trust region bounds around the center: the center is first clamped
/// into the global bounds `xlimits`, then the interval of half-width
/// `factor / 2 * (upper - lower)` is truncated to the global bounds.
pub(crate) fn update_trust_region<D: Data<Elem = f64>>(
    tr: &mut TrustRegionState,
    xlimits: &ArrayBase<D, Ix2>,
) {
    let factor = tr.trust_region_factor();
    let center = tr.vars_center();
    let clamped: Array1<f64> = Zip::from(center)
        .and(xlimits.rows())
        .map_collect(|&c, limits| c.max(limits[0]).min(limits[1]));
    if &clamped != center {
        warn!("Trust region center {} moved into global bounds {}", center, clamped);
        tr.set_vars_center(clamped);
    }

    let n = xlimits.nrows();
    let mut lower = Array1::zeros(n);
    let mut upper = Array1::zeros(n);
    let mut truncated = (vec![false; n], vec![false; n]);
    for (i, limits) in xlimits.rows().into_iter().enumerate() {
        let c = tr.vars_center()[i];
        let half = factor / 2. * (limits[1] - limits[0]);
        let (lo, up) = (c - half, c + half);
        truncated.0[i] = lo < limits[0];
        truncated.1[i] = up > limits[1];
        lower[i] = lo.max(limits[0]);
        upper[i] = up.min(limits[1]);
    }
    debug!("Trust region bounds: lower = {}, upper = {}", lower, upper);
    tr.set_tr_bounds(lower, upper, truncated);
}

/// Ratio of actual (truth) to predicted (approximate) merit improvements.
///
/// A degenerate prediction, negligible with respect to the `merit` value at the
/// center, never gets divided by: the ratio is then 1 when the truth improved,
/// 0 otherwise.
pub(crate) fn trust_region_ratio(num: f64, den: f64, merit: f64) -> f64 {
    let den_min = RATIO_DENOMINATOR_RTOL * merit.abs().max(1.);
    if !den.is_finite() || den.abs() <= den_min {
        warn!(
            "Degenerate trust region ratio denominator ({}), compare truth improvement only",
            den
        );
        if num > 0. {
            1.
        } else {
            0.
        }
    } else {
        num / den
    }
}

/// Whether `x` lies on the boundary of the `[lower, upper]` box
pub(crate) fn on_boundary(
    x: &ArrayView1<f64>,
    lower: &ArrayView1<f64>,
    upper: &ArrayView1<f64>,
) -> bool {
    Zip::from(x)
        .and(lower)
        .and(upper)
        .fold(false, |acc, &xi, &lo, &up| {
            let tol = BOUNDARY_TOL * (up - lo);
            acc || xi - lo <= tol || up - xi <= tol
        })
}

impl TrustRegionSolver {
    /// Resizes the trust region according to the step outcome.
    ///
    /// Rejected steps and poor ratios contract the region. Good ratios expand it,
    /// except for global approximations when the candidate lies inside the region.
    pub(crate) fn resize_trust_region(
        &self,
        tr: &mut TrustRegionState,
        ratio: f64,
        accepted: bool,
        boundary: bool,
    ) {
        let cfg = &self.config.trust_region;
        let factor = tr.trust_region_factor();
        if !accepted || ratio <= cfg.contract_threshold {
            tr.scale_trust_region_factor(cfg.gamma_contract);
            info!(
                "Contract trust region: factor {} -> {}",
                factor,
                tr.trust_region_factor()
            );
        } else if (1. - ratio).abs() <= 1. - cfg.expand_threshold
            && (self.refresh.kind() != ApproxKind::Global || boundary)
        {
            let expanded = (factor * cfg.gamma_expand).min(1.);
            if expanded > factor {
                tr.set_trust_region_factor(expanded);
                info!("Expand trust region: factor {} -> {}", factor, expanded);
            }
        } else {
            debug!("Keep trust region factor {}", factor);
        }
    }

    /// Sets the soft, minimum size and max iterations convergence bits.
    ///
    /// Soft convergence only means the merit function stopped improving: with a
    /// Lagrangian merit and vanishing multipliers this may happen at an infeasible
    /// center, which is reported as a warning.
    pub(crate) fn check_convergence(&self, tr: &mut TrustRegionState, iter: u64) {
        if tr.soft_conv_count() >= self.config.soft_conv_limit {
            tr.set_status_bits(TrStatus::SOFT_CONVERGED);
        }
        if tr.trust_region_factor() < self.config.trust_region.min_factor {
            tr.set_status_bits(TrStatus::MIN_TR_CONVERGED);
        }
        if iter + 1 >= self.config.max_iters as u64 {
            tr.set_status_bits(TrStatus::MAX_ITER_CONVERGED);
        }
        let converged = tr.converged();
        if !converged.is_empty() {
            info!("Converged: {}", converged.describe());
        }
        if let Some(violation) = self.infeasible_soft_convergence(tr) {
            warn!(
                "Soft convergence at infeasible center {} (constraint violation {})",
                tr.vars_center(),
                violation
            );
        }
    }

    /// Constraint violation at the center when soft convergence is reached
    /// while the center truth is infeasible
    pub(crate) fn infeasible_soft_convergence(&self, tr: &TrustRegionState) -> Option<f64> {
        if !tr.status_contains(TrStatus::SOFT_CONVERGED) {
            return None;
        }
        let truth = tr.response_center(ResponseKind::CorrectedTruth)?;
        let violation = self
            .merit
            .constraint_violation(&truth.fn_vals.view(), self.config.constraint_tol);
        (violation > 0.).then_some(violation)
    }
}

/// Relative improvement `(before - after) / |before|`, plain difference for small `before`
pub(crate) fn relative_improvement(before: f64, after: f64) -> f64 {
    if before.abs() < 1e-10 {
        before - after
    } else {
        (before - after) / before.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Approximation, PolynomialApprox, TaylorApprox};
    use crate::solver::SboConfig;
    use crate::types::{PolynomialDegree, Response};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn solver(approx: Box<dyn Approximation>) -> TrustRegionSolver {
        let config = SboConfig::default().check(1, 1).unwrap();
        TrustRegionSolver::new(config, &array![[-1., 1.]], approx)
    }

    fn local_solver() -> TrustRegionSolver {
        solver(Box::new(TaylorApprox::new()))
    }

    fn global_solver() -> TrustRegionSolver {
        solver(Box::new(PolynomialApprox::new(PolynomialDegree::Linear)))
    }

    fn tr_with_factor(factor: f64) -> TrustRegionState {
        TrustRegionState::new(1, factor)
    }

    #[test]
    fn test_contract_on_rejection() {
        let solver = local_solver();
        let mut tr = tr_with_factor(0.8);
        solver.resize_trust_region(&mut tr, 0.9, false, true);
        assert_abs_diff_eq!(tr.trust_region_factor(), 0.2);
        // accepted with a poor ratio
        solver.resize_trust_region(&mut tr, 0.1, true, true);
        assert_abs_diff_eq!(tr.trust_region_factor(), 0.05);
    }

    #[test]
    fn test_expansion_capped() {
        let solver = local_solver();
        let mut tr = tr_with_factor(0.4);
        solver.resize_trust_region(&mut tr, 1., true, false);
        assert_abs_diff_eq!(tr.trust_region_factor(), 0.8);
        solver.resize_trust_region(&mut tr, 1.1, true, false);
        assert_abs_diff_eq!(tr.trust_region_factor(), 1.);
        solver.resize_trust_region(&mut tr, 1., true, true);
        assert_abs_diff_eq!(tr.trust_region_factor(), 1.);
    }

    #[test]
    fn test_keep_band() {
        let solver = local_solver();
        let mut tr = tr_with_factor(0.4);
        solver.resize_trust_region(&mut tr, 0.5, true, true);
        assert_abs_diff_eq!(tr.trust_region_factor(), 0.4);
        solver.resize_trust_region(&mut tr, 3., true, true);
        assert_abs_diff_eq!(tr.trust_region_factor(), 0.4);
    }

    #[test]
    fn test_global_interior_keeps_factor() {
        let solver = global_solver();
        let mut tr = tr_with_factor(0.4);
        solver.resize_trust_region(&mut tr, 1., true, false);
        assert_abs_diff_eq!(tr.trust_region_factor(), 0.4);
        solver.resize_trust_region(&mut tr, 1., true, true);
        assert_abs_diff_eq!(tr.trust_region_factor(), 0.8);
    }

    #[test]
    fn test_convergence_bits_combine() {
        let solver = local_solver();
        let mut tr = tr_with_factor(0.4);
        solver.check_convergence(&mut tr, 3);
        assert!(tr.converged().is_empty());

        for _ in 0..5 {
            tr.increment_soft_conv_count();
        }
        tr.set_trust_region_factor(1e-7);
        solver.check_convergence(&mut tr, 99);
        let converged = tr.converged();
        assert!(converged.contains(
            TrStatus::SOFT_CONVERGED | TrStatus::MIN_TR_CONVERGED | TrStatus::MAX_ITER_CONVERGED
        ));
        assert!(!converged.contains(TrStatus::HARD_CONVERGED));
        assert_eq!(
            converged.describe(),
            "soft convergence (no improvement over consecutive iterations), \
             trust region size below minimum, max number of iterations reached"
        );
    }

    #[test]
    fn test_infeasible_soft_convergence() {
        // min x0 s.t. g >= 1
        let config = SboConfig::default()
            .inequality_bounds(&array![1.], &array![f64::INFINITY])
            .check(1, 2)
            .unwrap();
        let solver = TrustRegionSolver::new(config, &array![[-1., 1.]], Box::new(TaylorApprox::new()));
        let mut tr = tr_with_factor(0.4);
        tr.set_response_center(ResponseKind::CorrectedTruth, Response::new(array![0., 0.]));
        for _ in 0..5 {
            tr.increment_soft_conv_count();
        }
        solver.check_convergence(&mut tr, 1);
        assert!(tr.status_contains(TrStatus::SOFT_CONVERGED));
        assert_abs_diff_eq!(solver.infeasible_soft_convergence(&tr).unwrap(), 1.);

        tr.set_response_center(ResponseKind::CorrectedTruth, Response::new(array![0., 2.]));
        assert!(solver.infeasible_soft_convergence(&tr).is_none());
    }

    #[test]
    fn test_interior_center() {
        let xlimits = array![[-10., 10.]];
        let mut tr = TrustRegionState::new(1, 0.25);
        tr.set_vars_center(array![5.]);
        update_trust_region(&mut tr, &xlimits);
        assert_abs_diff_eq!(tr.tr_lower_bounds()[0], 2.5);
        assert_abs_diff_eq!(tr.tr_upper_bounds()[0], 7.5);
        assert_eq!(tr.truncations(), (&[false][..], &[false][..]));
        assert!(!tr.status_contains(TrStatus::NEW_TR_FACTOR));
    }

    #[test]
    fn test_truncated_bounds() {
        let xlimits = array![[0., 10.]];
        let mut tr = TrustRegionState::new(1, 0.5);
        tr.set_vars_center(array![5.]);
        update_trust_region(&mut tr, &xlimits);
        assert_abs_diff_eq!(tr.tr_lower_bounds()[0], 2.5);
        assert_abs_diff_eq!(tr.tr_upper_bounds()[0], 7.5);

        tr.set_vars_center(array![9.]);
        update_trust_region(&mut tr, &xlimits);
        assert_abs_diff_eq!(tr.tr_lower_bounds()[0], 6.5);
        assert_abs_diff_eq!(tr.tr_upper_bounds()[0], 10.);
        assert_eq!(tr.truncations(), (&[false][..], &[true][..]));
    }

    #[test]
    fn test_center_clamped() {
        let xlimits = array![[0., 1.], [-1., 1.]];
        let mut tr = TrustRegionState::new(2, 1.);
        tr.set_vars_center(array![2., 0.]);
        update_trust_region(&mut tr, &xlimits);
        assert_eq!(tr.vars_center(), &array![1., 0.]);
        for i in 0..2 {
            assert!(tr.tr_lower_bounds()[i] >= xlimits[[i, 0]]);
            assert!(tr.tr_upper_bounds()[i] <= xlimits[[i, 1]]);
            assert!(tr.tr_lower_bounds()[i] <= tr.vars_center()[i]);
            assert!(tr.vars_center()[i] <= tr.tr_upper_bounds()[i]);
        }
        assert_eq!(tr.truncations(), (&[false, false][..], &[true, false][..]));
    }

    #[test]
    fn test_ratio() {
        assert_abs_diff_eq!(trust_region_ratio(1., 2., 10.), 0.5);
        assert_abs_diff_eq!(trust_region_ratio(1., 0., 10.), 1.);
        assert_abs_diff_eq!(trust_region_ratio(-1., 0., 10.), 0.);
        assert_abs_diff_eq!(trust_region_ratio(1., f64::NAN, 10.), 1.);
        // negligible predicted improvement relative to the merit value
        assert_abs_diff_eq!(trust_region_ratio(1e-6, 1e-9, 1e4), 1.);
        assert_abs_diff_eq!(trust_region_ratio(-1e-6, 1e-9, 1e4), 0.);
        assert_abs_diff_eq!(trust_region_ratio(1e-6, 1e-9, 1.), 1e3, epsilon = 1e-6);
    }

    #[test]
    fn test_on_boundary() {
        let (lo, up) = (array![0., 0.], array![1., 1.]);
        assert!(!on_boundary(&array![0.5, 0.5].view(), &lo.view(), &up.view()));
        assert!(on_boundary(&array![0.5, 1.].view(), &lo.view(), &up.view()));
        assert!(on_boundary(&array![1e-9, 0.5].view(), &lo.view(), &up.view()));
    }

    #[test]
    fn test_relative_improvement() {
        assert_abs_diff_eq!(relative_improvement(-4., -5.), 0.25);
        assert_abs_diff_eq!(relative_improvement(0., -1e-3), 1e-3);
    }
}

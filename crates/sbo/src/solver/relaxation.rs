//! Constraint relaxation homotopy.
//!
//! When the trust region center violates the nonlinear constraints, the constraints
//! handed to the approximate subproblem are relaxed by the slacks recorded at the first
//! infeasible center: `relaxed = original + (1 - tau) * slack`. `tau = 0` makes that
//! center feasible, `tau = 1` is the original problem. `tau` is driven to 1 by solving
//! at each iteration a homotopy subproblem maximizing `tau`.
use crate::errors::Result;
use crate::merit::{ConstraintBounds, Slot};
use crate::solver::{TrustRegionSolver, TrustRegionState};
use crate::types::ResponseKind;
use crate::SboError;

use log::{debug, info};
use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

/// Slacks of the violated constraints, zero for satisfied ones
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Slacks {
    /// Inequality lower bounds slacks (negative or zero)
    pub ineq_lower: Array1<f64>,
    /// Inequality upper bounds slacks (positive or zero)
    pub ineq_upper: Array1<f64>,
    /// Equality targets slacks
    pub eq_targets: Array1<f64>,
}

impl Slacks {
    /// Slacks making the constraint values `cstr_vals` (`[ineq | eq]`) feasible
    pub fn new(bounds: &ConstraintBounds, cstr_vals: &ArrayView1<f64>, tol: f64) -> Self {
        let n_ineq = bounds.n_ineq();
        let ineq = cstr_vals.slice(ndarray::s![..n_ineq]);
        let eq = cstr_vals.slice(ndarray::s![n_ineq..]);
        let ineq_lower = Zip::from(&ineq)
            .and(&bounds.ineq_lower)
            .map_collect(|&g, &l| if g < l { g - l } else { 0. });
        let ineq_upper = Zip::from(&ineq)
            .and(&bounds.ineq_upper)
            .map_collect(|&g, &u| if g > u { g - u } else { 0. });
        let eq_targets = Zip::from(&eq)
            .and(&bounds.eq_targets)
            .map_collect(|&h, &t| if (h - t).abs() > tol { h - t } else { 0. });
        Slacks {
            ineq_lower,
            ineq_upper,
            eq_targets,
        }
    }

    /// Slack of the given constraint slot
    pub fn slot_slack(&self, slot: Slot) -> f64 {
        match slot {
            Slot::IneqLower(i) => self.ineq_lower[i],
            Slot::IneqUpper(i) => self.ineq_upper[i],
            Slot::Eq(j) => self.eq_targets[j],
        }
    }
}

/// Relaxation state: progress `tau` in [0, 1], recorded slacks and step damping `alpha`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relaxation {
    enabled: bool,
    alpha: f64,
    tau: f64,
    slacks: Option<Slacks>,
}

impl Relaxation {
    /// Constructor
    pub fn new(enabled: bool, alpha: f64) -> Self {
        Relaxation {
            enabled,
            alpha,
            tau: 1.,
            slacks: None,
        }
    }

    /// Whether relaxation is enabled
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Relaxation progress, 1 means original constraints
    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Recorded slacks if any
    pub fn slacks(&self) -> Option<&Slacks> {
        self.slacks.as_ref()
    }

    /// Whether constraints are currently relaxed
    pub fn is_active(&self) -> bool {
        self.slacks.is_some() && self.tau < 1.
    }

    /// Back to original constraints and no slacks
    pub fn reset(&mut self) {
        self.tau = 1.;
        self.slacks = None;
    }

    /// Records slacks, constraints are fully relaxed (`tau = 0`)
    pub fn record_slacks(&mut self, slacks: Slacks) {
        self.slacks = Some(slacks);
        self.tau = 0.;
    }

    /// Original constraints are restored
    pub fn set_feasible(&mut self) {
        self.tau = 1.;
    }

    /// Damped move of `tau` towards `tau_star`
    pub fn advance(&mut self, tau_star: f64) {
        self.tau = (self.tau + self.alpha * (tau_star - self.tau)).clamp(0., 1.);
    }

    /// Constraint bounds relaxed at the current `tau`
    pub fn relaxed_bounds(&self, bounds: &ConstraintBounds) -> ConstraintBounds {
        match self.slacks.as_ref() {
            None => bounds.clone(),
            Some(slacks) => {
                let w = 1. - self.tau;
                ConstraintBounds::new(
                    &bounds.ineq_lower + &(&slacks.ineq_lower * w),
                    &bounds.ineq_upper + &(&slacks.ineq_upper * w),
                    &bounds.eq_targets + &(&slacks.eq_targets * w),
                )
            }
        }
    }
}

impl TrustRegionSolver {
    /// Updates relaxation progress given the truth constraint values at the center
    pub(crate) fn update_relaxation(&mut self, tr: &TrustRegionState) -> Result<()> {
        if !self.refresh.relaxation.enabled() || !self.merit.is_constrained() {
            return Ok(());
        }
        let fn_vals = tr
            .response_center(ResponseKind::CorrectedTruth)
            .map(|resp| resp.fn_vals.clone())
            .ok_or_else(|| SboError::ModelError("No truth response at center".to_string()))?;
        let tol = self.config.constraint_tol;
        if self.merit.constraint_violation(&fn_vals.view(), tol) == 0. {
            if self.refresh.relaxation.is_active() {
                info!("Center feasible: original constraints restored");
            }
            self.refresh.relaxation.set_feasible();
            return Ok(());
        }
        if self.refresh.relaxation.slacks().is_none() {
            let n_obj = self.config.n_obj;
            let slacks = Slacks::new(
                self.merit.bounds(),
                &fn_vals.slice(ndarray::s![n_obj..]),
                tol,
            );
            info!("Infeasible center: relax constraints with slacks {:?}", slacks);
            self.refresh.relaxation.record_slacks(slacks);
        }
        let tau_star = self.solve_homotopy(tr)?;
        self.refresh.relaxation.advance(tau_star);
        debug!(
            "Homotopy tau* = {}, relaxation tau = {}",
            tau_star,
            self.refresh.relaxation.tau()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn lower_bounded() -> ConstraintBounds {
        ConstraintBounds::new(array![1.], array![f64::INFINITY], Array1::zeros(0))
    }

    #[test]
    fn test_relaxed_lower_bound() {
        let bounds = lower_bounded();
        // g = -2 violates g >= 1 by 3
        let slacks = Slacks::new(&bounds, &array![-2.].view(), 1e-4);
        assert_abs_diff_eq!(slacks.ineq_lower[0], -3.);
        assert_abs_diff_eq!(slacks.ineq_upper[0], 0.);

        let mut relax = Relaxation::new(true, 0.9);
        relax.record_slacks(slacks);
        assert_eq!(relax.tau(), 0.);
        let relaxed = relax.relaxed_bounds(&bounds);
        assert_abs_diff_eq!(relaxed.ineq_lower[0], 1. - 3.);
        assert!(relaxed.ineq_upper[0].is_infinite());

        relax.set_feasible();
        let relaxed = relax.relaxed_bounds(&bounds);
        assert_abs_diff_eq!(relaxed.ineq_lower[0], 1.);
        assert!(!relax.is_active());
    }

    #[test]
    fn test_equality_slack() {
        let bounds = ConstraintBounds::new(Array1::zeros(0), Array1::zeros(0), array![2.]);
        let slacks = Slacks::new(&bounds, &array![2.5].view(), 1e-4);
        assert_abs_diff_eq!(slacks.slot_slack(Slot::Eq(0)), 0.5);
        let mut relax = Relaxation::new(true, 0.5);
        relax.record_slacks(slacks);
        relax.advance(1.);
        assert_abs_diff_eq!(relax.tau(), 0.5);
        assert_abs_diff_eq!(relax.relaxed_bounds(&bounds).eq_targets[0], 2.25);
    }

    #[test]
    fn test_damped_advance() {
        let mut relax = Relaxation::new(true, 0.9);
        relax.record_slacks(Slacks::new(&lower_bounded(), &array![0.].view(), 0.));
        relax.advance(1.);
        assert_abs_diff_eq!(relax.tau(), 0.9);
        relax.advance(1.);
        assert_abs_diff_eq!(relax.tau(), 0.99, epsilon = 1e-12);
        assert!(relax.is_active());
        relax.reset();
        assert_eq!(relax.tau(), 1.);
        assert!(relax.slacks().is_none());
    }
}

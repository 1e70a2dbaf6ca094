//! Approximate subproblem and relaxation homotopy subproblem solved within
//! the trust region bounds.
use crate::errors::{Result, SboError};
use crate::merit::{ConstraintBounds, MeritEngine, Slot};
use crate::optimizers::{ObjFn, Optimizer};
use crate::solver::{Slacks, SurrogateRefresh, TrustRegionSolver, TrustRegionState};
use crate::types::{ActiveSet, Response, ResponseKind, SubproblemConstraints, SubproblemObjective, SubproblemOptimizer};

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, Zip};
use std::cell::RefCell;

/// A nonlinear constraint recast as `c(x) <= 0` where
/// `c = sign * (f - bound - (1 - tau) * slack) - tol`
#[derive(Clone, Copy, Debug, PartialEq)]
struct RecastConstraint {
    fn_index: usize,
    sign: f64,
    bound: f64,
    slack: f64,
    tol: f64,
}

impl RecastConstraint {
    fn value(&self, f: f64, tau: f64) -> f64 {
        self.sign * (f - self.bound - (1. - tau) * self.slack) - self.tol
    }

    fn tau_derivative(&self) -> f64 {
        self.sign * self.slack
    }
}

/// Recasts bounded constraints, an equality giving two inequalities `|h - t| <= tol`
fn recast_constraints(
    bounds: &ConstraintBounds,
    slacks: Option<&Slacks>,
    n_obj: usize,
    tol: f64,
) -> Vec<RecastConstraint> {
    let mut recast = vec![];
    for slot in bounds.slots() {
        let fn_index = n_obj + bounds.cstr_index(slot);
        let slack = slacks.map(|s| s.slot_slack(slot)).unwrap_or(0.);
        match slot {
            Slot::IneqLower(i) => recast.push(RecastConstraint {
                fn_index,
                sign: -1.,
                bound: bounds.ineq_lower[i],
                slack,
                tol: 0.,
            }),
            Slot::IneqUpper(i) => recast.push(RecastConstraint {
                fn_index,
                sign: 1.,
                bound: bounds.ineq_upper[i],
                slack,
                tol: 0.,
            }),
            Slot::Eq(j) => {
                for sign in [1., -1.] {
                    recast.push(RecastConstraint {
                        fn_index,
                        sign,
                        bound: bounds.eq_targets[j],
                        slack,
                        tol,
                    })
                }
            }
        }
    }
    recast
}

/// First order expansion of the corrected approximation at the center
struct Linearization {
    center: Array1<f64>,
    vals: Array1<f64>,
    grads: Array2<f64>,
}

impl Linearization {
    fn value(&self, i: usize, x: &[f64]) -> f64 {
        let dx = &ArrayView1::from(x) - &self.center;
        self.vals[i] + self.grads.row(i).dot(&dx)
    }
}

/// Corrected approximation evaluations shared by objective and constraints callbacks:
/// the last point is memoized and the first error kept to be reported once the
/// optimizer returns.
struct ApproxEvaluator<'a> {
    refresh: &'a SurrogateRefresh,
    asv: ActiveSet,
    last: RefCell<Option<(Vec<f64>, Response)>>,
    error: RefCell<Option<SboError>>,
}

impl<'a> ApproxEvaluator<'a> {
    fn new(refresh: &'a SurrogateRefresh, asv: ActiveSet) -> Self {
        ApproxEvaluator {
            refresh,
            asv,
            last: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    /// Function values and optional gradient row of function `i` at `x`
    fn eval(&self, i: usize, x: &[f64]) -> Option<(f64, Option<Array1<f64>>)> {
        self.response(x).map(|(vals, grads)| {
            (vals[i], grads.map(|g| g.row(i).to_owned()))
        })
    }

    fn response(&self, x: &[f64]) -> Option<(Array1<f64>, Option<Array2<f64>>)> {
        if let Some((xl, resp)) = self.last.borrow().as_ref() {
            if xl.as_slice() == x {
                return Some((resp.fn_vals.clone(), resp.fn_grads.clone()));
            }
        }
        match self.refresh.evaluate(&ArrayView1::from(x), self.asv) {
            Ok(resp) => {
                let res = (resp.fn_vals.clone(), resp.fn_grads.clone());
                *self.last.borrow_mut() = Some((x.to_vec(), resp));
                Some(res)
            }
            Err(err) => {
                let mut error = self.error.borrow_mut();
                if error.is_none() {
                    *error = Some(err);
                }
                None
            }
        }
    }

    fn take_error(&self) -> Option<SboError> {
        self.error.borrow_mut().take()
    }
}

/// Subproblem objective value and gradient
fn subproblem_objective(
    merit: &MeritEngine,
    kind: SubproblemObjective,
    vals: &ArrayView1<f64>,
    grads: Option<&Array2<f64>>,
    gradient: Option<&mut [f64]>,
) -> f64 {
    if let (Some(gradient), Some(grads)) = (gradient, grads) {
        let g = match kind {
            SubproblemObjective::OriginalPrimary => merit.objective_gradient(vals, &grads.view()),
            SubproblemObjective::Lagrangian => merit.lagrangian_gradient(vals, &grads.view()),
            SubproblemObjective::AugmentedLagrangian => {
                merit.augmented_lagrangian_gradient(vals, &grads.view())
            }
        };
        gradient
            .iter_mut()
            .zip(g.iter())
            .for_each(|(dst, &src)| *dst = src);
    }
    match kind {
        SubproblemObjective::OriginalPrimary => merit.objective(vals),
        SubproblemObjective::Lagrangian => merit.lagrangian_merit(vals),
        SubproblemObjective::AugmentedLagrangian => merit.augmented_lagrangian_merit(vals),
    }
}

/// (n, 2) matrix of `[lower, upper]` rows
fn bounds_matrix(lower: &ArrayView1<f64>, upper: &ArrayView1<f64>) -> Array2<f64> {
    let mut bounds = Array2::zeros((lower.len(), 2));
    bounds.column_mut(0).assign(lower);
    bounds.column_mut(1).assign(upper);
    bounds
}

/// Appends a scalar to a vector
fn extended(x: &Array1<f64>, last: f64) -> Array1<f64> {
    x.iter().copied().chain(std::iter::once(last)).collect()
}

impl TrustRegionSolver {
    fn subproblem_asv(&self) -> ActiveSet {
        match self.config.optimizer {
            SubproblemOptimizer::Slsqp => self.approx_asv(),
            SubproblemOptimizer::Cobyla => ActiveSet::VALUE,
        }
    }

    /// Minimizes the subproblem on the corrected approximation within the trust
    /// region and sets the candidate point with its approximate responses.
    pub(crate) fn minimize(&mut self, tr: &mut TrustRegionState) -> Result<()> {
        self.update_relaxation(tr)?;

        let tr_bounds = bounds_matrix(&tr.tr_lower_bounds().view(), &tr.tr_upper_bounds().view());
        let n_obj = self.config.n_obj;
        let constraints = match self.config.subproblem_constraints {
            SubproblemConstraints::NoConstraints => vec![],
            _ => recast_constraints(
                &self.refresh.relaxation.relaxed_bounds(self.merit.bounds()),
                None,
                n_obj,
                self.config.constraint_tol,
            ),
        };
        let linearization = match self.config.subproblem_constraints {
            SubproblemConstraints::Linearized => {
                let center_approx = tr
                    .response_center(ResponseKind::CorrectedApprox)
                    .ok_or_else(|| {
                        SboError::ModelError("No approximate response at center".to_string())
                    })?;
                Some(Linearization {
                    center: tr.vars_center().to_owned(),
                    vals: center_approx.fn_vals.clone(),
                    grads: center_approx.gradients()?.to_owned(),
                })
            }
            _ => None,
        };
        let tau = self.refresh.relaxation.tau();
        debug!(
            "Approximate subproblem with {} constraints (tau = {})",
            constraints.len(),
            tau
        );

        let x_star = {
            let evaluator = ApproxEvaluator::new(&self.refresh, self.subproblem_asv());
            let merit = &self.merit;
            let kind = self.config.subproblem_objective;
            let obj = |x: &[f64], gradient: Option<&mut [f64]>, _u: &mut ()| -> f64 {
                let Some((vals, grads)) = evaluator.response(x) else {
                    return f64::INFINITY;
                };
                subproblem_objective(merit, kind, &vals.view(), grads.as_ref(), gradient)
            };
            let cstrs: Vec<_> = constraints
                .iter()
                .map(|rc| {
                    let evaluator = &evaluator;
                    let linearization = &linearization;
                    move |x: &[f64], gradient: Option<&mut [f64]>, _u: &mut ()| -> f64 {
                        let (f, df) = match linearization {
                            Some(lin) => (
                                lin.value(rc.fn_index, x),
                                Some(lin.grads.row(rc.fn_index).to_owned()),
                            ),
                            None => match evaluator.eval(rc.fn_index, x) {
                                Some(res) => res,
                                None => return f64::INFINITY,
                            },
                        };
                        if let (Some(gradient), Some(df)) = (gradient, df) {
                            gradient
                                .iter_mut()
                                .zip(df.iter())
                                .for_each(|(dst, &src)| *dst = rc.sign * src);
                        }
                        rc.value(f, tau)
                    }
                })
                .collect();
            let cons: Vec<&dyn ObjFn<()>> = cstrs.iter().map(|c| c as &dyn ObjFn<()>).collect();
            let res = Optimizer::new(
                self.config.optimizer,
                "approximate subproblem",
                &obj,
                &cons,
                &(),
                &tr_bounds,
            )
            .xinit(tr.vars_center())
            .max_eval(self.config.subproblem_max_eval)
            .minimize();
            if let Some(err) = evaluator.take_error() {
                return Err(err);
            }
            let (_, x_opt) = res?;
            Zip::from(&x_opt)
                .and(tr.tr_lower_bounds())
                .and(tr.tr_upper_bounds())
                .map_collect(|&x, &lo, &up| x.max(lo).min(up))
        };
        debug!("Candidate point x* = {}", x_star);

        let asv = self.approx_asv();
        let approx = self.refresh.evaluate_uncorrected(&x_star.view(), asv)?;
        let corrected = self.refresh.evaluate(&x_star.view(), asv)?;
        tr.set_vars_star(x_star);
        tr.set_response_star(ResponseKind::UncorrectedApprox, approx);
        tr.set_response_star(ResponseKind::CorrectedApprox, corrected);
        Ok(())
    }

    /// Maximizes the relaxation parameter `tau` over `(x, tau)` in the trust region
    /// times `[0, 1]` subject to the relaxed approximate constraints, returns `tau*`.
    pub(crate) fn solve_homotopy(&self, tr: &TrustRegionState) -> Result<f64> {
        let n = tr.vars_center().len();
        let constraints = recast_constraints(
            self.merit.bounds(),
            self.refresh.relaxation.slacks(),
            self.config.n_obj,
            self.config.constraint_tol,
        );
        let lower = extended(tr.tr_lower_bounds(), 0.);
        let upper = extended(tr.tr_upper_bounds(), 1.);
        let bounds = bounds_matrix(&lower.view(), &upper.view());
        let zinit = extended(tr.vars_center(), self.refresh.relaxation.tau());

        let evaluator = ApproxEvaluator::new(&self.refresh, self.subproblem_asv());
        let obj = |z: &[f64], gradient: Option<&mut [f64]>, _u: &mut ()| -> f64 {
            if let Some(gradient) = gradient {
                gradient.fill(0.);
                gradient[n] = -1.;
            }
            -z[n]
        };
        let cstrs: Vec<_> = constraints
            .iter()
            .map(|rc| {
                let evaluator = &evaluator;
                move |z: &[f64], gradient: Option<&mut [f64]>, _u: &mut ()| -> f64 {
                    let Some((f, df)) = evaluator.eval(rc.fn_index, &z[..n]) else {
                        return f64::INFINITY;
                    };
                    if let (Some(gradient), Some(df)) = (gradient, df) {
                        gradient[..n]
                            .iter_mut()
                            .zip(df.iter())
                            .for_each(|(dst, &src)| *dst = rc.sign * src);
                        gradient[n] = rc.tau_derivative();
                    }
                    rc.value(f, z[n])
                }
            })
            .collect();
        let cons: Vec<&dyn ObjFn<()>> = cstrs.iter().map(|c| c as &dyn ObjFn<()>).collect();
        let res = Optimizer::new(
            self.config.optimizer,
            "homotopy subproblem",
            &obj,
            &cons,
            &(),
            &bounds,
        )
        .xinit(&zinit)
        .max_eval(self.config.subproblem_max_eval)
        .minimize();
        if let Some(err) = evaluator.take_error() {
            return Err(err);
        }
        let (_, z_opt) = res?;
        Ok(z_opt[n].clamp(0., 1.))
    }
}

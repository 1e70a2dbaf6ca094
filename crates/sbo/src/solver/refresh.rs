//! Approximation rebuild around the trust region center, center truth policy
//! and hard convergence test.
use crate::errors::{Result, SboError};
use crate::models::{
    Approximation, BuildOutcome, DiscrepancyCorrection, EvalCache, TruthFn, TruthModel,
};
use crate::solver::{Relaxation, TrStatus, TrustRegionSolver, TrustRegionState};
use crate::types::{ActiveSet, ApproxKind, Response, ResponseKind};

use argmin::core::Problem;
use log::{debug, info};
use ndarray::ArrayView1;

/// Evaluates the truth model through the evaluation cache.
///
/// Actual model calls are counted by the argmin problem wrapper under `truth_count`.
pub(crate) fn eval_truth<O: TruthModel>(
    problem: &mut Problem<O>,
    cache: &mut EvalCache,
    x: &ArrayView1<f64>,
    asv: ActiveSet,
    bypass: bool,
) -> Result<Response> {
    cache.evaluate(x, asv, |x, asv| {
        let resp = problem.problem("truth_count", |model| {
            let resp = if bypass {
                model.evaluate_bypass(x, asv)
            } else {
                model.evaluate(x, asv)
            };
            resp.and_then(|resp| {
                resp.check(model.n_fns(), model.n_vars())?;
                Ok(resp)
            })
            .map_err(argmin::core::Error::from)
        })?;
        Ok(resp)
    })
}

/// Approximation of the truth with its discrepancy correction and the
/// constraint relaxation applied to the subproblems built on top of it.
pub struct SurrogateRefresh {
    approx: Box<dyn Approximation>,
    correction: DiscrepancyCorrection,
    apply_correction: bool,
    pub(crate) relaxation: Relaxation,
}

impl SurrogateRefresh {
    /// Constructor
    pub fn new(
        approx: Box<dyn Approximation>,
        correction: DiscrepancyCorrection,
        relaxation: Relaxation,
    ) -> Self {
        SurrogateRefresh {
            approx,
            correction,
            apply_correction: false,
            relaxation,
        }
    }

    /// Approximation family
    pub fn kind(&self) -> ApproxKind {
        self.approx.kind()
    }

    /// Whether the approximation is a global one
    pub fn is_global(&self) -> bool {
        self.kind() == ApproxKind::Global
    }

    /// Underlying approximation
    pub fn approximation(&self) -> &dyn Approximation {
        self.approx.as_ref()
    }

    /// Discrepancy correction
    pub fn correction(&self) -> &DiscrepancyCorrection {
        &self.correction
    }

    /// Constraint relaxation
    pub fn relaxation(&self) -> &Relaxation {
        &self.relaxation
    }

    /// Whether the discrepancy correction is applied on evaluations
    pub fn applies_correction(&self) -> bool {
        self.apply_correction
    }

    /// Rebuilds the approximation within the trust region
    pub fn rebuild(
        &mut self,
        truth: &mut TruthFn,
        tr: &TrustRegionState,
        center_truth: Option<&Response>,
    ) -> Result<BuildOutcome> {
        let outcome = self.approx.build(
            truth,
            &tr.vars_center().view(),
            center_truth,
            &tr.tr_lower_bounds().view(),
            &tr.tr_upper_bounds().view(),
        )?;
        self.apply_correction = !outcome.embeds_correction;
        Ok(outcome)
    }

    /// Computes the discrepancy correction at the center when the approximation
    /// does not already match the truth there
    pub fn correct(
        &mut self,
        center: &ArrayView1<f64>,
        truth: &Response,
        approx: &Response,
    ) -> Result<()> {
        if self.apply_correction {
            self.correction.compute(center, truth, approx)?;
        }
        Ok(())
    }

    /// Evaluates the raw approximation
    pub fn evaluate_uncorrected(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        self.approx.evaluate(x, asv)
    }

    /// Evaluates the corrected approximation
    pub fn evaluate(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Result<Response> {
        let mut resp = self.approx.evaluate(x, asv)?;
        if self.apply_correction {
            self.correction.apply(x, &mut resp);
        }
        Ok(resp)
    }
}

impl TrustRegionSolver {
    /// Evaluation request used for approximate responses
    pub(crate) fn approx_asv(&self) -> ActiveSet {
        if self.refresh.approximation().supports_gradients() {
            ActiveSet::VALUE | ActiveSet::GRADIENT
        } else {
            ActiveSet::VALUE
        }
    }

    /// Builds the approximation around the current center and sets the center
    /// truth and approximate responses.
    ///
    /// Global approximations are built once the center truth is known and only
    /// when hard convergence is not reached. Local ones may evaluate the center
    /// truth themselves while building.
    pub(crate) fn build<O: TruthModel>(
        &mut self,
        problem: &mut Problem<O>,
        tr: &mut TrustRegionState,
        iter: u64,
    ) -> Result<()> {
        let bypass = self.config.truth_bypass;
        if self.refresh.is_global() {
            self.find_center_truth(problem, tr, iter, None)?;
            self.hard_convergence_check(tr)?;
            if !tr.converged().is_empty() {
                return Ok(());
            }
            let center_truth = tr.response_center(ResponseKind::CorrectedTruth).cloned();
            let cache = &mut self.cache;
            let truth: &mut TruthFn = &mut |x, asv| eval_truth(problem, cache, x, asv, bypass);
            self.refresh.rebuild(truth, tr, center_truth.as_ref())?;
        } else {
            let center_truth = tr.response_center(ResponseKind::CorrectedTruth).cloned();
            let outcome = {
                let cache = &mut self.cache;
                let truth: &mut TruthFn =
                    &mut |x, asv| eval_truth(problem, cache, x, asv, bypass);
                self.refresh.rebuild(truth, tr, center_truth.as_ref())?
            };
            self.find_center_truth(problem, tr, iter, outcome.center_truth)?;
            self.hard_convergence_check(tr)?;
            if !tr.converged().is_empty() {
                return Ok(());
            }
        }

        let center = tr.vars_center().to_owned();
        let truth = tr
            .response_center(ResponseKind::CorrectedTruth)
            .cloned()
            .ok_or_else(|| SboError::ModelError("No truth response at center".to_string()))?;
        let asv = self.approx_asv();
        let approx = self.refresh.evaluate_uncorrected(&center.view(), asv)?;
        self.refresh.correct(&center.view(), &truth, &approx)?;
        let corrected = self.refresh.evaluate(&center.view(), asv)?;
        debug!(
            "Center approximation: uncorrected={} corrected={} truth={}",
            approx.fn_vals, corrected.fn_vals, truth.fn_vals
        );
        tr.set_response_center(ResponseKind::UncorrectedApprox, approx);
        tr.set_response_center(ResponseKind::CorrectedApprox, corrected);
        tr.set_status_bits(TrStatus::CENTER_BUILT);
        tr.reset_status_bits(TrStatus::NEW_CENTER);
        Ok(())
    }

    /// Sets the center truth response: a stored one is reused when it holds
    /// what is needed, then the one computed while building, otherwise the truth
    /// model is evaluated.
    fn find_center_truth<O: TruthModel>(
        &mut self,
        problem: &mut Problem<O>,
        tr: &mut TrustRegionState,
        iter: u64,
        build_truth: Option<Response>,
    ) -> Result<()> {
        let asv = if self.truth_gradients {
            ActiveSet::VALUE | ActiveSet::GRADIENT
        } else {
            ActiveSet::VALUE
        };
        if let Some(resp) = tr.response_center(ResponseKind::CorrectedTruth) {
            if iter > 0 && resp.satisfies(asv) {
                debug!("Reuse center truth response (eval id {})", resp.eval_id);
                return Ok(());
            }
        }
        let global = self.refresh.is_global();
        let truth = match build_truth.filter(|resp| !global && resp.satisfies(asv)) {
            Some(resp) => resp,
            None => eval_truth(
                problem,
                &mut self.cache,
                &tr.vars_center().view(),
                asv,
                self.config.truth_bypass,
            )?,
        };
        tr.set_response_center(ResponseKind::UncorrectedTruth, truth.clone());
        tr.set_response_center(ResponseKind::CorrectedTruth, truth);
        Ok(())
    }

    /// Hard convergence: norm of the projected gradient of the Lagrangian
    /// (objective when unconstrained) below tolerance at a feasible center.
    fn hard_convergence_check(&mut self, tr: &mut TrustRegionState) -> Result<()> {
        if !self.truth_gradients {
            return Ok(());
        }
        let truth = tr
            .response_center(ResponseKind::CorrectedTruth)
            .cloned()
            .ok_or_else(|| SboError::ModelError("No truth response at center".to_string()))?;
        let vals = truth.fn_vals.view();
        let grads = truth.gradients()?.view();
        let mut grad = if self.merit.is_constrained() {
            self.merit.update_lagrange_multipliers(&vals, &grads)?;
            self.merit.lagrangian_gradient(&vals, &grads)
        } else {
            self.merit.objective_gradient(&vals, &grads)
        };
        // descent directions blocked by global bounds do not count
        let center = tr.vars_center();
        for (i, g) in grad.iter_mut().enumerate() {
            let (lo, up) = (self.xlimits[[i, 0]], self.xlimits[[i, 1]]);
            if (center[i] <= lo && *g > 0.) || (center[i] >= up && *g < 0.) {
                *g = 0.;
            }
        }
        let norm = grad.dot(&grad).sqrt();
        let violation = self
            .merit
            .constraint_violation(&vals, self.config.constraint_tol);
        debug!(
            "Projected gradient norm = {}, constraint violation = {}",
            norm, violation
        );
        if norm < self.config.convergence_tol && violation == 0. {
            info!("Hard convergence reached: gradient norm {} at {}", norm, center);
            tr.set_status_bits(TrStatus::HARD_CONVERGED);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FnModel, PolynomialApprox, TaylorApprox};
    use crate::solver::trust_region::update_trust_region;
    use crate::solver::SboConfig;
    use crate::types::PolynomialDegree;
    use ndarray::{array, Array1};

    fn tilted_paraboloid() -> FnModel {
        FnModel::new(2, 1, |x: &ArrayView1<f64>| {
            array![(x[0] - 1.).powi(2) + (x[1] + 0.5).powi(2)]
        })
        .with_gradients(|x: &ArrayView1<f64>| array![[2. * (x[0] - 1.), 2. * (x[1] + 0.5)]])
    }

    fn solver(approx: Box<dyn Approximation>) -> TrustRegionSolver {
        let config = SboConfig::default().check(2, 1).unwrap();
        let mut solver = TrustRegionSolver::new(config, &array![[-2., 2.], [-2., 2.]], approx);
        solver.truth_gradients = true;
        solver
    }

    fn trust_region(solver: &TrustRegionSolver, center: Array1<f64>) -> TrustRegionState {
        let mut tr = TrustRegionState::new(2, 0.5);
        tr.set_vars_center(center);
        update_trust_region(&mut tr, &solver.xlimits);
        tr
    }

    fn truth_count<O>(problem: &Problem<O>) -> u64 {
        problem.counts.get("truth_count").copied().unwrap_or(0)
    }

    #[test]
    fn test_local_build_reuses_build_truth() {
        let mut solver = solver(Box::new(TaylorApprox::new()));
        let mut problem = Problem::new(tilted_paraboloid());
        let mut tr = trust_region(&solver, array![0., 0.]);

        solver.build(&mut problem, &mut tr, 0).unwrap();
        // one evaluation from the Taylor build, none from the center truth lookup
        assert_eq!(truth_count(&problem), 1);
        assert_eq!(solver.cache.n_hits(), 0);
        let truth = tr.response_center(ResponseKind::CorrectedTruth).unwrap();
        assert_eq!(truth.fn_vals, array![1.25]);
        assert!(truth.satisfies(ActiveSet::VALUE | ActiveSet::GRADIENT));
        assert!(tr.status_contains(TrStatus::CENTER_BUILT));
        assert!(!tr.status_contains(TrStatus::NEW_CENTER));
    }

    #[test]
    fn test_stored_center_truth_reused_after_first_iteration() {
        let mut solver = solver(Box::new(TaylorApprox::new()));
        let mut problem = Problem::new(tilted_paraboloid());
        let mut tr = trust_region(&solver, array![0., 0.]);
        solver.build(&mut problem, &mut tr, 0).unwrap();
        let eval_id = tr.response_center(ResponseKind::CorrectedTruth).unwrap().eval_id;

        solver.find_center_truth(&mut problem, &mut tr, 1, None).unwrap();
        assert_eq!(truth_count(&problem), 1);
        // neither the model nor the cache were queried
        assert_eq!(solver.cache.n_hits(), 0);
        assert_eq!(
            tr.response_center(ResponseKind::CorrectedTruth).unwrap().eval_id,
            eval_id
        );
    }

    #[test]
    fn test_fresh_center_truth_evaluation() {
        // global approximations never take the build response
        let mut global = solver(Box::new(PolynomialApprox::new(PolynomialDegree::Quadratic)));
        let mut problem = Problem::new(tilted_paraboloid());
        let mut tr = trust_region(&global, array![0.5, 0.5]);
        let build_truth = Response::new(array![99.]).with_gradients(array![[-1., 3.]]);
        global
            .find_center_truth(&mut problem, &mut tr, 0, Some(build_truth))
            .unwrap();
        assert_eq!(truth_count(&problem), 1);
        let truth = tr.response_center(ResponseKind::CorrectedTruth).unwrap();
        assert_eq!(truth.fn_vals, array![1.25]);

        // local build response lacking the required gradients
        let mut local = solver(Box::new(TaylorApprox::new()));
        let mut problem = Problem::new(tilted_paraboloid());
        let mut tr = trust_region(&local, array![0., 0.]);
        local
            .find_center_truth(&mut problem, &mut tr, 0, Some(Response::new(array![1.25])))
            .unwrap();
        assert_eq!(truth_count(&problem), 1);
        let truth = tr.response_center(ResponseKind::CorrectedTruth).unwrap();
        assert!(truth.satisfies(ActiveSet::VALUE | ActiveSet::GRADIENT));

        // stored response is not trusted on the first iteration
        local.find_center_truth(&mut problem, &mut tr, 0, None).unwrap();
        assert_eq!(local.cache.n_hits(), 1);
    }

    #[test]
    fn test_hard_convergence_projects_blocked_gradient() {
        let mut solver = solver(Box::new(TaylorApprox::new()));

        // descent direction pushes against the upper global bound of x0
        let mut tr = trust_region(&solver, array![2., 0.]);
        tr.set_response_center(
            ResponseKind::CorrectedTruth,
            Response::new(array![-2.]).with_gradients(array![[-1., 0.]]),
        );
        solver.hard_convergence_check(&mut tr).unwrap();
        assert!(tr.status_contains(TrStatus::HARD_CONVERGED));

        // same gradient at an interior point
        let mut tr = trust_region(&solver, array![0., 0.]);
        tr.set_response_center(
            ResponseKind::CorrectedTruth,
            Response::new(array![0.]).with_gradients(array![[-1., 0.]]),
        );
        solver.hard_convergence_check(&mut tr).unwrap();
        assert!(tr.converged().is_empty());
    }

    #[test]
    fn test_hard_convergence_skipped_without_gradients() {
        let mut solver = solver(Box::new(TaylorApprox::new()));
        solver.truth_gradients = false;
        let mut tr = trust_region(&solver, array![1., -0.5]);
        tr.set_response_center(ResponseKind::CorrectedTruth, Response::new(array![0.]));
        solver.hard_convergence_check(&mut tr).unwrap();
        assert!(tr.converged().is_empty());
    }
}

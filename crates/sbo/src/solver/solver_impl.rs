use crate::errors::{Result, SboError};
use crate::models::TruthModel;
use crate::solver::refresh::eval_truth;
use crate::solver::trust_region::{
    on_boundary, relative_improvement, trust_region_ratio, update_trust_region,
};
use crate::solver::{TrStatus, TrustRegionSolver, TrustRegionState};
use crate::types::{AcceptanceLogic, ActiveSet, MeritFnType, Response, ResponseKind};

use argmin::core::Problem;
use log::{debug, info};

fn stored(resp: Option<&Response>, what: &str) -> Result<Response> {
    resp.cloned()
        .ok_or_else(|| SboError::ModelError(format!("No {} response", what)))
}

impl TrustRegionSolver {
    /// One outer iteration: trust region update, approximation build,
    /// subproblem minimization and candidate verification
    pub(crate) fn trust_region_iteration<O: TruthModel>(
        &mut self,
        problem: &mut Problem<O>,
        tr: &mut TrustRegionState,
        iter: u64,
    ) -> Result<()> {
        let new_factor = tr.status_contains(TrStatus::NEW_TR_FACTOR);
        if new_factor || tr.status_contains(TrStatus::NEW_CENTER) {
            update_trust_region(tr, &self.xlimits);
        }
        // global approximations are fitted over the whole trust region
        if new_factor && self.refresh.is_global() {
            tr.reset_status_bits(TrStatus::CENTER_BUILT);
        }
        if !tr.status_contains(TrStatus::CENTER_BUILT) {
            self.build(problem, tr, iter)?;
        }
        if !tr.converged().is_empty() {
            return Ok(());
        }
        self.minimize(tr)?;
        self.verify(problem, tr, iter)
    }

    /// Evaluates the truth at the candidate, accepts or rejects it, resizes the
    /// trust region and updates convergence bookkeeping.
    fn verify<O: TruthModel>(
        &mut self,
        problem: &mut Problem<O>,
        tr: &mut TrustRegionState,
        iter: u64,
    ) -> Result<()> {
        let x_star = tr.vars_star().to_owned();
        let star_truth = eval_truth(
            problem,
            &mut self.cache,
            &x_star.view(),
            ActiveSet::VALUE,
            self.config.truth_bypass,
        )?;
        tr.set_response_star(ResponseKind::UncorrectedTruth, star_truth.clone());
        tr.set_response_star(ResponseKind::CorrectedTruth, star_truth.clone());

        let center_truth = stored(tr.response_center(ResponseKind::CorrectedTruth), "center truth")?;
        let center_approx = stored(
            tr.response_center(ResponseKind::CorrectedApprox),
            "center approximate",
        )?;
        let star_approx = stored(
            tr.response_star(ResponseKind::CorrectedApprox),
            "candidate approximate",
        )?;
        let (center_vals, star_vals) = (center_truth.fn_vals.view(), star_truth.fn_vals.view());

        if tr.filter().is_empty() {
            let (obj, violation) = self.merit.filter_point(&center_vals);
            tr.initialize_filter(obj, violation);
        }

        let kind = self.config.merit_fn;
        if matches!(kind, MeritFnType::Penalty | MeritFnType::AdaptivePenalty) {
            self.merit.update_penalty(kind, iter, &center_vals, &star_vals);
        }
        let merit_center_truth = self.merit.merit(kind, &center_vals);
        let merit_star_truth = self.merit.merit(kind, &star_vals);
        let merit_center_approx = self.merit.merit(kind, &center_approx.fn_vals.view());
        let merit_star_approx = self.merit.merit(kind, &star_approx.fn_vals.view());
        let actual = merit_center_truth - merit_star_truth;
        let predicted = merit_center_approx - merit_star_approx;
        let ratio = trust_region_ratio(actual, predicted, merit_center_approx);
        debug!(
            "Merit center/candidate: truth {}/{}, approx {}/{}, ratio = {}",
            merit_center_truth, merit_star_truth, merit_center_approx, merit_star_approx, ratio
        );

        let accepted = match self.config.acceptance {
            AcceptanceLogic::Filter => {
                let (obj, violation) = self.merit.filter_point(&star_vals);
                tr.update_filter(obj, violation)
            }
            AcceptanceLogic::TrRatio => actual > 0.,
        };
        let boundary = on_boundary(
            &x_star.view(),
            &tr.tr_lower_bounds().view(),
            &tr.tr_upper_bounds().view(),
        );
        self.resize_trust_region(tr, ratio, accepted, boundary);

        if accepted {
            info!("Candidate accepted: x={} fun(x)={}", x_star, star_truth.fn_vals);
            tr.set_status_bits(TrStatus::CANDIDATE_ACCEPTED);
            tr.promote_star();
            if kind == MeritFnType::AugmentedLagrangian {
                self.merit.update_penalty(kind, iter, &center_vals, &star_vals);
            }
        } else {
            info!("Candidate rejected: x={} fun(x)={}", x_star, star_truth.fn_vals);
        }

        let truth_improvement = relative_improvement(merit_center_truth, merit_star_truth);
        let approx_improvement = relative_improvement(merit_center_approx, merit_star_approx);
        let tol = self.config.convergence_tol;
        if accepted && truth_improvement >= tol && approx_improvement >= tol {
            tr.reset_soft_conv_count();
        } else {
            tr.increment_soft_conv_count();
        }
        debug!(
            "Relative improvements: truth {}, approx {} (soft convergence count {})",
            truth_improvement,
            approx_improvement,
            tr.soft_conv_count()
        );
        self.check_convergence(tr, iter);
        Ok(())
    }
}

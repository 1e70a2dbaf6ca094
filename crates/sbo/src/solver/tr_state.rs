use crate::solver::ParetoFilter;
use crate::types::{Response, ResponseKind};

use bitflags::bitflags;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Trust region status bits.
    ///
    /// Bits are additive: several convergence reasons may hold at the same time.
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct TrStatus: u16 {
        /// A candidate exists and is not verified yet
        const NEW_CANDIDATE = 1 << 0;
        /// The candidate was accepted
        const CANDIDATE_ACCEPTED = 1 << 1;
        /// The center changed, the approximation has to be rebuilt
        const NEW_CENTER = 1 << 2;
        /// The approximation is built at the current center
        const CENTER_BUILT = 1 << 3;
        /// The trust region size changed, bounds have to be updated
        const NEW_TR_FACTOR = 1 << 4;
        /// Projected merit gradient norm below tolerance
        const HARD_CONVERGED = 1 << 5;
        /// Too many consecutive iterations without improvement
        const SOFT_CONVERGED = 1 << 6;
        /// Trust region factor below minimum
        const MIN_TR_CONVERGED = 1 << 7;
        /// Max number of iterations reached
        const MAX_ITER_CONVERGED = 1 << 8;

        /// Any convergence reason
        const CONVERGED = Self::HARD_CONVERGED.bits()
            | Self::SOFT_CONVERGED.bits()
            | Self::MIN_TR_CONVERGED.bits()
            | Self::MAX_ITER_CONVERGED.bits();
    }
}

impl Default for TrStatus {
    fn default() -> Self {
        TrStatus::empty()
    }
}

impl TrStatus {
    /// Human readable convergence reasons, one per set convergence bit
    pub fn describe(&self) -> String {
        let reasons: Vec<&str> = [
            (TrStatus::HARD_CONVERGED, "hard convergence (projected gradient below tolerance)"),
            (TrStatus::SOFT_CONVERGED, "soft convergence (no improvement over consecutive iterations)"),
            (TrStatus::MIN_TR_CONVERGED, "trust region size below minimum"),
            (TrStatus::MAX_ITER_CONVERGED, "max number of iterations reached"),
        ]
        .into_iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, reason)| reason)
        .collect();
        if reasons.is_empty() {
            "not converged".to_string()
        } else {
            reasons.join(", ")
        }
    }
}

/// Truth and approximate responses at a point, corrected or not
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseSlots {
    corrected_approx: Option<Response>,
    uncorrected_approx: Option<Response>,
    corrected_truth: Option<Response>,
    uncorrected_truth: Option<Response>,
}

impl ResponseSlots {
    fn get(&self, kind: ResponseKind) -> Option<&Response> {
        match kind {
            ResponseKind::CorrectedApprox => self.corrected_approx.as_ref(),
            ResponseKind::UncorrectedApprox => self.uncorrected_approx.as_ref(),
            ResponseKind::CorrectedTruth => self.corrected_truth.as_ref(),
            ResponseKind::UncorrectedTruth => self.uncorrected_truth.as_ref(),
        }
    }

    fn get_mut(&mut self, kind: ResponseKind) -> &mut Option<Response> {
        match kind {
            ResponseKind::CorrectedApprox => &mut self.corrected_approx,
            ResponseKind::UncorrectedApprox => &mut self.uncorrected_approx,
            ResponseKind::CorrectedTruth => &mut self.corrected_truth,
            ResponseKind::UncorrectedTruth => &mut self.uncorrected_truth,
        }
    }
}

/// Trust region data of one optimization level: center and candidate points,
/// their responses, trust region size and bounds, status bits, filter and
/// soft convergence count.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrustRegionState {
    vars_center: Array1<f64>,
    vars_star: Array1<f64>,
    center: ResponseSlots,
    star: ResponseSlots,
    tr_factor: f64,
    tr_lower: Array1<f64>,
    tr_upper: Array1<f64>,
    /// Whether the lower (resp. upper) bound of each variable was truncated to the global bounds
    truncated: (Vec<bool>, Vec<bool>),
    status: TrStatus,
    soft_conv_count: usize,
    filter: ParetoFilter,
    /// Index of the truth model form of this level
    pub truth_level: usize,
    /// Index of the approximate model form of this level
    pub approx_level: usize,
}

impl TrustRegionState {
    /// Constructor with initial trust region factor
    pub fn new(n_vars: usize, tr_factor: f64) -> Self {
        TrustRegionState {
            vars_center: Array1::zeros(n_vars),
            vars_star: Array1::zeros(n_vars),
            tr_factor,
            tr_lower: Array1::zeros(n_vars),
            tr_upper: Array1::zeros(n_vars),
            truncated: (vec![false; n_vars], vec![false; n_vars]),
            status: TrStatus::NEW_CENTER | TrStatus::NEW_TR_FACTOR,
            ..Default::default()
        }
    }

    /// Trust region center
    pub fn vars_center(&self) -> &Array1<f64> {
        &self.vars_center
    }

    /// Sets trust region center: center responses are cleared
    pub fn set_vars_center(&mut self, x: Array1<f64>) {
        self.vars_center = x;
        self.center = ResponseSlots::default();
        self.status.remove(TrStatus::NEW_CENTER | TrStatus::CENTER_BUILT);
        self.status.insert(TrStatus::NEW_CENTER);
    }

    /// Candidate point
    pub fn vars_star(&self) -> &Array1<f64> {
        &self.vars_star
    }

    /// Sets candidate point: candidate responses are cleared
    pub fn set_vars_star(&mut self, x: Array1<f64>) {
        self.vars_star = x;
        self.star = ResponseSlots::default();
        self.status
            .remove(TrStatus::NEW_CANDIDATE | TrStatus::CANDIDATE_ACCEPTED);
        self.status.insert(TrStatus::NEW_CANDIDATE);
    }

    /// Response at the center
    pub fn response_center(&self, kind: ResponseKind) -> Option<&Response> {
        self.center.get(kind)
    }

    /// Sets response at the center
    pub fn set_response_center(&mut self, kind: ResponseKind, response: Response) {
        *self.center.get_mut(kind) = Some(response);
    }

    /// Sets response at the center with its evaluation id
    pub fn set_response_center_with_id(&mut self, kind: ResponseKind, eval_id: usize, response: Response) {
        self.set_response_center(kind, response.with_eval_id(eval_id));
    }

    /// Response at the candidate
    pub fn response_star(&self, kind: ResponseKind) -> Option<&Response> {
        self.star.get(kind)
    }

    /// Sets response at the candidate
    pub fn set_response_star(&mut self, kind: ResponseKind, response: Response) {
        *self.star.get_mut(kind) = Some(response);
    }

    /// Sets response at the candidate with its evaluation id
    pub fn set_response_star_with_id(&mut self, kind: ResponseKind, eval_id: usize, response: Response) {
        self.set_response_star(kind, response.with_eval_id(eval_id));
    }

    /// Promotes the candidate as new center, candidate responses become center responses
    pub fn promote_star(&mut self) {
        let star = std::mem::take(&mut self.star);
        self.set_vars_center(self.vars_star.clone());
        self.center = star;
        self.status.remove(TrStatus::NEW_CANDIDATE);
    }

    /// Trust region factor
    pub fn trust_region_factor(&self) -> f64 {
        self.tr_factor
    }

    /// Sets trust region factor
    pub fn set_trust_region_factor(&mut self, factor: f64) {
        self.tr_factor = factor;
        self.status.insert(TrStatus::NEW_TR_FACTOR);
    }

    /// Scales trust region factor
    pub fn scale_trust_region_factor(&mut self, mult: f64) {
        self.set_trust_region_factor(self.tr_factor * mult);
    }

    /// Trust region lower bounds
    pub fn tr_lower_bounds(&self) -> &Array1<f64> {
        &self.tr_lower
    }

    /// Trust region upper bounds
    pub fn tr_upper_bounds(&self) -> &Array1<f64> {
        &self.tr_upper
    }

    /// Lower and upper truncation flags of the trust region bounds
    pub fn truncations(&self) -> (&[bool], &[bool]) {
        (&self.truncated.0, &self.truncated.1)
    }

    /// Sets trust region bounds and truncation flags
    pub(crate) fn set_tr_bounds(
        &mut self,
        lower: Array1<f64>,
        upper: Array1<f64>,
        truncated: (Vec<bool>, Vec<bool>),
    ) {
        self.tr_lower = lower;
        self.tr_upper = upper;
        self.truncated = truncated;
        self.status.remove(TrStatus::NEW_TR_FACTOR);
    }

    /// Status bits
    pub fn status(&self) -> TrStatus {
        self.status
    }

    /// Whether all given bits are set
    pub fn status_contains(&self, bits: TrStatus) -> bool {
        self.status.contains(bits)
    }

    /// Sets given bits
    pub fn set_status_bits(&mut self, bits: TrStatus) {
        self.status.insert(bits);
    }

    /// Clears given bits
    pub fn reset_status_bits(&mut self, bits: TrStatus) {
        self.status.remove(bits);
    }

    /// Convergence bits currently set (empty when still iterating)
    pub fn converged(&self) -> TrStatus {
        self.status & TrStatus::CONVERGED
    }

    /// Soft convergence count
    pub fn soft_conv_count(&self) -> usize {
        self.soft_conv_count
    }

    /// Increments soft convergence count
    pub fn increment_soft_conv_count(&mut self) {
        self.soft_conv_count += 1;
    }

    /// Resets soft convergence count
    pub fn reset_soft_conv_count(&mut self) {
        self.soft_conv_count = 0;
    }

    /// Filter of (objective, violation) pairs
    pub fn filter(&self) -> &ParetoFilter {
        &self.filter
    }

    /// Resets the filter to the single given pair
    pub fn initialize_filter(&mut self, obj: f64, violation: f64) {
        self.filter.initialize(obj, violation);
    }

    /// Inserts the pair in the filter when not dominated, returns whether it was accepted
    pub fn update_filter(&mut self, obj: f64, violation: f64) -> bool {
        self.filter.update(obj, violation)
    }

    /// Clears soft convergence count, convergence bits and filter
    pub fn reset(&mut self) {
        self.soft_conv_count = 0;
        self.status.remove(TrStatus::CONVERGED);
        self.filter.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_center_and_star_bits() {
        let mut tr = TrustRegionState::new(2, 0.5);
        tr.set_status_bits(TrStatus::CENTER_BUILT);
        tr.set_vars_center(array![1., 2.]);
        assert!(tr.status_contains(TrStatus::NEW_CENTER));
        assert!(!tr.status_contains(TrStatus::CENTER_BUILT));

        tr.set_status_bits(TrStatus::CANDIDATE_ACCEPTED);
        tr.set_vars_star(array![1.5, 2.]);
        assert!(tr.status_contains(TrStatus::NEW_CANDIDATE | TrStatus::NEW_CENTER));
        assert!(!tr.status_contains(TrStatus::CANDIDATE_ACCEPTED));
    }

    #[test]
    fn test_responses() {
        let mut tr = TrustRegionState::new(1, 0.5);
        tr.set_vars_center(array![0.]);
        tr.set_response_center_with_id(ResponseKind::CorrectedTruth, 3, Response::new(array![1.]));
        assert_eq!(
            tr.response_center(ResponseKind::CorrectedTruth).unwrap().eval_id,
            3
        );
        assert!(tr.response_center(ResponseKind::CorrectedApprox).is_none());

        tr.set_vars_star(array![1.]);
        tr.set_response_star(ResponseKind::CorrectedTruth, Response::new(array![0.5]));
        tr.promote_star();
        assert_eq!(tr.vars_center(), &array![1.]);
        assert_eq!(
            tr.response_center(ResponseKind::CorrectedTruth).unwrap().fn_vals,
            array![0.5]
        );
        assert!(tr.response_star(ResponseKind::CorrectedTruth).is_none());
        assert!(tr.status_contains(TrStatus::NEW_CENTER));
        assert!(!tr.status_contains(TrStatus::NEW_CANDIDATE));
    }

    #[test]
    fn test_factor_bits() {
        let mut tr = TrustRegionState::new(1, 0.5);
        tr.set_tr_bounds(array![0.], array![1.], (vec![false], vec![false]));
        assert!(!tr.status_contains(TrStatus::NEW_TR_FACTOR));
        tr.scale_trust_region_factor(0.5);
        assert_eq!(tr.trust_region_factor(), 0.25);
        assert!(tr.status_contains(TrStatus::NEW_TR_FACTOR));
    }

    #[test]
    fn test_reset_idempotent() {
        let mut tr = TrustRegionState::new(1, 0.5);
        tr.set_status_bits(TrStatus::SOFT_CONVERGED | TrStatus::MIN_TR_CONVERGED);
        tr.increment_soft_conv_count();
        tr.initialize_filter(1., 0.);
        assert_eq!(
            tr.converged(),
            TrStatus::SOFT_CONVERGED | TrStatus::MIN_TR_CONVERGED
        );

        tr.reset();
        let once = (tr.soft_conv_count(), tr.status(), tr.filter().clone());
        tr.reset();
        let twice = (tr.soft_conv_count(), tr.status(), tr.filter().clone());
        assert_eq!(once, twice);
        assert_eq!(tr.soft_conv_count(), 0);
        assert!(tr.converged().is_empty());
        assert!(tr.filter().is_empty());
    }

    #[test]
    fn test_describe() {
        let status = TrStatus::SOFT_CONVERGED | TrStatus::MAX_ITER_CONVERGED | TrStatus::NEW_CENTER;
        let desc = status.describe();
        assert!(desc.contains("soft convergence"));
        assert!(desc.contains("max number of iterations"));
        assert!(!desc.contains("hard"));
        assert_eq!(TrStatus::NEW_CENTER.describe(), "not converged");
    }
}

use crate::errors::Result;
use crate::merit::{ConstraintBounds, PrimaryReduction, Slot};
use crate::solver::PenaltyConfig;
use crate::types::MeritFnType;

use log::debug;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use trbox_lsq::{bvls, nnls};

/// Maximum value of the adaptive penalty iteration offset
pub const MAX_PENALTY_ITER_OFFSET: i32 = 200;

/// Reduces objective and constraint values to a scalar merit value used
/// to accept candidates and size the trust region.
///
/// Beyond its configuration, the engine only carries the multiplier and penalty
/// state which accumulates across outer iterations of one run.
#[derive(Clone, Debug)]
pub struct MeritEngine {
    reduction: PrimaryReduction,
    bounds: ConstraintBounds,
    slots: Vec<Slot>,
    constraint_tol: f64,
    penalty_config: PenaltyConfig,

    /// Lagrange multipliers, one per slot, zero for inactive slots
    pub lagrange_mult: Array1<f64>,
    /// Augmented Lagrangian multipliers, one per slot
    pub aug_lagrange_mult: Array1<f64>,
    /// Penalty parameter
    pub penalty: f64,
    /// Forcing sequence bounding constraint violation (augmented Lagrangian)
    pub eta_sequence: f64,
    /// Iteration offset of the adaptive penalty ramp
    pub penalty_iter_offset: i32,
}

impl MeritEngine {
    /// Constructor
    pub fn new(
        reduction: PrimaryReduction,
        bounds: ConstraintBounds,
        constraint_tol: f64,
        penalty_config: PenaltyConfig,
    ) -> Self {
        let slots = bounds.slots();
        let n_slots = slots.len();
        let mut engine = MeritEngine {
            reduction,
            bounds,
            slots,
            constraint_tol,
            penalty_config,
            lagrange_mult: Array1::zeros(n_slots),
            aug_lagrange_mult: Array1::zeros(n_slots),
            penalty: 0.,
            eta_sequence: 0.,
            penalty_iter_offset: 0,
        };
        engine.reset();
        engine
    }

    /// Resets multipliers and penalty state, done at the start of each run
    pub fn reset(&mut self) {
        self.lagrange_mult.fill(0.);
        self.aug_lagrange_mult.fill(0.);
        self.penalty = self.penalty_config.initial_penalty;
        self.eta_sequence =
            self.penalty_config.eta * (1. / (2. * self.penalty)).powf(self.penalty_config.alpha_eta);
        self.penalty_iter_offset = 0;
    }

    /// Nonlinear constraint bounds
    pub fn bounds(&self) -> &ConstraintBounds {
        &self.bounds
    }

    /// Constraint slots
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Primary functions reduction
    pub fn reduction(&self) -> &PrimaryReduction {
        &self.reduction
    }

    /// Constraint tolerance
    pub fn constraint_tol(&self) -> f64 {
        self.constraint_tol
    }

    /// Whether there is any nonlinear constraint
    pub fn is_constrained(&self) -> bool {
        !self.slots.is_empty()
    }

    fn n_obj(&self) -> usize {
        self.reduction.n_obj()
    }

    fn primary<'a>(&self, fn_vals: &'a ArrayView1<f64>) -> ArrayView1<'a, f64> {
        fn_vals.slice(s![..self.n_obj()])
    }

    fn cstrs<'a>(&self, fn_vals: &'a ArrayView1<f64>) -> ArrayView1<'a, f64> {
        fn_vals.slice(s![self.n_obj()..])
    }

    fn slot_value(&self, slot: Slot, fn_vals: &ArrayView1<f64>) -> f64 {
        self.bounds.slot_value(slot, &self.cstrs(fn_vals))
    }

    fn slot_gradient(&self, slot: Slot, fn_grads: &ArrayView2<f64>) -> Array1<f64> {
        let row = self.n_obj() + self.bounds.cstr_index(slot);
        fn_grads.row(row).to_owned() * self.bounds.slot_sign(slot)
    }

    fn slot_hessian<'a>(
        &self,
        slot: Slot,
        fn_hessians: &'a [Array2<f64>],
    ) -> &'a Array2<f64> {
        &fn_hessians[self.n_obj() + self.bounds.cstr_index(slot)]
    }

    /// Whether the slot is active ie within constraint tolerance of its bound
    /// (equalities are always active)
    fn is_active(&self, slot: Slot, c: f64) -> bool {
        slot.is_equality() || c > -self.constraint_tol
    }

    /// Reduced objective value
    pub fn objective(&self, fn_vals: &ArrayView1<f64>) -> f64 {
        self.reduction.objective(&self.primary(fn_vals))
    }

    /// Reduced objective gradient
    pub fn objective_gradient(&self, fn_vals: &ArrayView1<f64>, fn_grads: &ArrayView2<f64>) -> Array1<f64> {
        self.reduction.objective_gradient(
            &self.primary(fn_vals),
            &fn_grads.slice(s![..self.n_obj(), ..]),
        )
    }

    fn objective_hessian(
        &self,
        fn_vals: &ArrayView1<f64>,
        fn_grads: &ArrayView2<f64>,
        fn_hessians: Option<&[Array2<f64>]>,
    ) -> Option<Array2<f64>> {
        self.reduction.objective_hessian(
            &self.primary(fn_vals),
            &fn_grads.slice(s![..self.n_obj(), ..]),
            fn_hessians.map(|h| &h[..self.n_obj()]),
        )
    }

    /// Sum of squared constraint violations exceeding `tol`
    pub fn constraint_violation(&self, fn_vals: &ArrayView1<f64>, tol: f64) -> f64 {
        self.bounds.violation(&self.cstrs(fn_vals), tol)
    }

    /// (objective, constraint violation) pair used by the filter
    pub fn filter_point(&self, fn_vals: &ArrayView1<f64>) -> (f64, f64) {
        (
            self.objective(fn_vals),
            self.constraint_violation(fn_vals, self.constraint_tol),
        )
    }

    /// Objective plus multiplier weighted active constraints
    pub fn lagrangian_merit(&self, fn_vals: &ArrayView1<f64>) -> f64 {
        let mut merit = self.objective(fn_vals);
        for (k, &slot) in self.slots.iter().enumerate() {
            let c = self.slot_value(slot, fn_vals);
            if self.is_active(slot, c) {
                merit += self.lagrange_mult[k] * c;
            }
        }
        merit
    }

    /// Gradient of the Lagrangian merit function
    pub fn lagrangian_gradient(&self, fn_vals: &ArrayView1<f64>, fn_grads: &ArrayView2<f64>) -> Array1<f64> {
        let mut grad = self.objective_gradient(fn_vals, fn_grads);
        for (k, &slot) in self.slots.iter().enumerate() {
            let c = self.slot_value(slot, fn_vals);
            if self.is_active(slot, c) && self.lagrange_mult[k] != 0. {
                grad.scaled_add(self.lagrange_mult[k], &self.slot_gradient(slot, fn_grads));
            }
        }
        grad
    }

    /// Hessian of the Lagrangian merit function, `None` when required hessians are missing
    pub fn lagrangian_hessian(
        &self,
        fn_vals: &ArrayView1<f64>,
        fn_grads: &ArrayView2<f64>,
        fn_hessians: Option<&[Array2<f64>]>,
    ) -> Option<Array2<f64>> {
        let mut hess = self.objective_hessian(fn_vals, fn_grads, fn_hessians)?;
        for (k, &slot) in self.slots.iter().enumerate() {
            let c = self.slot_value(slot, fn_vals);
            if self.is_active(slot, c) && self.lagrange_mult[k] != 0. {
                let h = self.slot_hessian(slot, fn_hessians?);
                hess.scaled_add(self.lagrange_mult[k] * self.bounds.slot_sign(slot), h);
            }
        }
        Some(hess)
    }

    fn psi(&self, k: usize, slot: Slot, c: f64) -> f64 {
        if slot.is_equality() {
            c
        } else {
            c.max(-self.aug_lagrange_mult[k] / (2. * self.penalty))
        }
    }

    /// Whether the augmented term of the slot depends on the variables
    fn psi_is_value(&self, k: usize, slot: Slot, c: f64) -> bool {
        slot.is_equality() || c >= -self.aug_lagrange_mult[k] / (2. * self.penalty)
    }

    /// Objective plus `(mu + r psi) psi` over every slot, active or not
    pub fn augmented_lagrangian_merit(&self, fn_vals: &ArrayView1<f64>) -> f64 {
        let mut merit = self.objective(fn_vals);
        for (k, &slot) in self.slots.iter().enumerate() {
            let psi = self.psi(k, slot, self.slot_value(slot, fn_vals));
            merit += (self.aug_lagrange_mult[k] + self.penalty * psi) * psi;
        }
        merit
    }

    /// Gradient of the augmented Lagrangian merit function
    pub fn augmented_lagrangian_gradient(
        &self,
        fn_vals: &ArrayView1<f64>,
        fn_grads: &ArrayView2<f64>,
    ) -> Array1<f64> {
        let mut grad = self.objective_gradient(fn_vals, fn_grads);
        for (k, &slot) in self.slots.iter().enumerate() {
            let c = self.slot_value(slot, fn_vals);
            if self.psi_is_value(k, slot, c) {
                let coef = self.aug_lagrange_mult[k] + 2. * self.penalty * c;
                grad.scaled_add(coef, &self.slot_gradient(slot, fn_grads));
            }
        }
        grad
    }

    /// Hessian of the augmented Lagrangian merit function, `None` when required hessians are missing
    pub fn augmented_lagrangian_hessian(
        &self,
        fn_vals: &ArrayView1<f64>,
        fn_grads: &ArrayView2<f64>,
        fn_hessians: Option<&[Array2<f64>]>,
    ) -> Option<Array2<f64>> {
        let mut hess = self.objective_hessian(fn_vals, fn_grads, fn_hessians)?;
        for (k, &slot) in self.slots.iter().enumerate() {
            let c = self.slot_value(slot, fn_vals);
            if self.psi_is_value(k, slot, c) {
                let g = self.slot_gradient(slot, fn_grads).insert_axis(Axis(1));
                hess.scaled_add(2. * self.penalty, &g.dot(&g.t()));
                let coef = self.aug_lagrange_mult[k] + 2. * self.penalty * c;
                let h = self.slot_hessian(slot, fn_hessians?);
                hess.scaled_add(coef * self.bounds.slot_sign(slot), h);
            }
        }
        Some(hess)
    }

    /// Objective plus penalty times constraint violation (with constraint tolerance)
    pub fn penalty_merit(&self, fn_vals: &ArrayView1<f64>) -> f64 {
        self.objective(fn_vals) + self.penalty * self.constraint_violation(fn_vals, self.constraint_tol)
    }

    /// Gradient of the penalty merit function
    pub fn penalty_gradient(&self, fn_vals: &ArrayView1<f64>, fn_grads: &ArrayView2<f64>) -> Array1<f64> {
        let mut grad = self.objective_gradient(fn_vals, fn_grads);
        for &slot in self.slots.iter() {
            let c = self.slot_value(slot, fn_vals);
            let violated = if slot.is_equality() {
                c.abs() > self.constraint_tol
            } else {
                c > self.constraint_tol
            };
            if violated {
                grad.scaled_add(2. * self.penalty * c, &self.slot_gradient(slot, fn_grads));
            }
        }
        grad
    }

    /// Merit value of given kind
    pub fn merit(&self, kind: MeritFnType, fn_vals: &ArrayView1<f64>) -> f64 {
        match kind {
            MeritFnType::Lagrangian => self.lagrangian_merit(fn_vals),
            MeritFnType::AugmentedLagrangian => self.augmented_lagrangian_merit(fn_vals),
            MeritFnType::Penalty | MeritFnType::AdaptivePenalty => self.penalty_merit(fn_vals),
        }
    }

    /// Merit gradient of given kind
    pub fn merit_gradient(
        &self,
        kind: MeritFnType,
        fn_vals: &ArrayView1<f64>,
        fn_grads: &ArrayView2<f64>,
    ) -> Array1<f64> {
        match kind {
            MeritFnType::Lagrangian => self.lagrangian_gradient(fn_vals, fn_grads),
            MeritFnType::AugmentedLagrangian => self.augmented_lagrangian_gradient(fn_vals, fn_grads),
            MeritFnType::Penalty | MeritFnType::AdaptivePenalty => {
                self.penalty_gradient(fn_vals, fn_grads)
            }
        }
    }

    /// Estimates Lagrange multipliers of active constraints by solving
    /// `min ||J^T lambda + grad f||` with `lambda >= 0` for inequality slots.
    ///
    /// Inactive slots get a zero multiplier. A least squares failure is returned as an error.
    pub fn update_lagrange_multipliers(
        &mut self,
        fn_vals: &ArrayView1<f64>,
        fn_grads: &ArrayView2<f64>,
    ) -> Result<()> {
        let active: Vec<(usize, Slot)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|&(_, &slot)| self.is_active(slot, self.slot_value(slot, fn_vals)))
            .map(|(k, &slot)| (k, slot))
            .collect();
        self.lagrange_mult.fill(0.);
        if active.is_empty() {
            return Ok(());
        }

        let n_vars = fn_grads.ncols();
        let mut jac_t = Array2::zeros((n_vars, active.len()));
        for (col, &(_, slot)) in active.iter().enumerate() {
            jac_t.column_mut(col).assign(&self.slot_gradient(slot, fn_grads));
        }
        let neg_grad = -self.objective_gradient(fn_vals, fn_grads);

        let mult = if active.iter().any(|(_, slot)| slot.is_equality()) {
            let lower: Array1<f64> = active
                .iter()
                .map(|(_, slot)| if slot.is_equality() { f64::NEG_INFINITY } else { 0. })
                .collect();
            let upper = Array1::from_elem(active.len(), f64::INFINITY);
            bvls(&jac_t, &neg_grad, &lower, &upper)?
        } else {
            nnls(&jac_t, &neg_grad)?
        };
        for (&(k, _), &m) in active.iter().zip(mult.iter()) {
            self.lagrange_mult[k] = m;
        }
        debug!("Lagrange multipliers = {}", self.lagrange_mult);
        Ok(())
    }

    /// Closed form augmented Lagrangian multipliers update `mu <- mu + 2 r psi`,
    /// also tightens the forcing sequence.
    pub fn update_augmented_lagrange_multipliers(&mut self, fn_vals: &ArrayView1<f64>) {
        let psis: Vec<f64> = self
            .slots
            .iter()
            .enumerate()
            .map(|(k, &slot)| self.psi(k, slot, self.slot_value(slot, fn_vals)))
            .collect();
        for (k, psi) in psis.into_iter().enumerate() {
            self.aug_lagrange_mult[k] += 2. * self.penalty * psi;
        }
        let mu = 1. / (2. * self.penalty);
        self.eta_sequence *= mu.powf(self.penalty_config.beta_eta);
        debug!(
            "Augmented Lagrange multipliers = {} (eta = {})",
            self.aug_lagrange_mult, self.eta_sequence
        );
    }

    /// Updates penalty state according to merit function type.
    ///
    /// * `Penalty`: `r = exp(iter / 10)`
    /// * `AdaptivePenalty`: `r = exp((iter + offset) / 10)` where `offset` only grows when
    ///   the candidate decreased constraint violation at an objective cost the current
    ///   penalty does not pay for.
    /// * `AugmentedLagrangian`: when the candidate violation norm is below the forcing
    ///   sequence multipliers are updated, otherwise penalty is multiplied by 10.
    pub fn update_penalty(
        &mut self,
        kind: MeritFnType,
        iter: u64,
        center_vals: &ArrayView1<f64>,
        star_vals: &ArrayView1<f64>,
    ) {
        match kind {
            MeritFnType::Penalty => {
                self.penalty = (iter as f64 / 10.).exp();
            }
            MeritFnType::AdaptivePenalty => {
                let cv_center = self.constraint_violation(center_vals, self.constraint_tol);
                let cv_star = self.constraint_violation(star_vals, self.constraint_tol);
                let f_center = self.objective(center_vals);
                let f_star = self.objective(star_vals);
                if cv_star < cv_center && f_star > f_center {
                    let required = (f_star - f_center) / (cv_center - cv_star);
                    let current = ((iter as f64 + self.penalty_iter_offset as f64) / 10.).exp();
                    if current < required {
                        let offset = (10. * required.ln() - iter as f64).ceil() as i32;
                        self.penalty_iter_offset = offset
                            .max(self.penalty_iter_offset)
                            .min(MAX_PENALTY_ITER_OFFSET);
                        debug!("Penalty iteration offset = {}", self.penalty_iter_offset);
                    }
                }
                self.penalty = ((iter as f64 + self.penalty_iter_offset as f64) / 10.).exp();
            }
            MeritFnType::AugmentedLagrangian => {
                let cv = self.constraint_violation(star_vals, 0.).sqrt();
                if cv < self.eta_sequence {
                    self.update_augmented_lagrange_multipliers(star_vals);
                } else {
                    self.penalty *= 10.;
                    self.eta_sequence = self.penalty_config.eta
                        * (1. / (2. * self.penalty)).powf(self.penalty_config.alpha_eta);
                }
            }
            MeritFnType::Lagrangian => (),
        }
        debug!("Penalty parameter = {}", self.penalty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn upper_bounded(upper: f64) -> ConstraintBounds {
        ConstraintBounds::new(array![f64::NEG_INFINITY], array![upper], Array1::zeros(0))
    }

    fn engine(bounds: ConstraintBounds) -> MeritEngine {
        MeritEngine::new(
            PrimaryReduction::single(),
            bounds,
            1e-4,
            PenaltyConfig::default(),
        )
    }

    #[test]
    fn test_penalty_merit() {
        let mut engine = engine(upper_bounded(0.));
        engine.penalty = 1.;
        let vals = array![2., 3.];
        assert_abs_diff_eq!(engine.penalty_merit(&vals.view()), 11.);
        let grads = array![[1., 0.], [0., 1.]];
        assert_abs_diff_eq!(
            engine.penalty_gradient(&vals.view(), &grads.view()),
            array![1., 6.]
        );
    }

    #[test]
    fn test_augmented_multiplier_update() {
        let mut engine = engine(upper_bounded(0.));
        engine.penalty = 1.;
        engine.aug_lagrange_mult = array![0.];
        let eta = engine.eta_sequence;
        engine.update_augmented_lagrange_multipliers(&array![0., 2.].view());
        assert_abs_diff_eq!(engine.aug_lagrange_mult[0], 4.);
        assert_abs_diff_eq!(engine.eta_sequence, eta * 0.5f64.powf(0.9));
    }

    #[test]
    fn test_augmented_lagrangian_inactive_slot() {
        let mut engine = engine(upper_bounded(0.));
        engine.penalty = 2.;
        engine.aug_lagrange_mult = array![1.];
        // psi = max(-3, -1/4) = -1/4 => term = (1 - 0.5) * -0.25
        let vals = array![1., -3.];
        assert_abs_diff_eq!(engine.augmented_lagrangian_merit(&vals.view()), 1. - 0.125);
        let grads = array![[1., 0.], [0., 1.]];
        assert_abs_diff_eq!(
            engine.augmented_lagrangian_gradient(&vals.view(), &grads.view()),
            array![1., 0.]
        );
        // violated: psi = c = 1 => (1 + 2) * 1
        let vals = array![1., 1.];
        assert_abs_diff_eq!(engine.augmented_lagrangian_merit(&vals.view()), 4.);
        assert_abs_diff_eq!(
            engine.augmented_lagrangian_gradient(&vals.view(), &grads.view()),
            array![1., 5.]
        );
        let hess = engine
            .augmented_lagrangian_hessian(
                &vals.view(),
                &grads.view(),
                Some(&[Array2::eye(2), Array2::zeros((2, 2))]),
            )
            .unwrap();
        assert_abs_diff_eq!(hess, array![[1., 0.], [0., 5.]]);
    }

    #[test]
    fn test_lagrangian_ignores_inactive() {
        let mut engine = engine(upper_bounded(0.));
        engine.lagrange_mult = array![10.];
        assert_abs_diff_eq!(engine.lagrangian_merit(&array![1., -1.].view()), 1.);
        assert_abs_diff_eq!(engine.lagrangian_merit(&array![1., 0.5].view()), 6.);
    }

    #[test]
    fn test_lagrange_multipliers_inequality() {
        // min x0^2 + x1^2 s.t. x0 + x1 >= 1, at optimum (0.5, 0.5)
        let bounds = ConstraintBounds::new(array![1.], array![f64::INFINITY], Array1::zeros(0));
        let mut engine = engine(bounds);
        let vals = array![0.5, 1.];
        let grads = array![[1., 1.], [1., 1.]];
        engine
            .update_lagrange_multipliers(&vals.view(), &grads.view())
            .unwrap();
        assert_abs_diff_eq!(engine.lagrange_mult, array![1.], epsilon = 1e-8);
        let lgrad = engine.lagrangian_gradient(&vals.view(), &grads.view());
        assert_abs_diff_eq!(lgrad, array![0., 0.], epsilon = 1e-8);
    }

    #[test]
    fn test_lagrange_multipliers_equality() {
        // same problem with x0 + x1 = 1
        let bounds = ConstraintBounds::new(Array1::zeros(0), Array1::zeros(0), array![1.]);
        let mut engine = engine(bounds);
        let vals = array![0.5, 1.];
        let grads = array![[1., 1.], [1., 1.]];
        engine
            .update_lagrange_multipliers(&vals.view(), &grads.view())
            .unwrap();
        assert_abs_diff_eq!(engine.lagrange_mult, array![-1.], epsilon = 1e-8);
    }

    #[test]
    fn test_adaptive_penalty_offset() {
        let mut engine = engine(upper_bounded(0.));
        let center = array![0., 2.];
        // violation 4 -> 1 with objective increase of 6 requires r >= 2
        let star = array![6., 1.];
        engine.update_penalty(MeritFnType::AdaptivePenalty, 0, &center.view(), &star.view());
        assert_eq!(engine.penalty_iter_offset, 7);
        assert!(engine.penalty >= 2.);
        // no decrease when not required
        let star = array![0.5, 1.];
        engine.update_penalty(MeritFnType::AdaptivePenalty, 1, &center.view(), &star.view());
        assert_eq!(engine.penalty_iter_offset, 7);
        assert_abs_diff_eq!(engine.penalty, 0.8f64.exp());
    }

    #[test]
    fn test_cgt_penalty_update() {
        let mut engine = engine(upper_bounded(0.));
        assert_abs_diff_eq!(engine.penalty, 5.);
        assert_abs_diff_eq!(engine.eta_sequence, 0.1f64.powf(0.1));
        let center = array![0., 0.];
        let star = array![0., 2.];
        engine.update_penalty(MeritFnType::AugmentedLagrangian, 0, &center.view(), &star.view());
        assert_abs_diff_eq!(engine.penalty, 50.);
        assert_abs_diff_eq!(engine.eta_sequence, 0.01f64.powf(0.1));
        assert_abs_diff_eq!(engine.aug_lagrange_mult[0], 0.);

        let star = array![0., 1e-3];
        engine.update_penalty(MeritFnType::AugmentedLagrangian, 1, &center.view(), &star.view());
        assert_abs_diff_eq!(engine.penalty, 50.);
        assert_abs_diff_eq!(engine.aug_lagrange_mult[0], 0.1, epsilon = 1e-12);
    }
}

//! Layout of nonlinear constraints and reduction of primary functions.
use crate::types::Sense;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};

/// A constraint slot: one finite side of an inequality or one equality.
///
/// Each slot has a signed value `c` which is negative or zero when satisfied:
/// * `IneqLower(i)`: `c = l_i - g_i`
/// * `IneqUpper(i)`: `c = g_i - u_i`
/// * `Eq(j)`: `c = h_j - t_j` (satisfied only when zero)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Lower side of inequality `i`
    IneqLower(usize),
    /// Upper side of inequality `i`
    IneqUpper(usize),
    /// Equality `j`
    Eq(usize),
}

impl Slot {
    /// Whether the slot is an equality
    pub fn is_equality(&self) -> bool {
        matches!(self, Slot::Eq(_))
    }
}

/// Bounds of nonlinear inequalities `l <= g(x) <= u` and targets of equalities `h(x) = t`.
///
/// Infinite bounds mean no constraint on that side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintBounds {
    /// Inequality lower bounds
    pub ineq_lower: Array1<f64>,
    /// Inequality upper bounds
    pub ineq_upper: Array1<f64>,
    /// Equality targets
    pub eq_targets: Array1<f64>,
}

impl ConstraintBounds {
    /// Constructor
    pub fn new(ineq_lower: Array1<f64>, ineq_upper: Array1<f64>, eq_targets: Array1<f64>) -> Self {
        ConstraintBounds {
            ineq_lower,
            ineq_upper,
            eq_targets,
        }
    }

    /// No nonlinear constraint
    pub fn unconstrained() -> Self {
        Self::new(Array1::zeros(0), Array1::zeros(0), Array1::zeros(0))
    }

    /// Number of inequalities
    pub fn n_ineq(&self) -> usize {
        self.ineq_lower.len()
    }

    /// Number of equalities
    pub fn n_eq(&self) -> usize {
        self.eq_targets.len()
    }

    /// Number of nonlinear constraint functions
    pub fn n_cstr(&self) -> usize {
        self.n_ineq() + self.n_eq()
    }

    /// Slots ordered as inequality sides (lower then upper, for each inequality)
    /// followed by equalities.
    pub fn slots(&self) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(2 * self.n_ineq() + self.n_eq());
        for i in 0..self.n_ineq() {
            if self.ineq_lower[i].is_finite() {
                slots.push(Slot::IneqLower(i));
            }
            if self.ineq_upper[i].is_finite() {
                slots.push(Slot::IneqUpper(i));
            }
        }
        slots.extend((0..self.n_eq()).map(Slot::Eq));
        slots
    }

    /// Index of the constraint function of the slot within `[ineq | eq]` values
    pub fn cstr_index(&self, slot: Slot) -> usize {
        match slot {
            Slot::IneqLower(i) | Slot::IneqUpper(i) => i,
            Slot::Eq(j) => self.n_ineq() + j,
        }
    }

    /// Signed slot value given constraint function values `[ineq | eq]`
    pub fn slot_value(&self, slot: Slot, cstr_vals: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> f64 {
        match slot {
            Slot::IneqLower(i) => self.ineq_lower[i] - cstr_vals[i],
            Slot::IneqUpper(i) => cstr_vals[i] - self.ineq_upper[i],
            Slot::Eq(j) => cstr_vals[self.n_ineq() + j] - self.eq_targets[j],
        }
    }

    /// Derivative sign of the slot value wrt its constraint function
    pub fn slot_sign(&self, slot: Slot) -> f64 {
        match slot {
            Slot::IneqLower(_) => -1.,
            _ => 1.,
        }
    }

    /// Gradient of the slot value given constraint gradients as (n_cstr, n_vars) matrix
    pub fn slot_gradient(
        &self,
        slot: Slot,
        cstr_grads: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Array1<f64> {
        cstr_grads.row(self.cstr_index(slot)).to_owned() * self.slot_sign(slot)
    }

    /// Sum of squared violations exceeding `tol`
    ///
    /// Inequality sides contribute `c^2` when `c > tol`,
    /// equalities contribute `c^2` when `|c| > tol`.
    pub fn violation(&self, cstr_vals: &ArrayBase<impl Data<Elem = f64>, Ix1>, tol: f64) -> f64 {
        self.slots()
            .into_iter()
            .map(|slot| {
                let c = self.slot_value(slot, cstr_vals);
                let violated = if slot.is_equality() {
                    c.abs() > tol
                } else {
                    c > tol
                };
                if violated {
                    c * c
                } else {
                    0.
                }
            })
            .sum()
    }
}

/// Reduction of the primary functions to a single objective
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrimaryReduction {
    /// Primary function weights
    pub weights: Array1<f64>,
    /// Optimization sense
    pub sense: Sense,
    /// Whether primary functions are least squares residuals
    pub least_squares: bool,
}

impl PrimaryReduction {
    /// A single objective to be minimized
    pub fn single() -> Self {
        PrimaryReduction {
            weights: Array1::ones(1),
            sense: Sense::Minimize,
            least_squares: false,
        }
    }

    /// Number of primary functions
    pub fn n_obj(&self) -> usize {
        self.weights.len()
    }

    fn sign(&self) -> f64 {
        match self.sense {
            Sense::Minimize => 1.,
            Sense::Maximize => -1.,
        }
    }

    /// Objective value from primary function values
    pub fn objective(&self, primary: &ArrayView1<f64>) -> f64 {
        if self.least_squares {
            (&self.weights * &primary.mapv(|r| r * r)).sum()
        } else {
            self.sign() * self.weights.dot(primary)
        }
    }

    /// Objective gradient from primary values and (n_obj, n_vars) gradients
    pub fn objective_gradient(&self, primary: &ArrayView1<f64>, grads: &ArrayView2<f64>) -> Array1<f64> {
        if self.least_squares {
            let coefs = &self.weights * primary * 2.;
            coefs.dot(grads)
        } else {
            self.weights.dot(grads) * self.sign()
        }
    }

    /// Objective hessian.
    ///
    /// In least squares mode the Gauss-Newton part is always available, the residual
    /// curvature being added when residual hessians are known. Otherwise primary hessians
    /// are required.
    pub fn objective_hessian(
        &self,
        primary: &ArrayView1<f64>,
        grads: &ArrayView2<f64>,
        hessians: Option<&[Array2<f64>]>,
    ) -> Option<Array2<f64>> {
        let n = grads.ncols();
        if self.least_squares {
            let mut hess = Array2::zeros((n, n));
            for (k, row) in grads.axis_iter(Axis(0)).enumerate() {
                let g = row.insert_axis(Axis(1));
                hess = hess + g.dot(&g.t()) * (2. * self.weights[k]);
                if let Some(h) = hessians {
                    hess = hess + &h[k] * (2. * self.weights[k] * primary[k]);
                }
            }
            Some(hess)
        } else {
            let h = hessians?;
            let mut hess = Array2::zeros((n, n));
            for k in 0..self.n_obj() {
                hess = hess + &h[k] * (self.sign() * self.weights[k]);
            }
            Some(hess)
        }
    }
}

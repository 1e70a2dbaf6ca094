use crate::errors::{Result, SboError};
use crate::types::SubproblemOptimizer;

use cobyla::RhoBeg;
use log::{debug, warn};
use ndarray::{arr1, Array1, Array2, Axis};

/// Objective or constraint function of a subproblem: value at `x`,
/// gradient written in the optional slice when requested.
pub trait ObjFn<U>: Fn(&[f64], Option<&mut [f64]>, &mut U) -> f64 {}
impl<T, U> ObjFn<U> for T where T: Fn(&[f64], Option<&mut [f64]>, &mut U) -> f64 {}

/// Default max number of function evaluations of a subproblem optimization
pub const SUBPROBLEM_MAX_EVAL_DEFAULT: usize = 500;

/// Facade over nonlinear programming solvers used for the approximate and
/// homotopy subproblems.
///
/// Constraints follow the `c(x) <= 0` convention.
pub(crate) struct Optimizer<'a, U: Clone> {
    algo: SubproblemOptimizer,
    name: &'a str,
    fun: &'a dyn ObjFn<U>,
    cons: Vec<&'a dyn ObjFn<U>>,
    bounds: Array2<f64>,
    user_data: &'a U,
    max_eval: usize,
    xinit: Option<Array1<f64>>,
    ftol_abs: Option<f64>,
    ftol_rel: Option<f64>,
}

impl<'a, U: Clone> Optimizer<'a, U> {
    pub fn new(
        algo: SubproblemOptimizer,
        name: &'a str,
        fun: &'a dyn ObjFn<U>,
        cons: &[&'a dyn ObjFn<U>],
        user_data: &'a U,
        bounds: &Array2<f64>,
    ) -> Self {
        Optimizer {
            algo,
            name,
            fun,
            cons: cons.to_vec(),
            bounds: bounds.clone(),
            user_data,
            max_eval: SUBPROBLEM_MAX_EVAL_DEFAULT,
            xinit: None,
            ftol_abs: None,
            ftol_rel: None,
        }
    }

    pub fn max_eval(&mut self, max_eval: usize) -> &mut Self {
        self.max_eval = max_eval;
        self
    }

    pub fn xinit(&mut self, xinit: &Array1<f64>) -> &mut Self {
        self.xinit = Some(xinit.to_owned());
        self
    }

    pub fn ftol_abs(&mut self, ftol_abs: f64) -> &mut Self {
        self.ftol_abs = Some(ftol_abs);
        self
    }

    pub fn ftol_rel(&mut self, ftol_rel: f64) -> &mut Self {
        self.ftol_rel = Some(ftol_rel);
        self
    }

    fn failure(&self, status: impl std::fmt::Debug) -> SboError {
        SboError::SubproblemError {
            name: self.name.to_string(),
            status: format!("{:?}", status),
        }
    }

    /// Runs the optimization, returns the optimum value and location.
    ///
    /// Round-off limited exits are accepted, any other failure is an error.
    pub fn minimize(&self) -> Result<(f64, Array1<f64>)> {
        let xinit = self
            .xinit
            .clone()
            .unwrap_or_else(|| self.bounds.mean_axis(Axis(1)).unwrap_or_default())
            .to_vec();
        let bounds: Vec<_> = self
            .bounds
            .outer_iter()
            .map(|row| (row[0], row[1]))
            .collect();
        debug!("Start {} optimization from {:?}", self.name, xinit);
        let res = match self.algo {
            SubproblemOptimizer::Cobyla => {
                // cobyla constraints are expected to be positive when satisfied
                let cstrs: Vec<_> = self
                    .cons
                    .iter()
                    .map(|f| move |x: &[f64], u: &mut U| -(*f)(x, None, u))
                    .collect();
                let rho_beg = bounds
                    .iter()
                    .map(|(lo, up)| up - lo)
                    .fold(f64::INFINITY, f64::min)
                    .max(f64::EPSILON)
                    / 4.;
                let res = cobyla::minimize(
                    |x: &[f64], u: &mut U| (self.fun)(x, None, u),
                    &xinit,
                    &bounds,
                    &cstrs,
                    self.user_data.clone(),
                    self.max_eval,
                    RhoBeg::All(rho_beg),
                    Some(cobyla::StopTols {
                        ftol_rel: self.ftol_rel.unwrap_or(0.0),
                        ftol_abs: self.ftol_abs.unwrap_or(0.0),
                        ..cobyla::StopTols::default()
                    }),
                );
                match res {
                    Ok((status, x_opt, y_opt)) => {
                        debug!("{} optimization status: {:?}", self.name, status);
                        (y_opt, arr1(&x_opt))
                    }
                    Err((cobyla::FailStatus::RoundoffLimited, x_opt, y_opt)) => {
                        warn!("{} optimization limited by round-off errors", self.name);
                        (y_opt, arr1(&x_opt))
                    }
                    Err((status, _, _)) => return Err(self.failure(status)),
                }
            }
            SubproblemOptimizer::Slsqp => {
                let cstrs: Vec<_> = self
                    .cons
                    .iter()
                    .map(|f| move |x: &[f64], g: Option<&mut [f64]>, u: &mut U| (*f)(x, g, u))
                    .collect();
                let res = slsqp::minimize(
                    self.fun,
                    &xinit,
                    &bounds,
                    &cstrs,
                    self.user_data.clone(),
                    self.max_eval,
                    Some(slsqp::StopTols {
                        ftol_rel: self.ftol_rel.unwrap_or(0.0),
                        ftol_abs: self.ftol_abs.unwrap_or(0.0),
                        ..slsqp::StopTols::default()
                    }),
                );
                match res {
                    Ok((status, x_opt, y_opt)) => {
                        debug!("{} optimization status: {:?}", self.name, status);
                        (y_opt, arr1(&x_opt))
                    }
                    Err((slsqp::FailStatus::RoundoffLimited, x_opt, y_opt)) => {
                        warn!("{} optimization limited by round-off errors", self.name);
                        (y_opt, arr1(&x_opt))
                    }
                    Err((status, _, _)) => return Err(self.failure(status)),
                }
            }
        };
        debug!("... end {} optimization", self.name);
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn paraboloid(x: &[f64], g: Option<&mut [f64]>, _u: &mut ()) -> f64 {
        if let Some(g) = g {
            g[0] = 2. * (x[0] - 1.);
            g[1] = 2. * (x[1] - 2.);
        }
        (x[0] - 1.).powi(2) + (x[1] - 2.).powi(2)
    }

    // x0 + x1 <= 1
    fn half_plane(x: &[f64], g: Option<&mut [f64]>, _u: &mut ()) -> f64 {
        if let Some(g) = g {
            g[0] = 1.;
            g[1] = 1.;
        }
        x[0] + x[1] - 1.
    }

    #[test]
    fn test_constrained_minimize() {
        let bounds = array![[-3., 3.], [-3., 3.]];
        for algo in [SubproblemOptimizer::Slsqp, SubproblemOptimizer::Cobyla] {
            let (y_opt, x_opt) = Optimizer::new(algo, "test", &paraboloid, &[&half_plane], &(), &bounds)
                .xinit(&array![0., 0.])
                .max_eval(1000)
                .minimize()
                .unwrap();
            // projection of (1, 2) onto x0 + x1 = 1
            assert_abs_diff_eq!(x_opt, array![0., 1.], epsilon = 1e-3);
            assert_abs_diff_eq!(y_opt, 2., epsilon = 1e-3);
        }
    }

    #[test]
    fn test_failure_status() {
        let bounds = array![[-3., 3.], [-3., 3.]];
        let optim = Optimizer::new(
            SubproblemOptimizer::Slsqp,
            "approximate subproblem",
            &paraboloid,
            &[],
            &(),
            &bounds,
        );
        let err = optim.failure(slsqp::FailStatus::ForcedStop);
        assert!(matches!(
            &err,
            SboError::SubproblemError { name, status }
                if name == "approximate subproblem" && status == "ForcedStop"
        ));
        assert_eq!(
            err.to_string(),
            "Solver failure on approximate subproblem: ForcedStop"
        );
    }

    #[test]
    fn test_bounds_only() {
        let bounds = array![[-3., 0.5], [-3., 3.]];
        let (_, x_opt) = Optimizer::new(
            SubproblemOptimizer::Slsqp,
            "test",
            &paraboloid,
            &[],
            &(),
            &bounds,
        )
        .minimize()
        .unwrap();
        assert_abs_diff_eq!(x_opt, array![0.5, 2.], epsilon = 1e-6);
    }
}

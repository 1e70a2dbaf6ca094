//! Sbo optimizer implements the trust region surrogate-based optimization
//! with the following features:
//!
//! * Local (Taylor series), multipoint (two point) and global (polynomial) approximations
//! * Hierarchical approximation when a lower fidelity model is available
//! * Additive or multiplicative discrepancy correction
//! * Nonlinear inequality and equality constraints handled through merit functions
//!   (Lagrangian, augmented Lagrangian, penalty) and optional constraint relaxation
//! * Ratio or filter based candidate acceptance
//!
//! ```no_run
//! use ndarray::{array, ArrayView1};
//! use trbox_sbo::{FnModel, SboBuilder};
//! use argmin_testfunctions::rosenbrock;
//!
//! // Rosenbrock test function: minimum y_opt = 0 at x_opt = (1, 1)
//! let model = FnModel::new(2, 1, |x: &ArrayView1<f64>| array![rosenbrock(&x.to_vec())])
//!     .with_finite_differences();
//!
//! let xlimits = array![[-2., 2.], [-2., 2.]];
//! let res = SboBuilder::optimize(model)
//!     .configure(|config| config.max_iters(100))
//!     .min_within(&xlimits)
//!     .expect("valid optimizer configuration")
//!     .run()
//!     .expect("Rosenbrock minimization");
//! println!("Rosenbrock min result = {:?}", res.x_opt);
//! ```
//!
//! Constraints are expected to be evaluated with the objective function meaning that
//! the model has to return a vector consisting of `[obj, ineq_1, ..., ineq_p, eq_1, ..., eq_q]`.
//! Inequality bounds and equality targets are declared with `inequality_bounds` and
//! `equality_targets` setters.
//!
//! ```no_run
//! use ndarray::{array, ArrayView1};
//! use trbox_sbo::{FnModel, SboBuilder};
//!
//! // min x0^2 + x1^2 subject to x0 + x1 >= 1
//! let model = FnModel::new(2, 2, |x: &ArrayView1<f64>| {
//!     array![x[0] * x[0] + x[1] * x[1], x[0] + x[1]]
//! })
//! .with_finite_differences();
//!
//! let res = SboBuilder::optimize(model)
//!     .configure(|config| {
//!         config
//!             .inequality_bounds(&array![1.], &array![f64::INFINITY])
//!             .relaxation(true, 0.9)
//!     })
//!     .min_within(&array![[-2., 2.], [-2., 2.]])
//!     .expect("valid optimizer configuration")
//!     .run()
//!     .expect("constrained minimization");
//! println!("Constrained min result = {:?}", res.x_opt);
//! ```
//!
use crate::errors::{Result, SboError};
use crate::models::*;
use crate::solver::{SboConfig, SboState, TrStatus, TrustRegionSolver};
use crate::types::*;

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{Error, Executor, State, KV};
use log::info;
use ndarray::{ArrayBase, Data, Ix2};
use serde::Serialize;

/// Json filename for configuration
pub const CONFIG_FILE: &str = "sbo_config.json";
/// Json filename for optimization history
pub const HISTORY_FILE: &str = "sbo_history.json";

/// Trust region surrogate-based optimizer builder allowing to specify
/// the truth model to be minimized.
pub struct SboFactory<M: TruthModel> {
    model: M,
    low_fidelity: Option<Box<dyn TruthModel>>,
    config: SboConfig,
}

impl<M: TruthModel> SboFactory<M> {
    /// Truth model returning `[primary fns | inequalities | equalities]` values,
    /// the number of primary functions is 1 unless set with `n_obj` configuration setter.
    pub fn optimize(model: M) -> Self {
        SboFactory {
            model,
            low_fidelity: None,
            config: SboConfig::default(),
        }
    }

    /// Set configuration of the optimizer
    pub fn configure<F: FnOnce(SboConfig) -> SboConfig>(mut self, init: F) -> Self {
        self.config = init(self.config);
        self
    }

    /// Lower fidelity model used as the approximation of the truth model
    /// (hierarchical approximation). It has to return the same functions as the truth.
    pub fn low_fidelity(mut self, model: impl TruthModel + 'static) -> Self {
        self.low_fidelity = Some(Box::new(model));
        self
    }

    /// Build a Sbo optimizer to minimize the truth model within
    /// the continuous `xlimits` specified as [[lower, upper], ...] array where the
    /// number of rows gives the dimension of the inputs.
    ///
    /// Configuration consistency and derivatives availability required by
    /// the selected strategies are checked.
    pub fn min_within(self, xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Sbo<M>> {
        let n_vars = self.model.n_vars();
        let n_fns = self.model.n_fns();
        if xlimits.ncols() != 2 || xlimits.nrows() != n_vars {
            return Err(SboError::InvalidConfigError(format!(
                "expected ({}, 2) variable bounds, got {:?}",
                n_vars,
                xlimits.dim()
            )));
        }
        if xlimits
            .rows()
            .into_iter()
            .any(|b| !(b[0].is_finite() && b[1].is_finite() && b[0] < b[1]))
        {
            return Err(SboError::InvalidConfigError(
                "variable bounds should be finite with lower < upper".to_string(),
            ));
        }
        let config = self.config.check(n_vars, n_fns)?;

        let approx: Box<dyn Approximation> = match self.low_fidelity {
            Some(low_fidelity) => {
                if low_fidelity.n_vars() != n_vars || low_fidelity.n_fns() != n_fns {
                    return Err(SboError::InvalidConfigError(format!(
                        "low fidelity model maps {} variables to {} functions, expected {} to {}",
                        low_fidelity.n_vars(),
                        low_fidelity.n_fns(),
                        n_vars,
                        n_fns
                    )));
                }
                if config.correction_order == CorrectionOrder::First
                    && !low_fidelity.supports_gradients()
                {
                    return Err(SboError::MissingDerivative(
                        "low fidelity gradients required by first order correction".to_string(),
                    ));
                }
                Box::new(HierarchicalApprox::new(low_fidelity))
            }
            None => match config.approx {
                ApproxSpec::LocalTaylor => Box::new(
                    TaylorApprox::new().with_hessians(self.model.supports_hessians()),
                ),
                ApproxSpec::MultipointTwoPoint => Box::new(TwoPointApprox::new()),
                ApproxSpec::GlobalPolynomial(degree) => {
                    let mut poly = PolynomialApprox::new(degree);
                    if let Some(n_samples) = config.global_samples {
                        poly = poly.n_samples(n_samples);
                    }
                    if let Some(seed) = config.seed {
                        poly = poly.seed(seed);
                    }
                    Box::new(poly)
                }
            },
        };

        let truth_gradients = self.model.supports_gradients();
        let requirements = [
            (
                config.merit_fn == MeritFnType::Lagrangian,
                "Lagrangian merit function",
            ),
            (
                config.subproblem_objective == SubproblemObjective::Lagrangian,
                "Lagrangian subproblem objective",
            ),
            (
                config.correction_order == CorrectionOrder::First,
                "first order correction",
            ),
            (
                approx.requires_truth_gradients(),
                "local and multipoint approximations",
            ),
        ];
        if let Some((_, what)) = requirements
            .iter()
            .find(|(required, _)| *required && !truth_gradients)
        {
            return Err(SboError::MissingDerivative(format!(
                "truth gradients required by {}",
                what
            )));
        }
        if !approx.supports_gradients() {
            if config.optimizer == SubproblemOptimizer::Slsqp {
                return Err(SboError::MissingDerivative(
                    "approximation gradients required by SLSQP optimizer".to_string(),
                ));
            }
            if config.subproblem_constraints == SubproblemConstraints::Linearized {
                return Err(SboError::MissingDerivative(
                    "approximation gradients required by linearized constraints".to_string(),
                ));
            }
        }

        Ok(Sbo {
            model: self.model,
            solver: TrustRegionSolver::new(config, xlimits, approx),
        })
    }
}

/// Sbo optimizer structure used to parameterize the underlying `argmin::Solver`
/// and trigger the optimization using `argmin::Executor`.
pub struct Sbo<M: TruthModel> {
    model: M,
    solver: TrustRegionSolver,
}

impl<M: TruthModel> Sbo<M> {
    /// Runs the (constrained) optimization of the truth model.
    pub fn run(self) -> Result<OptimResult> {
        info!("{:?}", self.solver.config);
        let outdir = self.solver.config.outdir.clone();
        if let Some(outdir) = outdir.as_ref() {
            std::fs::create_dir_all(outdir)?;
            let filepath = std::path::Path::new(outdir).join(CONFIG_FILE);
            let json = serde_json::to_string(&self.solver.config)?;
            std::fs::write(filepath, json)?;
        }

        let exec = Executor::new(self.model, self.solver);
        let result = if let Some(outdir) = outdir {
            let hist = HistoryObserver::new(outdir);
            exec.add_observer(hist, ObserverMode::Always).run()?
        } else {
            exec.run()?
        };

        let state = result.state;
        let y_opt = state
            .cost
            .clone()
            .ok_or_else(|| SboError::ModelError("No truth response at optimum".to_string()))?;
        let res = OptimResult {
            x_opt: state.tr_state.vars_center().to_owned(),
            y_opt,
            merit: state.merit,
            status: state.converged(),
            iterations: state.get_iter(),
            state,
        };
        info!(
            "Optim Result: min f(x)={} at x={} ({}, {} truth evaluations)",
            res.y_opt,
            res.x_opt,
            res.status.describe(),
            res.state.counts.get("truth_count").copied().unwrap_or(0)
        );
        Ok(res)
    }
}

/// One line of optimization history
#[derive(Serialize)]
struct HistoryRecord {
    iter: u64,
    center: Vec<f64>,
    fn_vals: Vec<f64>,
    merit: f64,
    tr_factor: f64,
    tau: f64,
    status: TrStatus,
}

impl HistoryRecord {
    fn new(state: &SboState) -> Self {
        HistoryRecord {
            iter: state.get_iter(),
            center: state.tr_state.vars_center().to_vec(),
            fn_vals: state.cost.as_ref().map(|c| c.to_vec()).unwrap_or_default(),
            merit: state.merit,
            tr_factor: state.tr_state.trust_region_factor(),
            tau: state.tau,
            status: state.tr_state.status(),
        }
    }
}

// The history observer records trust region centers with their truth values
// and writes them as json at the end of the optimization.
// Note: the observer is activated only when outdir is specified
#[derive(Default)]
struct HistoryObserver {
    dir: String,
    records: Vec<HistoryRecord>,
}

impl HistoryObserver {
    fn new(dir: String) -> Self {
        Self {
            dir,
            records: vec![],
        }
    }
}

impl Observe<SboState> for HistoryObserver {
    fn observe_init(
        &mut self,
        _name: &str,
        _state: &SboState,
        _kv: &KV,
    ) -> std::result::Result<(), Error> {
        self.records.clear();
        Ok(())
    }

    fn observe_iter(&mut self, state: &SboState, _kv: &KV) -> std::result::Result<(), Error> {
        self.records.push(HistoryRecord::new(state));
        Ok(())
    }

    fn observe_final(&mut self, _state: &SboState) -> std::result::Result<(), Error> {
        std::fs::create_dir_all(&self.dir)?;
        let filepath = std::path::Path::new(&self.dir).join(HISTORY_FILE);
        info!("Save history ({} iterations) in {:?}", self.records.len(), filepath);
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(filepath, json)?;
        Ok(())
    }
}

/// Builder of [`Sbo`] optimizer
pub type SboBuilder<M> = SboFactory<M>;

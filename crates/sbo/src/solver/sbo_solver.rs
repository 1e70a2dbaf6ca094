//! Trust region surrogate-based optimizer implemented as a [argmin::core::Solver] to benefit
//! from features coming with the argmin framework such as observers.
//!
//! Note: Depending on your need you can either use the `TrustRegionSolver` or the provided
//! `SboBuilder` which builds a `Sbo` struct wrapping the `argmin::Executor`. See [`crate::SboBuilder`]
//!
//! ```no_run
//! use ndarray::array;
//! use trbox_sbo::{FnModel, SboConfig, TaylorApprox, TrustRegionSolver};
//! use argmin::core::Executor;
//! use argmin_testfunctions::rosenbrock;
//!
//! let model = FnModel::new(2, 1, |x| array![rosenbrock(&x.to_vec())])
//!     .with_finite_differences();
//! let config = SboConfig::default()
//!     .max_iters(50)
//!     .check(2, 1)
//!     .expect("optimizer configuration validated");
//! let xlimits = array![[-2., 2.], [-2., 2.]];
//! let solver = TrustRegionSolver::new(config, &xlimits, Box::new(TaylorApprox::new()));
//! let res = Executor::new(model, solver)
//!             .run()
//!             .unwrap();
//! println!("Rosenbrock min result = {:?}", res.state);
//! ```
use crate::merit::MeritEngine;
use crate::models::{Approximation, DiscrepancyCorrection, EvalCache, TruthModel};
use crate::solver::{Relaxation, SboState, SurrogateRefresh, TrustRegionState};
use crate::types::ResponseKind;
use crate::{SboError, ValidSboConfig};

use argmin::core::{Problem, Solver, State, TerminationReason, TerminationStatus, KV};
use env_logger::{Builder, Env};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use std::time::Instant;

/// Environment variable used to set the log level
pub const TRBOX_LOG: &str = "TRBOX_LOG";

/// Implementation of `argmin::core::Solver` for the trust region surrogate-based optimizer.
/// Therefore this structure can be used with `argmin::core::Executor` and benefit
/// from observers.
///
/// One solver iteration is one outer iteration of the trust region algorithm:
/// trust region update, approximation build, subproblem minimization and
/// candidate verification.
pub struct TrustRegionSolver {
    pub(crate) config: ValidSboConfig,
    /// Matrix (nx, 2) of [lower bound, upper bound] of the nx components of x
    pub(crate) xlimits: Array2<f64>,
    pub(crate) refresh: SurrogateRefresh,
    pub(crate) merit: MeritEngine,
    pub(crate) cache: EvalCache,
    /// Whether truth gradients are available (known at init)
    pub(crate) truth_gradients: bool,
}

impl TrustRegionSolver {
    /// Constructor of the optimization within `xlimits` bounds using the given approximation
    pub fn new(
        config: ValidSboConfig,
        xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        approx: Box<dyn Approximation>,
    ) -> Self {
        let env = Env::new().filter_or(TRBOX_LOG, "info");
        let mut builder = Builder::from_env(env);
        let builder = builder.target(env_logger::Target::Stdout);
        builder.try_init().ok();

        let correction = DiscrepancyCorrection::new(config.correction_type, config.correction_order);
        let relaxation = Relaxation::new(config.relaxation.enabled, config.relaxation.alpha);
        let merit = MeritEngine::new(
            config.reduction(),
            config.cstr_bounds.clone(),
            config.constraint_tol,
            config.penalty.clone(),
        );
        TrustRegionSolver {
            xlimits: xlimits.to_owned(),
            refresh: SurrogateRefresh::new(approx, correction, relaxation),
            merit,
            cache: EvalCache::new(),
            truth_gradients: false,
            config,
        }
    }

    /// Initial trust region center: given starting point or middle of the global bounds
    fn x_start(&self) -> Array1<f64> {
        self.config
            .x_start
            .clone()
            .or_else(|| self.xlimits.mean_axis(Axis(1)))
            .unwrap_or_else(|| Array1::zeros(self.xlimits.nrows()))
    }
}

impl<O: TruthModel> Solver<O, SboState> for TrustRegionSolver {
    const NAME: &'static str = "TrustRegionSbo";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: SboState,
    ) -> std::result::Result<(SboState, Option<KV>), argmin::core::Error> {
        let model = problem
            .problem
            .as_ref()
            .ok_or_else(|| SboError::ModelError("No truth model to optimize".to_string()))?;
        self.truth_gradients = model.supports_gradients();

        // multipliers, penalty and relaxation are scoped to one run
        self.merit.reset();
        self.refresh.relaxation.reset();

        let x_start = self.x_start();
        let mut tr_state =
            TrustRegionState::new(self.xlimits.nrows(), self.config.trust_region.initial_factor);
        tr_state.set_vars_center(x_start.clone());

        let mut initial_state = state.param(x_start).max_iters(self.config.max_iters as u64);
        initial_state.tr_state = tr_state;
        initial_state.tau = self.refresh.relaxation.tau();

        info!(
            "********* Initialization: center x={} with trust region factor {}",
            initial_state.tr_state.vars_center(),
            self.config.trust_region.initial_factor
        );
        debug!("Truth gradients available: {}", self.truth_gradients);
        Ok((initial_state, None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        mut state: SboState,
    ) -> std::result::Result<(SboState, Option<KV>), argmin::core::Error> {
        let iter = state.get_iter();
        debug!(
            "********* Start iteration {}/{}",
            iter + 1,
            state.get_max_iters()
        );
        let now = Instant::now();

        let mut tr = std::mem::take(&mut state.tr_state);
        self.trust_region_iteration(problem, &mut tr, iter)?;

        let center = tr.vars_center().to_owned();
        let fn_vals = tr
            .response_center(ResponseKind::CorrectedTruth)
            .map(|resp| resp.fn_vals.clone())
            .ok_or_else(|| {
                SboError::ModelError("No truth response at trust region center".to_string())
            })?;
        let merit = self.merit.merit(self.config.merit_fn, &fn_vals.view());

        info!(
            "********* End iteration {}/{} in {:.3}s: merit={} fun(x)={} at x={} (tr factor={})",
            iter + 1,
            state.get_max_iters(),
            now.elapsed().as_secs_f64(),
            merit,
            fn_vals,
            center,
            tr.trust_region_factor()
        );

        let mut state = state.param(center).cost(fn_vals);
        state.merit = merit;
        state.tau = self.refresh.relaxation.tau();
        state.tr_state = tr;
        Ok((state, None))
    }

    fn terminate(&mut self, state: &SboState) -> TerminationStatus {
        let converged = state.tr_state.converged();
        debug!("Trust region status {:?}", state.tr_state.status());
        if converged.is_empty() {
            TerminationStatus::NotTerminated
        } else {
            TerminationStatus::Terminated(TerminationReason::SolverExit(converged.describe()))
        }
    }
}

//! This library implements a trust region surrogate-based optimization method:
//! an expensive truth model is minimized through a sequence of subproblems solved
//! on cheap approximations rebuilt within a trust region around the current iterate.
//!
//! Candidates of the approximate subproblems are verified against the truth model:
//! the ratio of actual to predicted merit improvement drives the acceptance of the
//! candidate (or a filter on objective and constraint violation) and the resizing
//! of the trust region.
//!
//! The optimizer comes with a set of options to:
//! * select the approximation: local Taylor series, two point multipoint expansion,
//!   global polynomial response surface or a lower fidelity model,
//! * correct the approximation (additive or multiplicative, zeroth or first order),
//! * handle nonlinear inequality and equality constraints through merit functions,
//! * relax constraints while the iterate is infeasible,
//! * save configuration and optimization history.
//!
//! # Examples
//!
//! ```
//! use ndarray::{array, ArrayView1};
//! use trbox_sbo::{FnModel, SboBuilder};
//!
//! // A quadratic function with its derivatives, min f(x) = 0 at x = (1, -0.5)
//! let model = FnModel::new(2, 1, |x: &ArrayView1<f64>| {
//!     array![(x[0] - 1.).powi(2) + 2. * (x[1] + 0.5).powi(2)]
//! })
//! .with_gradients(|x: &ArrayView1<f64>| array![[2. * (x[0] - 1.), 4. * (x[1] + 0.5)]])
//! .with_hessians(|_x: &ArrayView1<f64>| vec![array![[2., 0.], [0., 4.]]]);
//!
//! let res = SboBuilder::optimize(model)
//!             .configure(|config| config.max_iters(20))
//!             .min_within(&array![[-2., 2.], [-2., 2.]])
//!             .expect("optimizer configured")
//!             .run()
//!             .expect("quadratic minimized");
//! println!("Minimum found f(x) = {:?} at x = {:?}", res.y_opt, res.x_opt);
//! ```
//!
//! # Usage
//!
//! The [`SboBuilder`] allows to setup the optimizer and its configuration through
//! [`SboConfig`] setters.
//!
//! * Number of iterations and convergence tolerances
//!
//! ```
//! # use trbox_sbo::SboConfig;
//! # let config = SboConfig::default();
//!     config.max_iters(50).convergence_tol(1e-6).soft_conv_limit(3);
//! ```
//!
//! * Trust region sizing
//!
//! ```
//! # use trbox_sbo::SboConfig;
//! # let config = SboConfig::default();
//!     config.initial_tr_factor(0.5).min_tr_factor(1e-8);
//! ```
//!
//! * Approximation and correction
//!
//! ```
//! # use trbox_sbo::{ApproxSpec, CorrectionOrder, CorrectionType, PolynomialDegree, SboConfig};
//! # let config = SboConfig::default();
//!     config
//!         .approximation(ApproxSpec::GlobalPolynomial(PolynomialDegree::Quadratic))
//!         .correction(CorrectionType::Multiplicative, CorrectionOrder::Zeroth);
//! ```
//!
//! * Constraints: the truth model returns `[obj, ineq_1, ..., ineq_p, eq_1, ..., eq_q]`
//!
//! ```
//! # use ndarray::array;
//! # use trbox_sbo::{MeritFnType, AcceptanceLogic, SboConfig};
//! # let config = SboConfig::default();
//!     config
//!         .inequality_bounds(&array![f64::NEG_INFINITY], &array![0.])
//!         .equality_targets(&array![1.])
//!         .merit_fn(MeritFnType::AdaptivePenalty)
//!         .acceptance(AcceptanceLogic::TrRatio)
//!         .relaxation(true, 0.9);
//! ```
//!
//! * Least squares: primary functions are residuals
//!
//! ```
//! # use trbox_sbo::SboConfig;
//! # let config = SboConfig::default();
//!     config.n_obj(10).least_squares(true);
//! ```
//!
//! Log messages are controlled with the `TRBOX_LOG` environment variable
//! (`error`, `warn`, `info`, `debug`, `trace`), default level is `info`.
//!
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod merit;
pub mod models;

mod errors;
mod sbo;
mod solver;
mod types;

pub use crate::errors::*;
pub use crate::merit::{ConstraintBounds, MeritEngine, PrimaryReduction, Slot};
pub use crate::models::*;
pub use crate::sbo::*;
pub use crate::solver::*;
pub use crate::types::*;

mod optimizers;

//! Bounded linear least squares solvers.
//!
//! This library provides the small family of dense linear least squares
//! solvers used to estimate Lagrange multipliers in trust-region methods:
//!
//! * [`nnls`]: `min ||Ax - b||` subject to `x >= 0` (Lawson-Hanson active set),
//! * [`bvls`]: `min ||Ax - b||` subject to `l <= x <= u` where bounds may be infinite
//!   (Stark-Parker active set),
//! * [`lstsq`]: unconstrained `min ||Ax - b||`.
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use trbox_lsq::nnls;
//!
//! let a = array![[1., 0.], [0., 1.]];
//! let b = array![2., -1.];
//! let x = nnls(&a, &b).expect("nnls solved");
//! assert!((x[0] - 2.).abs() < 1e-10);
//! assert_eq!(x[1], 0.);
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod bvls;
mod errors;
mod lstsq;
mod nnls;

pub use bvls::*;
pub use errors::*;
pub use lstsq::*;
pub use nnls::*;

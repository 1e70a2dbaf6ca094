use thiserror::Error;

/// A result type for least squares solvers
pub type Result<T> = std::result::Result<T, LsqError>;

/// An error raised by the bounded least squares solvers
#[derive(Error, Debug)]
pub enum LsqError {
    /// When matrix and vector dimensions do not match
    #[error("Dimension error: {0}")]
    DimensionError(String),
    /// When lower bounds are greater than upper bounds
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
    /// When the active set iteration limit is reached
    #[error("Active set method not converged after {0} iterations")]
    NotConverged(usize),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
}

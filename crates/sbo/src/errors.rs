use thiserror::Error;

/// A result type for surrogate-based optimization
pub type Result<T> = std::result::Result<T, SboError>;

/// An error for trust-region surrogate-based optimization
#[derive(Error, Debug)]
pub enum SboError {
    /// When configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfigError(String),
    /// When a derivative required by the selected strategies is not available
    #[error("Missing derivative: {0}")]
    MissingDerivative(String),
    /// When Lagrange multipliers least squares estimation fails
    #[error("Multiplier estimation error: {0}")]
    LsqError(#[from] trbox_lsq::LsqError),
    /// When the nonlinear solver used on a subproblem fails
    #[error("Solver failure on {name}: {status}")]
    SubproblemError {
        /// Name of the failed solve
        name: String,
        /// Status reported by the solver
        status: String,
    },
    /// When a model returns a malformed response
    #[error("Model error: {0}")]
    ModelError(String),
    /// When a linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When an Argmin framework error is raised
    #[error(transparent)]
    ArgminError(argmin::core::Error),
    /// When IO fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    /// When json serialization fails
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// Errors raised by the solver travel through the argmin executor
// as opaque errors: get the original one back when possible.
impl From<argmin::core::Error> for SboError {
    fn from(err: argmin::core::Error) -> Self {
        err.downcast::<SboError>()
            .unwrap_or_else(SboError::ArgminError)
    }
}

use thiserror::Error;

/// Errors from the solver back-ends.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Non-finite value in {0}")]
    NumericError(&'static str),

    #[error("Solver is not configured for this problem shape")]
    NotConfigured,

    #[error("Unsupported problem: {0}")]
    Unsupported(&'static str),

    #[error("Solver failed: {0}")]
    Failure(String),
}

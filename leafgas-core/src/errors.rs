use thiserror::Error;

/// Error type for invalid operations.
///
/// Non-convergence of the iterative solvers is deliberately *not* an error:
/// it is reported through the status field of the result records so that
/// batch callers can keep processing the remaining records.
#[derive(Error, Debug)]
pub enum LeafGasError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Convenience type for `Result<T, LeafGasError>`.
pub type LeafGasResult<T> = Result<T, LeafGasError>;

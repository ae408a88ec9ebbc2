use leafgas_core::LeafGasError;
use thiserror::Error;

/// Error type for fitting operations.
///
/// `FitFailure` is raised only after the whole multi-start retry grid is
/// exhausted; individual non-converged attempts are retried silently.
/// Batch drivers catch these per group rather than aborting the batch.
#[derive(Error, Debug)]
pub enum CalibrateError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error(
        "fit failed after {attempts} starting points: {message} (best RSS {best_rss:.4})"
    )]
    FitFailure {
        message: String,
        attempts: usize,
        best_rss: f64,
    },
    #[error(transparent)]
    Core(#[from] LeafGasError),
}

/// Convenience type for `Result<T, CalibrateError>`.
pub type CalibrateResult<T> = Result<T, CalibrateError>;

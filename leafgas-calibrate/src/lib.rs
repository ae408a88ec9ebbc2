//! Parameter estimation for leaf gas-exchange models.
//!
//! This crate fits the models in `leafgas-core` to measurements:
//!
//! - `aci`: biochemical capacities (Vcmax, Jmax, Rd) from A-Ci curves by
//!   nonlinear least squares with data-driven starting values and a
//!   deterministic multi-start retry grid
//! - `stomata_fit`: Ball-Berry family coefficients (g0, g1, and the
//!   Leuning D0) from spot gas-exchange measurements
//! - `nls`: the shared Levenberg-Marquardt engine with asymptotic
//!   standard errors and covariance
//! - `batch`: per-group batch drivers with partial-failure semantics
//!
//! Every fit call is self-contained and deterministic given its inputs —
//! there is no cached fitting state — which keeps batch execution
//! embarrassingly parallel and reproducible.

pub mod aci;
pub mod batch;
pub mod dataset;
pub mod errors;
pub mod fit_result;
pub mod nls;
pub mod stomata_fit;

pub use aci::{fit_aci, AciFitOptions};
pub use batch::{fit_aci_batch, BatchFitResult};
pub use dataset::{AciCurve, AciPoint, GsObservation};
pub use errors::{CalibrateError, CalibrateResult};
pub use fit_result::FitResult;
pub use nls::{fit_least_squares, NlsFit, NlsOptions};
pub use stomata_fit::{fit_stomatal, GsFitOptions};

//! Stomatal-conductance model fitting.
//!
//! Regresses measured conductance on the chosen model's predictor
//! `(An/Ca)·f(D)`. With g0 free or fixed the problem is linear and solved
//! in closed form (ordinary least squares); jointly estimating the
//! Leuning D0 makes it nonlinear and routes through the shared
//! Levenberg-Marquardt engine.

use crate::dataset::GsObservation;
use crate::errors::{CalibrateError, CalibrateResult};
use crate::fit_result::FitResult;
use crate::nls::{fit_least_squares, NlsOptions};
use indexmap::IndexMap;
use leafgas_core::stomata::StomatalModel;
use ndarray::{Array1, Array2};

/// Configuration of a conductance fit.
#[derive(Debug, Clone, Default)]
pub struct GsFitOptions {
    /// Hold the intercept fixed instead of estimating it
    /// unit: mol m⁻² s⁻¹
    pub fixed_g0: Option<f64>,

    /// Estimate the Leuning D0 jointly with g0/g1 (nonlinear path);
    /// ignored for the other variants.
    pub estimate_d0: bool,

    /// Tolerances of the least-squares engine (nonlinear path only).
    pub nls: NlsOptions,
}

/// Fit conductance-model coefficients to spot measurements.
///
/// # Errors
///
/// - `InsufficientData` when there are too few observations
/// - `InvalidParameter` for unusable observations or a predictor with no
///   variation
pub fn fit_stomatal(
    observations: &[GsObservation],
    model: StomatalModel,
    options: &GsFitOptions,
) -> CalibrateResult<FitResult> {
    for observation in observations {
        observation.validate()?;
    }
    if let Some(g0) = options.fixed_g0 {
        if !g0.is_finite() || g0 < 0.0 {
            return Err(CalibrateError::InvalidParameter(format!(
                "fixed g0 must be non-negative, got {}",
                g0
            )));
        }
    }

    if options.estimate_d0 {
        if let StomatalModel::Leuning { d0 } = model {
            return fit_leuning_d0(observations, d0, options);
        }
    }

    let n_params = if options.fixed_g0.is_some() { 1 } else { 2 };
    require_points(observations.len(), n_params)?;

    let predictor: Vec<f64> = observations
        .iter()
        .map(|o| (o.an / o.ca) * model.humidity_response(o.vpd))
        .collect();
    let response: Vec<f64> = observations.iter().map(|o| o.gs).collect();

    match options.fixed_g0 {
        Some(g0) => ols_through_offset(&predictor, &response, g0),
        None => ols_with_intercept(&predictor, &response),
    }
}

fn require_points(n: usize, n_params: usize) -> CalibrateResult<()> {
    if n < n_params + 2 {
        return Err(CalibrateError::InsufficientData(format!(
            "{} observations cannot support a {}-parameter conductance fit; need at least {}",
            n,
            n_params,
            n_params + 2
        )));
    }
    Ok(())
}

/// Ordinary least squares `gs = g0 + g1 x` with both coefficients free.
fn ols_with_intercept(x: &[f64], y: &[f64]) -> CalibrateResult<FitResult> {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let sxx: f64 = x.iter().map(|x| (x - x_mean).powi(2)).sum();
    if sxx < 1e-300 {
        return Err(CalibrateError::InvalidParameter(
            "predictor has no variation; g1 is unidentifiable".to_string(),
        ));
    }
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();

    let g1 = sxy / sxx;
    let g0 = y_mean - g1 * x_mean;

    let fitted: Vec<f64> = x.iter().map(|x| g0 + g1 * x).collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(y, f)| y - f).collect();
    let rss: f64 = residuals.iter().map(|r| r * r).sum();

    let sigma2 = rss / (n - 2.0);
    let var_g1 = sigma2 / sxx;
    let var_g0 = sigma2 * (1.0 / n + x_mean * x_mean / sxx);
    let cov_g0_g1 = -x_mean * sigma2 / sxx;

    let mut estimates = IndexMap::new();
    estimates.insert("g0".to_string(), g0);
    estimates.insert("g1".to_string(), g1);
    let mut standard_errors = IndexMap::new();
    standard_errors.insert("g0".to_string(), var_g0.max(0.0).sqrt());
    standard_errors.insert("g1".to_string(), var_g1.max(0.0).sqrt());

    let mut covariance = Array2::zeros((2, 2));
    covariance[(0, 0)] = var_g0;
    covariance[(0, 1)] = cov_g0_g1;
    covariance[(1, 0)] = cov_g0_g1;
    covariance[(1, 1)] = var_g1;

    Ok(FitResult {
        estimates,
        standard_errors,
        covariance: Some(covariance),
        rss,
        converged: true,
        iterations: 0,
        n_points: x.len(),
        transition_ci: None,
        residuals: Array1::from_vec(residuals),
        fitted: Array1::from_vec(fitted),
        messages: Vec::new(),
    })
}

/// Least squares `gs = g0 + g1 x` with the intercept held at `g0`.
fn ols_through_offset(x: &[f64], y: &[f64], g0: f64) -> CalibrateResult<FitResult> {
    let sxx: f64 = x.iter().map(|x| x * x).sum();
    if sxx < 1e-300 {
        return Err(CalibrateError::InvalidParameter(
            "predictor has no variation; g1 is unidentifiable".to_string(),
        ));
    }
    let sxy: f64 = x.iter().zip(y).map(|(x, y)| x * (y - g0)).sum();
    let g1 = sxy / sxx;

    let fitted: Vec<f64> = x.iter().map(|x| g0 + g1 * x).collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(y, f)| y - f).collect();
    let rss: f64 = residuals.iter().map(|r| r * r).sum();

    let n = x.len() as f64;
    let sigma2 = rss / (n - 1.0);
    let var_g1 = sigma2 / sxx;

    let mut estimates = IndexMap::new();
    estimates.insert("g0".to_string(), g0);
    estimates.insert("g1".to_string(), g1);
    let mut standard_errors = IndexMap::new();
    standard_errors.insert("g1".to_string(), var_g1.max(0.0).sqrt());

    let mut covariance = Array2::zeros((1, 1));
    covariance[(0, 0)] = var_g1;

    Ok(FitResult {
        estimates,
        standard_errors,
        covariance: Some(covariance),
        rss,
        converged: true,
        iterations: 0,
        n_points: x.len(),
        transition_ci: None,
        residuals: Array1::from_vec(residuals),
        fitted: Array1::from_vec(fitted),
        messages: vec![format!("g0 held fixed at {:.4}", g0)],
    })
}

/// Joint (g0,) g1, D0 estimation for the Leuning variant; `d0_start`
/// seeds the nonlinear search.
fn fit_leuning_d0(
    observations: &[GsObservation],
    d0_start: f64,
    options: &GsFitOptions,
) -> CalibrateResult<FitResult> {
    if !d0_start.is_finite() || d0_start <= 0.0 {
        return Err(CalibrateError::InvalidParameter(format!(
            "Leuning D0 starting value must be positive, got {}",
            d0_start
        )));
    }
    let n_params = if options.fixed_g0.is_some() { 2 } else { 3 };
    require_points(observations.len(), n_params)?;

    // Linear pre-fit at the starting D0 provides the slope/intercept seeds
    let nominal = StomatalModel::Leuning { d0: d0_start };
    let prefit = fit_stomatal(
        observations,
        nominal,
        &GsFitOptions {
            fixed_g0: options.fixed_g0,
            estimate_d0: false,
            nls: options.nls,
        },
    )?;
    let g0_start = prefit.estimates["g0"];
    let g1_start = prefit.estimates["g1"].max(0.1);

    let fixed_g0 = options.fixed_g0;
    let model = |theta: &[f64]| -> CalibrateResult<Vec<f64>> {
        let (g0, g1, d0) = match fixed_g0 {
            Some(g0) => (g0, theta[0], theta[1]),
            None => (theta[0], theta[1], theta[2]),
        };
        if !d0.is_finite() || d0 <= 0.0 {
            return Err(CalibrateError::InvalidParameter(format!(
                "D0 must stay positive, got {}",
                d0
            )));
        }
        Ok(observations
            .iter()
            .map(|o| o.gs - (g0 + g1 * (o.an / o.ca) / (1.0 + o.vpd / d0)))
            .collect())
    };

    let start = match fixed_g0 {
        Some(_) => vec![g1_start, d0_start],
        None => vec![g0_start, g1_start, d0_start],
    };
    let fit = fit_least_squares(&model, &start, &options.nls)?;

    let names: Vec<&str> = match fixed_g0 {
        Some(_) => vec!["g1", "D0"],
        None => vec!["g0", "g1", "D0"],
    };
    let mut estimates = IndexMap::new();
    if let Some(g0) = fixed_g0 {
        estimates.insert("g0".to_string(), g0);
    }
    for (name, value) in names.iter().zip(&fit.params) {
        estimates.insert(name.to_string(), *value);
    }

    let mut standard_errors = IndexMap::new();
    let mut messages = Vec::new();
    if let Some(g0) = fixed_g0 {
        messages.push(format!("g0 held fixed at {:.4}", g0));
    }
    match &fit.standard_errors {
        Some(se) => {
            for (name, se) in names.iter().zip(se) {
                standard_errors.insert(name.to_string(), *se);
            }
        }
        None => messages.push("covariance unavailable: rank-deficient Jacobian".to_string()),
    }

    let fitted = Array1::from_iter(
        observations
            .iter()
            .zip(fit.residuals.iter())
            .map(|(o, r)| o.gs - r),
    );

    Ok(FitResult {
        estimates,
        standard_errors,
        covariance: fit.covariance,
        rss: fit.rss,
        converged: fit.converged,
        iterations: fit.iterations,
        n_points: fit.n_obs,
        transition_ci: None,
        residuals: fit.residuals,
        fitted,
        messages,
    })
}

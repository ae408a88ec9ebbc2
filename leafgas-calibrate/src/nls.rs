//! Levenberg-Marquardt nonlinear least squares.
//!
//! A small dense implementation sized for the handful of parameters the
//! gas-exchange fits estimate. The Jacobian is built by forward
//! differences, the damped normal equations are solved with an LU
//! decomposition, and parameter uncertainty comes from the usual
//! asymptotic linearization at the optimum:
//!
//! $$ \mathrm{cov} = \hat\sigma^2 (J^T J)^{-1}, \qquad
//!    \hat\sigma^2 = \mathrm{RSS} / (n - p) $$
//!
//! A trial step that makes the residual closure fail (for example by
//! pushing a capacity negative) is treated like an uphill step: the
//! damping is increased and the step retried, so the model's own domain
//! checks double as box constraints.

use crate::errors::{CalibrateError, CalibrateResult};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// Options for the Levenberg-Marquardt loop.
#[derive(Debug, Clone, Copy)]
pub struct NlsOptions {
    /// Iteration cap on accepted steps.
    pub max_iter: usize,
    /// Relative tolerance on the decrease of the residual sum of squares.
    pub ftol: f64,
    /// Relative tolerance on the parameter step.
    pub xtol: f64,
    /// Initial damping factor.
    pub lambda_init: f64,
    /// Multiplicative damping adjustment per rejected/accepted step.
    pub lambda_factor: f64,
    /// Damping ceiling; exceeding it declares the iteration stalled.
    pub lambda_max: f64,
    /// Relative forward-difference step for the Jacobian.
    pub fd_step: f64,
}

impl Default for NlsOptions {
    fn default() -> Self {
        Self {
            max_iter: 50,
            ftol: 1e-10,
            xtol: 1e-10,
            lambda_init: 1e-3,
            lambda_factor: 10.0,
            lambda_max: 1e10,
            fd_step: 1e-6,
        }
    }
}

/// Converged (or best-effort) least-squares estimate.
#[derive(Debug, Clone)]
pub struct NlsFit {
    /// Parameter estimates in caller order.
    pub params: Vec<f64>,
    /// Residual sum of squares at the estimate.
    pub rss: f64,
    /// Residuals at the estimate (observation order of the closure).
    pub residuals: Array1<f64>,
    /// Asymptotic covariance of the estimates; `None` when the Jacobian
    /// is rank-deficient at the optimum.
    pub covariance: Option<Array2<f64>>,
    /// Standard errors, aligned with `params`; `None` with the covariance.
    pub standard_errors: Option<Vec<f64>>,
    pub converged: bool,
    pub iterations: usize,
    pub n_obs: usize,
}

/// Minimise the sum of squared residuals of `model` starting from
/// `start`.
///
/// # Arguments
///
/// * `model` - Returns the residual vector (observed minus predicted) for
///   a trial parameter vector; may fail for out-of-domain trials.
/// * `start` - Initial parameter values.
/// * `options` - Loop tolerances and caps.
///
/// # Errors
///
/// `InsufficientData` when there are no more observations than
/// parameters; any error from `model` at the starting point is passed
/// through.
pub fn fit_least_squares<F>(
    model: F,
    start: &[f64],
    options: &NlsOptions,
) -> CalibrateResult<NlsFit>
where
    F: Fn(&[f64]) -> CalibrateResult<Vec<f64>>,
{
    let p = start.len();
    if p == 0 {
        return Err(CalibrateError::InvalidParameter(
            "at least one parameter is required".to_string(),
        ));
    }

    let mut params = start.to_vec();
    let mut residuals = model(&params)?;
    let n = residuals.len();
    if n <= p {
        return Err(CalibrateError::InsufficientData(format!(
            "{} observations cannot identify {} parameters",
            n, p
        )));
    }

    let mut rss = sum_of_squares(&residuals);
    let mut lambda = options.lambda_init;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < options.max_iter {
        iterations += 1;

        let jacobian = forward_difference_jacobian(&model, &params, &residuals, options)?;
        let jtj = jacobian.transpose() * &jacobian;
        let jtr = jacobian.transpose() * DVector::from_column_slice(&residuals);

        // Gradient already negligible: nothing left to do
        if jtr.amax() < 1e-12 {
            converged = true;
            break;
        }
        let neg_gradient = -jtr;

        let mut accepted = false;
        while lambda <= options.lambda_max {
            let mut damped = jtj.clone();
            for i in 0..p {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }

            let Some(step) = damped.lu().solve(&neg_gradient) else {
                lambda *= options.lambda_factor;
                continue;
            };

            let trial: Vec<f64> = params.iter().zip(step.iter()).map(|(p, s)| p + s).collect();
            let trial_residuals = match model(&trial) {
                Ok(r) => r,
                Err(_) => {
                    // Out-of-domain trial: damp harder and retry
                    lambda *= options.lambda_factor;
                    continue;
                }
            };
            let trial_rss = sum_of_squares(&trial_residuals);

            if trial_rss.is_finite() && trial_rss < rss {
                let rss_drop = (rss - trial_rss) / rss.max(f64::MIN_POSITIVE);
                let max_step = params
                    .iter()
                    .zip(step.iter())
                    .map(|(p, s)| s.abs() / p.abs().max(1.0))
                    .fold(0.0f64, f64::max);

                params = trial;
                residuals = trial_residuals;
                rss = trial_rss;
                lambda = (lambda / options.lambda_factor).max(1e-12);
                accepted = true;

                if rss_drop < options.ftol || max_step < options.xtol {
                    converged = true;
                }
                break;
            }
            lambda *= options.lambda_factor;
        }

        if !accepted {
            // Damping ceiling hit without an acceptable step
            log::debug!(
                "Levenberg-Marquardt stalled at RSS {:.6e} after {} iterations",
                rss,
                iterations
            );
            break;
        }
        if converged {
            break;
        }
    }

    let (covariance, standard_errors) =
        covariance_at(&model, &params, &residuals, rss, options)?;

    Ok(NlsFit {
        params,
        rss,
        residuals: Array1::from_vec(residuals),
        covariance,
        standard_errors,
        converged,
        iterations,
        n_obs: n,
    })
}

fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Forward-difference Jacobian of the residual vector, n × p.
fn forward_difference_jacobian<F>(
    model: &F,
    params: &[f64],
    residuals: &[f64],
    options: &NlsOptions,
) -> CalibrateResult<DMatrix<f64>>
where
    F: Fn(&[f64]) -> CalibrateResult<Vec<f64>>,
{
    let n = residuals.len();
    let p = params.len();
    let mut jacobian = DMatrix::zeros(n, p);

    let mut perturbed = params.to_vec();
    for j in 0..p {
        let h = options.fd_step * params[j].abs().max(1.0);
        perturbed[j] = params[j] + h;
        let shifted = model(&perturbed)?;
        perturbed[j] = params[j];

        if shifted.len() != n {
            return Err(CalibrateError::InvalidParameter(
                "residual vector changed length during differentiation".to_string(),
            ));
        }
        for i in 0..n {
            jacobian[(i, j)] = (shifted[i] - residuals[i]) / h;
        }
    }
    Ok(jacobian)
}

/// Asymptotic covariance and standard errors at the optimum.
#[allow(clippy::type_complexity)]
fn covariance_at<F>(
    model: &F,
    params: &[f64],
    residuals: &[f64],
    rss: f64,
    options: &NlsOptions,
) -> CalibrateResult<(Option<Array2<f64>>, Option<Vec<f64>>)>
where
    F: Fn(&[f64]) -> CalibrateResult<Vec<f64>>,
{
    let n = residuals.len();
    let p = params.len();
    let jacobian = forward_difference_jacobian(model, params, residuals, options)?;
    let jtj = jacobian.transpose() * &jacobian;

    let Some(inverse) = jtj.try_inverse() else {
        log::warn!("Jacobian is rank-deficient at the optimum; no covariance available");
        return Ok((None, None));
    };

    let sigma2 = rss / (n - p) as f64;
    let mut covariance = Array2::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            covariance[(i, j)] = sigma2 * inverse[(i, j)];
        }
    }
    let standard_errors = (0..p)
        .map(|i| covariance[(i, i)].max(0.0).sqrt())
        .collect();

    Ok((Some(covariance), Some(standard_errors)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Straight line through exact data: the quadratic objective is
    /// solved in one or two steps to machine precision.
    #[test]
    fn test_linear_model_recovered_exactly() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 2.0 + 3.0 * x).collect();

        let model = |theta: &[f64]| -> CalibrateResult<Vec<f64>> {
            Ok(x.iter()
                .zip(&y)
                .map(|(x, y)| y - (theta[0] + theta[1] * x))
                .collect())
        };

        let fit = fit_least_squares(model, &[0.5, 0.5], &NlsOptions::default()).unwrap();
        assert!(fit.converged);
        assert_relative_eq!(fit.params[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(fit.params[1], 3.0, epsilon = 1e-6);
        assert!(fit.rss < 1e-10, "RSS = {}", fit.rss);
    }

    /// Exponential decay: genuinely nonlinear, still a smooth basin.
    #[test]
    fn test_exponential_decay_recovered() {
        let x: Vec<f64> = (0..20).map(|i| 0.25 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 5.0 * (-0.8 * x).exp()).collect();

        let model = |theta: &[f64]| -> CalibrateResult<Vec<f64>> {
            Ok(x.iter()
                .zip(&y)
                .map(|(x, y)| y - theta[0] * (-theta[1] * x).exp())
                .collect())
        };

        let fit = fit_least_squares(model, &[1.0, 0.1], &NlsOptions::default()).unwrap();
        assert!(fit.converged);
        assert_relative_eq!(fit.params[0], 5.0, epsilon = 1e-4);
        assert_relative_eq!(fit.params[1], 0.8, epsilon = 1e-4);

        let se = fit.standard_errors.unwrap();
        assert!(se.iter().all(|s| s.is_finite()));
    }

    /// Out-of-domain trials must be absorbed by damping, not kill the fit.
    #[test]
    fn test_domain_errors_treated_as_rejected_steps() {
        let x: Vec<f64> = (1..15).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 4.0 * x.sqrt()).collect();

        let model = |theta: &[f64]| -> CalibrateResult<Vec<f64>> {
            if theta[0] <= 0.0 {
                return Err(CalibrateError::InvalidParameter(
                    "scale must stay positive".to_string(),
                ));
            }
            Ok(x.iter()
                .zip(&y)
                .map(|(x, y)| y - theta[0] * x.sqrt())
                .collect())
        };

        let fit = fit_least_squares(model, &[0.5], &NlsOptions::default()).unwrap();
        assert!(fit.converged);
        assert_relative_eq!(fit.params[0], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_underdetermined_problem_rejected() {
        let model = |theta: &[f64]| -> CalibrateResult<Vec<f64>> { Ok(vec![theta[0] - 1.0]) };
        let err = fit_least_squares(model, &[0.0, 0.0], &NlsOptions::default());
        assert!(matches!(err, Err(CalibrateError::InsufficientData(_))));
    }

    #[test]
    fn test_standard_errors_reflect_noise_scale() {
        // Same design, more noise -> proportionally larger SEs
        let x: Vec<f64> = (0..30).map(|i| i as f64 / 3.0).collect();
        let noise: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();

        let fit_with_scale = |scale: f64| {
            let y: Vec<f64> = x
                .iter()
                .zip(&noise)
                .map(|(x, n)| 1.0 + 2.0 * x + scale * n)
                .collect();
            let model = |theta: &[f64]| -> CalibrateResult<Vec<f64>> {
                Ok(x.iter()
                    .zip(&y)
                    .map(|(x, y)| y - (theta[0] + theta[1] * x))
                    .collect())
            };
            fit_least_squares(&model, &[0.0, 0.0], &NlsOptions::default()).unwrap()
        };

        let quiet = fit_with_scale(1.0);
        let loud = fit_with_scale(3.0);
        let se_quiet = quiet.standard_errors.unwrap()[1];
        let se_loud = loud.standard_errors.unwrap()[1];
        assert_relative_eq!(se_loud / se_quiet, 3.0, max_relative = 0.05);
    }
}

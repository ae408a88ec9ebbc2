//! A-Ci curve fitting.
//!
//! Estimates the biochemical capacities (Vcmax, Jmax, and optionally Rd)
//! from a measured assimilation-vs-Ci curve by nonlinear least squares
//! against the full demand model. The smoothed-minimum formulation means
//! no observation ever needs to be assigned to a limiting regime by the
//! caller; the Ac/Aj transition reported in the result is a post-fit
//! diagnostic.
//!
//! Starting values are derived from the data (single-point Vcmax
//! inversions in the low-Ci region, a Jmax inversion from the high-Ci
//! plateau) and the fit is retried over a deterministic grid of
//! perturbed starts when an attempt fails to converge. The retry grid
//! replaces any notion of cached "last good" starting values: each fit
//! call is self-contained and reproducible.

use crate::dataset::AciCurve;
use crate::errors::{CalibrateError, CalibrateResult};
use crate::fit_result::FitResult;
use crate::nls::{fit_least_squares, NlsFit, NlsOptions};
use indexmap::IndexMap;
use leafgas_core::biochem::{assimilation, BiochemParams};
use leafgas_core::rootfind::{find_sign_change, solve_bracketed};
use leafgas_core::temperature::TemperatureCoefficients;
use ndarray::Array1;

/// Multiplicative perturbations of (Vcmax, Jmax) starting values tried
/// in order until one attempt converges.
const RETRY_GRID: [(f64, f64); 7] = [
    (1.0, 1.0),
    (0.5, 1.0),
    (2.0, 1.0),
    (1.0, 0.5),
    (1.0, 2.0),
    (0.5, 0.5),
    (2.0, 2.0),
];

/// Configuration of an A-Ci fit.
#[derive(Debug, Clone)]
pub struct AciFitOptions {
    /// Hold dark respiration fixed at this value instead of estimating it
    /// unit: µmol m⁻² s⁻¹
    pub fixed_rd: Option<f64>,

    /// Mesophyll conductance; when given, the fit runs on
    /// `Cc = Ci − A_measured/gm` and the returned capacities are
    /// chloroplastic
    /// unit: mol m⁻² s⁻¹
    pub gmeso: Option<f64>,

    /// Prescribe the Ac/Aj transition instead of letting the smoothed
    /// minimum resolve it: observations below this Ci are fitted against
    /// the Rubisco-limited rate only, observations above against the
    /// electron-transport-limited rate only
    /// unit: µmol mol⁻¹
    pub fixed_transition_ci: Option<f64>,

    /// Quantum yield of electron transport passed to the model.
    pub alpha: f64,

    /// Curvature of the light response of J.
    pub light_curvature: f64,

    /// Curvature of the Ac/Aj smoothed minimum.
    pub curvature: f64,

    /// Temperature coefficient table used during fitting.
    pub temperature: TemperatureCoefficients,

    /// Leaf temperature applied to points that carry none (°C).
    pub default_tleaf: f64,

    /// PAR applied to points that carry none (µmol m⁻² s⁻¹).
    pub default_par: f64,

    /// Tolerances of the least-squares engine.
    pub nls: NlsOptions,
}

impl Default for AciFitOptions {
    fn default() -> Self {
        Self {
            fixed_rd: None,
            gmeso: None,
            fixed_transition_ci: None,
            alpha: 0.24,
            light_curvature: 0.85,
            curvature: 0.9999,
            temperature: TemperatureCoefficients::default(),
            default_tleaf: 25.0,
            default_par: 1500.0,
            nls: NlsOptions::default(),
        }
    }
}

/// Observation prepared for fitting: Cc basis, defaults applied.
#[derive(Debug, Clone, Copy)]
struct Observation {
    cc: f64,
    a_measured: f64,
    tleaf: f64,
    par: f64,
}

/// Fit Vcmax, Jmax (and Rd unless fixed) to one A-Ci curve.
///
/// # Errors
///
/// - `InsufficientData` when the curve cannot identify the parameters
/// - `InvalidParameter` for non-physical options or a mesophyll
///   correction that drives Cc non-positive
/// - `FitFailure` when every starting point in the retry grid fails;
///   the error carries the best residual sum of squares seen
pub fn fit_aci(curve: &AciCurve, options: &AciFitOptions) -> CalibrateResult<FitResult> {
    validate_options(options)?;

    let n_params = if options.fixed_rd.is_some() { 2 } else { 3 };
    if curve.len() < n_params + 2 {
        return Err(CalibrateError::InsufficientData(format!(
            "{} points cannot support a {}-parameter A-Ci fit; need at least {}",
            curve.len(),
            n_params,
            n_params + 2
        )));
    }

    let observations = prepare_observations(curve, options)?;
    let mean_tleaf =
        observations.iter().map(|o| o.tleaf).sum::<f64>() / observations.len() as f64;
    let mean_par = observations.iter().map(|o| o.par).sum::<f64>() / observations.len() as f64;
    let gammastar = options.temperature.gammastar_at(mean_tleaf);
    let km = options.temperature.km_at(mean_tleaf);

    let rd0 = options.fixed_rd.unwrap_or(1.5);
    let (vcmax0, jmax0) = initial_estimates(&observations, gammastar, km, rd0, options, mean_par);
    log::debug!(
        "A-Ci starting values: Vcmax {:.1}, Jmax {:.1}, Rd {:.2}",
        vcmax0,
        jmax0,
        rd0
    );

    let model = |theta: &[f64]| -> CalibrateResult<Vec<f64>> {
        let rd = options.fixed_rd.unwrap_or_else(|| theta[2]);
        let params = build_params(theta[0], theta[1], rd, options)?;
        observations
            .iter()
            .map(|o| {
                let rates = assimilation(o.cc, o.tleaf, o.par, &params)?;
                // With a prescribed transition the regimes are assigned
                // rather than blended by the smoothed minimum
                let predicted = match options.fixed_transition_ci {
                    Some(transition) if o.cc < transition => rates.ac - rates.rd,
                    Some(_) => rates.aj - rates.rd,
                    None => rates.an,
                };
                Ok(o.a_measured - predicted)
            })
            .collect()
    };

    let mut messages: Vec<String> = Vec::new();
    if let Some(rd) = options.fixed_rd {
        messages.push(format!("Rd held fixed at {:.3}", rd));
    }
    if let Some(transition) = options.fixed_transition_ci {
        messages.push(format!("transition Ci held fixed at {:.1}", transition));
    }
    if let Some(gm) = options.gmeso {
        messages.push(format!(
            "fitted on the Cc basis with gm = {:.3}; capacities are chloroplastic",
            gm
        ));
    }

    let mut best_failure: Option<(f64, usize)> = None;
    for (attempt, (f_vcmax, f_jmax)) in RETRY_GRID.iter().enumerate() {
        let mut start = vec![vcmax0 * f_vcmax, jmax0 * f_jmax];
        if options.fixed_rd.is_none() {
            start.push(rd0);
        }

        match fit_least_squares(&model, &start, &options.nls) {
            Ok(fit) if fit.converged => {
                if attempt > 0 {
                    log::debug!("A-Ci fit accepted retry start {}", attempt);
                    messages.push(format!(
                        "primary starting values failed; converged from retry start {}",
                        attempt
                    ));
                }
                return Ok(assemble_result(
                    fit, options, mean_tleaf, mean_par, &observations, messages,
                ));
            }
            Ok(fit) => {
                if best_failure.map_or(true, |(rss, _)| fit.rss < rss) {
                    best_failure = Some((fit.rss, fit.iterations));
                }
            }
            Err(error) => {
                log::debug!("A-Ci attempt {} failed outright: {}", attempt, error);
            }
        }
    }

    let (best_rss, _) = best_failure.unwrap_or((f64::INFINITY, 0));
    Err(CalibrateError::FitFailure {
        message: "no starting point converged".to_string(),
        attempts: RETRY_GRID.len(),
        best_rss,
    })
}

fn validate_options(options: &AciFitOptions) -> CalibrateResult<()> {
    if let Some(rd) = options.fixed_rd {
        if !rd.is_finite() || rd < 0.0 {
            return Err(CalibrateError::InvalidParameter(format!(
                "fixed Rd must be non-negative, got {}",
                rd
            )));
        }
    }
    if let Some(gm) = options.gmeso {
        if !gm.is_finite() || gm <= 0.0 {
            return Err(CalibrateError::InvalidParameter(format!(
                "gmeso must be positive, got {}",
                gm
            )));
        }
    }
    if let Some(transition) = options.fixed_transition_ci {
        if !transition.is_finite() || transition <= 0.0 {
            return Err(CalibrateError::InvalidParameter(format!(
                "fixed transition Ci must be positive, got {}",
                transition
            )));
        }
    }
    options.temperature.validate()?;
    Ok(())
}

fn prepare_observations(
    curve: &AciCurve,
    options: &AciFitOptions,
) -> CalibrateResult<Vec<Observation>> {
    curve
        .points()
        .iter()
        .map(|point| {
            let cc = match options.gmeso {
                Some(gm) => {
                    let cc = point.ci - point.a_measured / gm;
                    if cc <= 0.0 {
                        return Err(CalibrateError::InvalidParameter(format!(
                            "gm = {} implies non-positive Cc at Ci = {}",
                            gm, point.ci
                        )));
                    }
                    cc
                }
                None => point.ci,
            };
            Ok(Observation {
                cc,
                a_measured: point.a_measured,
                tleaf: point.tleaf.unwrap_or(options.default_tleaf),
                par: point.par.unwrap_or(options.default_par),
            })
        })
        .collect()
}

fn build_params(
    vcmax: f64,
    jmax: f64,
    rd: f64,
    options: &AciFitOptions,
) -> CalibrateResult<BiochemParams> {
    let params = BiochemParams {
        vcmax25: vcmax,
        jmax25: jmax,
        rd25: rd,
        alpha: options.alpha,
        light_curvature: options.light_curvature,
        curvature: options.curvature,
        temperature: options.temperature.clone(),
    };
    params.validate()?;
    Ok(params)
}

/// Data-driven starting values for (Vcmax, Jmax).
///
/// Vcmax comes from single-point inversions of the Rubisco-limited
/// equation over the low-Cc region; Jmax from inverting the electron
/// transport implied by the high-Cc plateau. Both are clamped to broad
/// physical ranges so a degenerate curve still yields a usable start.
fn initial_estimates(
    observations: &[Observation],
    gammastar: f64,
    km: f64,
    rd0: f64,
    options: &AciFitOptions,
    mean_par: f64,
) -> (f64, f64) {
    let usable: Vec<&Observation> = observations
        .iter()
        .filter(|o| o.cc > gammastar + 5.0)
        .collect();
    if usable.is_empty() {
        return (50.0, 100.0);
    }

    // Low-Cc region: everything below 250 µmol/mol, or the lowest third
    let low: Vec<&Observation> = {
        let below: Vec<&Observation> =
            usable.iter().copied().filter(|o| o.cc < 250.0).collect();
        if below.len() >= 2 {
            below
        } else {
            let take = (usable.len() / 3).max(1);
            usable.iter().copied().take(take).collect()
        }
    };
    let mut vcmax_inversions: Vec<f64> = low
        .iter()
        .map(|o| (o.a_measured + rd0) * (o.cc + km) / (o.cc - gammastar))
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    let vcmax0 = median(&mut vcmax_inversions)
        .unwrap_or(50.0)
        .clamp(5.0, 500.0);

    // High-Cc plateau: the top third carries the electron-transport signal
    let take = (usable.len() / 3).max(1);
    let j_est = usable
        .iter()
        .rev()
        .take(take)
        .map(|o| 4.0 * (o.a_measured + rd0) * (o.cc + 2.0 * gammastar) / (o.cc - gammastar))
        .filter(|j| j.is_finite() && *j > 0.0)
        .fold(f64::NAN, f64::max);

    let jmax0 = if j_est.is_finite() {
        invert_light_response(j_est, mean_par, options)
            .unwrap_or(1.7 * vcmax0)
            .clamp(5.0, 1000.0)
    } else {
        (1.7 * vcmax0).clamp(5.0, 1000.0)
    };

    (vcmax0, jmax0)
}

/// Jmax implied by an observed electron-transport rate at a given PAR,
/// from the non-rectangular hyperbola. `None` when the rate exceeds what
/// any Jmax could deliver at that light.
fn invert_light_response(j: f64, par: f64, options: &AciFitOptions) -> Option<f64> {
    let aq = options.alpha * par;
    if aq <= j {
        return None;
    }
    let jmax = j * (aq - options.light_curvature * j) / (aq - j);
    (jmax.is_finite() && jmax > 0.0).then_some(jmax)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[values.len() / 2])
}

fn assemble_result(
    fit: NlsFit,
    options: &AciFitOptions,
    mean_tleaf: f64,
    mean_par: f64,
    observations: &[Observation],
    mut messages: Vec<String>,
) -> FitResult {
    let vcmax = fit.params[0];
    let jmax = fit.params[1];
    let rd = options.fixed_rd.unwrap_or_else(|| fit.params[2]);

    let mut estimates = IndexMap::new();
    estimates.insert("Vcmax".to_string(), vcmax);
    estimates.insert("Jmax".to_string(), jmax);
    estimates.insert("Rd".to_string(), rd);

    let mut standard_errors = IndexMap::new();
    match &fit.standard_errors {
        Some(se) => {
            standard_errors.insert("Vcmax".to_string(), se[0]);
            standard_errors.insert("Jmax".to_string(), se[1]);
            if options.fixed_rd.is_none() {
                standard_errors.insert("Rd".to_string(), se[2]);
            }
        }
        None => {
            messages.push("covariance unavailable: rank-deficient Jacobian".to_string());
        }
    }

    let transition_ci = options
        .fixed_transition_ci
        .or_else(|| locate_transition(vcmax, jmax, rd, options, mean_tleaf, mean_par));

    let fitted = Array1::from_iter(
        observations
            .iter()
            .zip(fit.residuals.iter())
            .map(|(o, r)| o.a_measured - r),
    );

    FitResult {
        estimates,
        standard_errors,
        covariance: fit.covariance,
        rss: fit.rss,
        converged: fit.converged,
        iterations: fit.iterations,
        n_points: fit.n_obs,
        transition_ci,
        residuals: fit.residuals,
        fitted,
        messages,
    }
}

/// Ci at which the fitted Ac and Aj cross, evaluated at the curve's mean
/// temperature and light. `None` when the fitted curve is single-regime
/// over the searched range.
fn locate_transition(
    vcmax: f64,
    jmax: f64,
    rd: f64,
    options: &AciFitOptions,
    tleaf: f64,
    par: f64,
) -> Option<f64> {
    let params = build_params(vcmax, jmax, rd, options).ok()?;
    let difference = |ci: f64| match assimilation(ci, tleaf, par, &params) {
        Ok(rates) => rates.ac - rates.aj,
        Err(_) => f64::NAN,
    };

    let gammastar = options.temperature.gammastar_at(tleaf);
    let (a, b) = find_sign_change(&difference, gammastar + 1.0, 3000.0, 128)?;
    let root = solve_bracketed(&difference, a, b, 1e-9, 1e-9, 100);
    root.converged.then_some(root.x)
}

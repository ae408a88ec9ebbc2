//! Shared result record for all fitters.

use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Two-sided 97.5 % quantiles of Student's t for 1-30 degrees of freedom;
/// the normal quantile is used beyond the table.
const T_975: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];

fn t_quantile_975(df: usize) -> f64 {
    if df == 0 {
        f64::INFINITY
    } else if df <= T_975.len() {
        T_975[df - 1]
    } else {
        1.960
    }
}

/// Result of one fit call: point estimates, uncertainty, diagnostics.
///
/// The same record type is used by the A-Ci and stomatal fitters; the
/// `transition_ci` diagnostic applies to A-Ci fits only and stays `None`
/// otherwise. Created once per fit and not mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Parameter estimates by name, insertion-ordered. Fixed (not
    /// estimated) parameters are included for completeness.
    pub estimates: IndexMap<String, f64>,

    /// Asymptotic standard errors for the *estimated* parameters;
    /// fixed parameters have no entry.
    pub standard_errors: IndexMap<String, f64>,

    /// Covariance of the estimated parameters, in `standard_errors`
    /// order; `None` when the Jacobian was rank-deficient.
    pub covariance: Option<Array2<f64>>,

    /// Residual sum of squares at the estimate.
    pub rss: f64,

    /// Whether the optimiser met its tolerances.
    pub converged: bool,

    /// Optimiser iterations of the accepted attempt.
    pub iterations: usize,

    /// Number of observations.
    pub n_points: usize,

    /// Ci at which the Rubisco- and electron-transport-limited rates
    /// cross, located post-fit; `None` when the curve has no crossing in
    /// the searched range (or for non-A-Ci fits).
    pub transition_ci: Option<f64>,

    /// Residuals in observation order (plot-ready).
    pub residuals: Array1<f64>,

    /// Fitted values in observation order.
    pub fitted: Array1<f64>,

    /// Diagnostic messages accumulated during the fit (retries, fixed
    /// parameters, degraded uncertainty information).
    pub messages: Vec<String>,
}

impl FitResult {
    /// Normal-theory 95 % confidence interval for an estimated
    /// parameter; `None` for unknown or fixed parameters.
    pub fn confidence_interval(&self, name: &str) -> Option<(f64, f64)> {
        let estimate = *self.estimates.get(name)?;
        let se = *self.standard_errors.get(name)?;
        let df = self.n_points.saturating_sub(self.standard_errors.len());
        let half_width = t_quantile_975(df) * se;
        Some((estimate - half_width, estimate + half_width))
    }

    /// Residual standard error `sqrt(RSS / (n - p))`.
    pub fn residual_standard_error(&self) -> f64 {
        let df = self.n_points.saturating_sub(self.standard_errors.len());
        if df == 0 {
            f64::NAN
        } else {
            (self.rss / df as f64).sqrt()
        }
    }

    /// Human-readable fit report.
    ///
    /// Non-converged fits are flagged prominently rather than silently
    /// reported alongside healthy ones.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if !self.converged {
            out.push_str("*** NOT CONVERGED — estimates are best-effort ***\n");
        }
        out.push_str(&format!(
            "n = {}, RSS = {:.4}, residual SE = {:.4}\n",
            self.n_points,
            self.rss,
            self.residual_standard_error()
        ));
        for (name, value) in &self.estimates {
            match self.standard_errors.get(name) {
                Some(se) => {
                    let (lo, hi) = self
                        .confidence_interval(name)
                        .expect("estimated parameter has an interval");
                    out.push_str(&format!(
                        "  {:<8} {:>10.3} ± {:.3}  (95% CI {:.3} – {:.3})\n",
                        name, value, se, lo, hi
                    ));
                }
                None => {
                    out.push_str(&format!("  {:<8} {:>10.3}  (fixed)\n", name, value));
                }
            }
        }
        if let Some(transition) = self.transition_ci {
            out.push_str(&format!("  transition Ci ≈ {:.1}\n", transition));
        }
        for message in &self.messages {
            out.push_str(&format!("  note: {}\n", message));
        }
        out
    }
}

//! Batch fitting with partial-failure semantics.
//!
//! A batch maps group identifiers to curves; groups are fitted
//! independently and in parallel, and one group's failure never aborts
//! the others. The batch result keeps the caller's group order and its
//! summary names failed and non-converged groups explicitly instead of
//! silently dropping them.

use crate::aci::{fit_aci, AciFitOptions};
use crate::dataset::AciCurve;
use crate::errors::CalibrateResult;
use crate::fit_result::FitResult;
use indexmap::IndexMap;
use rayon::prelude::*;

/// Per-group outcomes of a batch A-Ci fit.
#[derive(Debug)]
pub struct BatchFitResult {
    results: IndexMap<String, CalibrateResult<FitResult>>,
}

impl BatchFitResult {
    /// Outcome for one group, if present.
    pub fn get(&self, group: &str) -> Option<&CalibrateResult<FitResult>> {
        self.results.get(group)
    }

    /// All outcomes in input order.
    pub fn results(&self) -> &IndexMap<String, CalibrateResult<FitResult>> {
        &self.results
    }

    /// Consume the batch, yielding the outcome map.
    pub fn into_results(self) -> IndexMap<String, CalibrateResult<FitResult>> {
        self.results
    }

    pub fn n_groups(&self) -> usize {
        self.results.len()
    }

    pub fn n_failed(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }

    pub fn n_converged(&self) -> usize {
        self.results
            .values()
            .filter(|r| matches!(r, Ok(fit) if fit.converged))
            .count()
    }

    /// One-line-per-group report; failures and non-converged fits are
    /// flagged, never omitted.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} groups: {} converged, {} failed\n",
            self.n_groups(),
            self.n_converged(),
            self.n_failed()
        );
        for (group, result) in &self.results {
            match result {
                Ok(fit) if fit.converged => {
                    out.push_str(&format!(
                        "  {:<12} ok       Vcmax {:.1}, Jmax {:.1}, Rd {:.2}, RSS {:.3}\n",
                        group,
                        fit.estimates["Vcmax"],
                        fit.estimates["Jmax"],
                        fit.estimates["Rd"],
                        fit.rss
                    ));
                }
                Ok(fit) => {
                    out.push_str(&format!(
                        "  {:<12} NOT CONVERGED (RSS {:.3})\n",
                        group, fit.rss
                    ));
                }
                Err(error) => {
                    out.push_str(&format!("  {:<12} FAILED: {}\n", group, error));
                }
            }
        }
        out
    }
}

/// Fit each named curve independently, in parallel.
///
/// Order of the input map is preserved in the result. Per-group errors
/// are captured in the mapping rather than propagated.
pub fn fit_aci_batch(
    curves: &IndexMap<String, AciCurve>,
    options: &AciFitOptions,
) -> BatchFitResult {
    let entries: Vec<(&String, &AciCurve)> = curves.iter().collect();
    let fitted: Vec<(String, CalibrateResult<FitResult>)> = entries
        .par_iter()
        .map(|(group, curve)| ((*group).clone(), fit_aci(curve, options)))
        .collect();

    BatchFitResult {
        results: fitted.into_iter().collect(),
    }
}

//! Empirical stomatal-conductance (supply-side) models.
//!
//! The Ball-Berry family relates stomatal conductance to assimilation,
//! ambient CO2 and a humidity-deficit response:
//!
//! $$ g_s = g_0 + g_1 \frac{A_n}{C_a} f(D) $$
//!
//! Each variant contributes only its humidity response f(D); there is no
//! behaviour hierarchy beyond that.

use crate::errors::{LeafGasError, LeafGasResult};
use serde::{Deserialize, Serialize};

/// Humidity-response variant of the conductance model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StomatalModel {
    /// No humidity response: f(D) = 1.
    BallBerry,
    /// Hyperbolic decline with an offset, f(D) = 1 / (1 + D/D0).
    Leuning {
        /// Sensitivity parameter of the humidity decline (kPa).
        d0: f64,
    },
    /// Square-root decline, f(D) = 1 / sqrt(D).
    Medlyn,
}

impl StomatalModel {
    /// The variant's humidity response f(D).
    pub fn humidity_response(&self, vpd: f64) -> f64 {
        match *self {
            StomatalModel::BallBerry => 1.0,
            StomatalModel::Leuning { d0 } => 1.0 / (1.0 + vpd / d0),
            StomatalModel::Medlyn => 1.0 / vpd.sqrt(),
        }
    }

    /// Check variant-specific parameters.
    pub fn validate(&self) -> LeafGasResult<()> {
        if let StomatalModel::Leuning { d0 } = *self {
            if !d0.is_finite() || d0 <= 0.0 {
                return Err(LeafGasError::InvalidParameter(format!(
                    "Leuning d0 must be positive, got {}",
                    d0
                )));
            }
        }
        Ok(())
    }
}

/// Coefficients of the stomatal-conductance model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StomatalParams {
    /// Residual conductance when assimilation is zero
    /// unit: mol m⁻² s⁻¹
    pub g0: f64,

    /// Slope of the conductance response to `An/Ca · f(D)`
    /// unit: dimensionless (Ball-Berry/Leuning) or kPa^0.5 (Medlyn)
    pub g1: f64,

    pub model: StomatalModel,
}

impl StomatalParams {
    pub fn new(g0: f64, g1: f64, model: StomatalModel) -> LeafGasResult<Self> {
        let params = Self { g0, g1, model };
        params.validate()?;
        Ok(params)
    }

    /// Check that the coefficients are physically meaningful.
    pub fn validate(&self) -> LeafGasResult<()> {
        if !self.g0.is_finite() || self.g0 < 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "g0 must be non-negative, got {}",
                self.g0
            )));
        }
        if !self.g1.is_finite() || self.g1 <= 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "g1 must be positive, got {}",
                self.g1
            )));
        }
        self.model.validate()
    }

    /// Stomatal conductance to water vapour (mol m⁻² s⁻¹) implied by an
    /// assimilation rate.
    ///
    /// Negative assimilation is evaluated with the same formula; the
    /// prediction below the light-compensation point is of questionable
    /// physical validity (and can fall below `g0`), so a warning is
    /// logged rather than special-casing the value.
    ///
    /// # Arguments
    ///
    /// * `an` - Net assimilation (µmol m⁻² s⁻¹)
    /// * `ca` - Ambient CO2 mole fraction (µmol mol⁻¹)
    /// * `vpd` - Vapour pressure deficit (kPa)
    pub fn conductance(&self, an: f64, ca: f64, vpd: f64) -> LeafGasResult<f64> {
        if !ca.is_finite() || ca <= 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "ca must be positive, got {}",
                ca
            )));
        }
        if !vpd.is_finite() || vpd <= 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "vpd must be positive, got {}",
                vpd
            )));
        }
        if an < 0.0 {
            log::warn!(
                "conductance evaluated at negative assimilation ({:.3}); \
                 prediction below the light-compensation point is questionable",
                an
            );
        }
        Ok(self.g0 + self.g1 * (an / ca) * self.model.humidity_response(vpd))
    }

    /// [`conductance`](Self::conductance) without validation or logging.
    ///
    /// For inner solver loops that evaluate the model many times per
    /// solve with already-validated inputs.
    pub fn conductance_unchecked(&self, an: f64, ca: f64, vpd: f64) -> f64 {
        self.g0 + self.g1 * (an / ca) * self.model.humidity_response(vpd)
    }
}

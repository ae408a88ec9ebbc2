//! Environmental drivers of a single gas-exchange evaluation.

use crate::errors::{LeafGasError, LeafGasResult};
use serde::{Deserialize, Serialize};

/// Environmental state for one leaf-level evaluation.
///
/// Instances are cheap value objects constructed per call; solvers never
/// mutate them (the energy-balance loop works on its own copy).
///
/// Units are fixed: CO2 mole fractions in µmol mol⁻¹, temperature in °C,
/// PAR in µmol m⁻² s⁻¹, vapour pressure deficit and atmospheric pressure
/// in kPa, mesophyll conductance in mol m⁻² s⁻¹. Callers are responsible
/// for converting their inputs beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeafEnvironment {
    /// Ambient CO2 mole fraction (µmol mol⁻¹).
    pub ca: f64,
    /// Leaf temperature (°C).
    pub tleaf: f64,
    /// Photosynthetically active radiation (µmol m⁻² s⁻¹).
    pub par: f64,
    /// Leaf-to-air vapour pressure deficit (kPa).
    pub vpd: f64,
    /// Atmospheric pressure (kPa).
    pub pressure: f64,
    /// Mesophyll conductance (mol m⁻² s⁻¹); `None` means infinite,
    /// i.e. Cc = Ci.
    pub gmeso: Option<f64>,
}

impl Default for LeafEnvironment {
    fn default() -> Self {
        Self {
            ca: 400.0,
            tleaf: 25.0,
            par: 1500.0,
            vpd: 1.5,
            pressure: 101.0,
            gmeso: None,
        }
    }
}

impl LeafEnvironment {
    /// Check that the drivers are physically meaningful.
    pub fn validate(&self) -> LeafGasResult<()> {
        for (name, value, strictly_positive) in [
            ("ca", self.ca, true),
            ("vpd", self.vpd, true),
            ("pressure", self.pressure, true),
            ("par", self.par, false),
        ] {
            if !value.is_finite() || value < 0.0 || (strictly_positive && value == 0.0) {
                return Err(LeafGasError::InvalidParameter(format!(
                    "{} must be {}, got {}",
                    name,
                    if strictly_positive {
                        "positive"
                    } else {
                        "non-negative"
                    },
                    value
                )));
            }
        }
        if !self.tleaf.is_finite() {
            return Err(LeafGasError::InvalidParameter(format!(
                "tleaf must be finite, got {}",
                self.tleaf
            )));
        }
        if let Some(gm) = self.gmeso {
            if !gm.is_finite() || gm <= 0.0 {
                return Err(LeafGasError::InvalidParameter(format!(
                    "gmeso must be positive when given, got {}",
                    gm
                )));
            }
        }
        Ok(())
    }
}

//! Measurement containers for fitting.

use crate::errors::{CalibrateError, CalibrateResult};
use serde::{Deserialize, Serialize};

/// One observation of an A-Ci response curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AciPoint {
    /// Intercellular CO2 mole fraction (µmol mol⁻¹).
    pub ci: f64,
    /// Measured net assimilation (µmol m⁻² s⁻¹).
    pub a_measured: f64,
    /// Leaf temperature (°C); the fit default applies when absent.
    pub tleaf: Option<f64>,
    /// PAR (µmol m⁻² s⁻¹); the fit default applies when absent.
    pub par: Option<f64>,
}

impl AciPoint {
    pub fn new(ci: f64, a_measured: f64) -> Self {
        Self {
            ci,
            a_measured,
            tleaf: None,
            par: None,
        }
    }
}

/// One A-Ci response curve, ordered by increasing Ci.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AciCurve {
    points: Vec<AciPoint>,
}

impl AciCurve {
    /// Build a curve from raw observations; points are sorted by Ci.
    pub fn new(mut points: Vec<AciPoint>) -> CalibrateResult<Self> {
        if points.is_empty() {
            return Err(CalibrateError::InsufficientData(
                "an A-Ci curve needs at least one point".to_string(),
            ));
        }
        for point in &points {
            if !point.ci.is_finite() || point.ci <= 0.0 {
                return Err(CalibrateError::InvalidParameter(format!(
                    "Ci values must be positive and finite, got {}",
                    point.ci
                )));
            }
            if !point.a_measured.is_finite() {
                return Err(CalibrateError::InvalidParameter(format!(
                    "measured A must be finite, got {} at Ci {}",
                    point.a_measured, point.ci
                )));
            }
        }
        points.sort_by(|a, b| a.ci.total_cmp(&b.ci));
        Ok(Self { points })
    }

    /// Build a curve from parallel Ci and A slices.
    pub fn from_arrays(ci: &[f64], a_measured: &[f64]) -> CalibrateResult<Self> {
        if ci.len() != a_measured.len() {
            return Err(CalibrateError::InvalidParameter(format!(
                "ci and a_measured must have the same length, got {} and {}",
                ci.len(),
                a_measured.len()
            )));
        }
        Self::new(
            ci.iter()
                .zip(a_measured)
                .map(|(&ci, &a)| AciPoint::new(ci, a))
                .collect(),
        )
    }

    pub fn points(&self) -> &[AciPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One spot measurement for stomatal-conductance fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GsObservation {
    /// Measured stomatal conductance to water vapour (mol m⁻² s⁻¹).
    pub gs: f64,
    /// Measured net assimilation (µmol m⁻² s⁻¹).
    pub an: f64,
    /// Ambient CO2 mole fraction (µmol mol⁻¹).
    pub ca: f64,
    /// Vapour pressure deficit (kPa).
    pub vpd: f64,
}

impl GsObservation {
    /// Check the observation is usable as a regression point.
    pub fn validate(&self) -> CalibrateResult<()> {
        for (name, value) in [("ca", self.ca), ("vpd", self.vpd)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CalibrateError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !self.gs.is_finite() || !self.an.is_finite() {
            return Err(CalibrateError::InvalidParameter(
                "gs and an must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

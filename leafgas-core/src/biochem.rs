//! Biochemical (demand-side) model of C3 photosynthesis.
//!
//! Implements the Farquhar-von Caemmerer-Berry model: net assimilation is
//! the smoothed minimum of a Rubisco-limited and an electron-transport
//! limited rate, minus dark respiration.
//!
//! The governing equations are:
//!
//! $$ A_c = V_{cmax} \frac{C_c - \Gamma^*}{C_c + K_m} $$
//!
//! $$ A_j = \frac{J}{4} \frac{C_c - \Gamma^*}{C_c + 2\Gamma^*} $$
//!
//! with the electron-transport rate $J$ from the non-rectangular
//! hyperbola of irradiance:
//!
//! $$ \theta_J J^2 - (\alpha Q + J_{max}) J + \alpha Q J_{max} = 0 $$
//!
//! The two limitations are combined through a hyperbolic minimum with
//! curvature just below one, which removes the discontinuous kink at the
//! transition while staying numerically indistinguishable from the true
//! minimum away from it:
//!
//! $$ A_m = \frac{A_c + A_j - \sqrt{(A_c + A_j)^2 - 4\theta A_c A_j}}{2\theta},
//!    \qquad A_n = A_m - R_d $$
//!
//! All functions here are pure: temperature-adjusted kinetics are
//! recomputed per call and never cached or mutated in place.

use crate::errors::{LeafGasError, LeafGasResult};
use crate::temperature::TemperatureCoefficients;
use serde::{Deserialize, Serialize};

/// Which process limits assimilation at the evaluated point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limitation {
    /// Carboxylation (Rubisco) limited; the low-CO2 regime.
    Rubisco,
    /// RuBP-regeneration (electron transport) limited; the high-CO2 regime.
    ElectronTransport,
    /// Cc at or below the compensation point; net uptake is not defined
    /// as a positive rate. Rates still evaluate (non-positive), callers
    /// should treat the value as respiratory.
    BelowCompensation,
}

/// Assimilation rates returned by [`assimilation`].
///
/// All rates in µmol m⁻² s⁻¹. `ac` and `aj` are the gross limited rates;
/// `an` is net of dark respiration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AssimilationRates {
    /// Net assimilation.
    pub an: f64,
    /// Rubisco-limited gross rate.
    pub ac: f64,
    /// Electron-transport-limited gross rate.
    pub aj: f64,
    /// Electron-transport rate J at the given PAR (µmol e⁻ m⁻² s⁻¹).
    pub electron_transport: f64,
    /// Dark respiration at leaf temperature.
    pub rd: f64,
    pub limitation: Limitation,
}

/// Parameters of the biochemical model.
///
/// Capacities are defined at 25 °C and scaled to leaf temperature through
/// the coefficient table. Immutable once constructed; derived values are
/// recomputed per evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiochemParams {
    /// Maximum carboxylation rate at 25 °C
    /// unit: µmol m⁻² s⁻¹
    pub vcmax25: f64,

    /// Maximum electron-transport rate at 25 °C
    /// unit: µmol m⁻² s⁻¹
    pub jmax25: f64,

    /// Dark respiration at 25 °C
    /// unit: µmol m⁻² s⁻¹
    pub rd25: f64,

    /// Quantum yield of electron transport
    /// unit: mol e⁻ mol⁻¹ photons
    /// default: 0.24
    pub alpha: f64,

    /// Curvature of the light response of J
    /// unit: dimensionless
    /// default: 0.85
    pub light_curvature: f64,

    /// Curvature of the Ac/Aj hyperbolic minimum; values closer to one
    /// track the true minimum more tightly
    /// unit: dimensionless
    /// default: 0.9999
    pub curvature: f64,

    /// Temperature-sensitivity coefficient table.
    pub temperature: TemperatureCoefficients,
}

impl BiochemParams {
    /// Create parameters with the default quantum yield, curvatures and
    /// temperature calibration.
    pub fn new(vcmax25: f64, jmax25: f64, rd25: f64) -> LeafGasResult<Self> {
        let params = Self {
            vcmax25,
            jmax25,
            rd25,
            alpha: 0.24,
            light_curvature: 0.85,
            curvature: 0.9999,
            temperature: TemperatureCoefficients::default(),
        };
        params.validate()?;
        Ok(params)
    }

    /// Replace the curvature of the Ac/Aj minimum.
    pub fn with_curvature(mut self, curvature: f64) -> LeafGasResult<Self> {
        self.curvature = curvature;
        self.validate()?;
        Ok(self)
    }

    /// Replace the temperature coefficient table.
    pub fn with_temperature(mut self, table: TemperatureCoefficients) -> LeafGasResult<Self> {
        self.temperature = table;
        self.validate()?;
        Ok(self)
    }

    /// Check that the parameters are physically meaningful.
    pub fn validate(&self) -> LeafGasResult<()> {
        for (name, value) in [("vcmax25", self.vcmax25), ("jmax25", self.jmax25)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(LeafGasError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !self.rd25.is_finite() || self.rd25 < 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "rd25 must be non-negative, got {}",
                self.rd25
            )));
        }
        if !(self.curvature > 0.0 && self.curvature <= 1.0) {
            return Err(LeafGasError::InvalidParameter(format!(
                "curvature must be in (0, 1], got {}",
                self.curvature
            )));
        }
        if !(self.light_curvature > 0.0 && self.light_curvature <= 1.0) {
            return Err(LeafGasError::InvalidParameter(format!(
                "light_curvature must be in (0, 1], got {}",
                self.light_curvature
            )));
        }
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "alpha must be positive, got {}",
                self.alpha
            )));
        }
        self.temperature.validate()?;
        let km = self.temperature.km_at(25.0);
        if km <= 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "effective Km must be positive, got {}",
                km
            )));
        }
        Ok(())
    }

    /// Electron-transport rate J at the given PAR and leaf temperature.
    ///
    /// Smaller root of the non-rectangular hyperbola; the radicand is
    /// non-negative for any curvature in (0, 1].
    pub fn electron_transport(&self, par: f64, tleaf: f64) -> f64 {
        let jmax = self.jmax25 * self.temperature.jmax.scaling(tleaf);
        let theta = self.light_curvature;
        let aq = self.alpha * par;
        let b = aq + jmax;
        let radicand = (b * b - 4.0 * theta * aq * jmax).max(0.0);
        (b - radicand.sqrt()) / (2.0 * theta)
    }
}

/// Smoothed (hyperbolic) minimum of two rates.
///
/// The radicand can dip slightly negative from floating-point cancellation
/// when `x` and `y` are nearly equal; it is clamped at zero.
fn hyperbolic_min(x: f64, y: f64, theta: f64) -> f64 {
    let sum = x + y;
    let radicand = (sum * sum - 4.0 * theta * x * y).max(0.0);
    (sum - radicand.sqrt()) / (2.0 * theta)
}

/// Net and gross assimilation at a chloroplastic CO2 mole fraction.
///
/// # Arguments
///
/// * `cc` - Chloroplastic CO2 mole fraction (µmol mol⁻¹)
/// * `tleaf` - Leaf temperature (°C)
/// * `par` - Photosynthetically active radiation (µmol m⁻² s⁻¹)
/// * `params` - Biochemical parameters
///
/// # Errors
///
/// `InvalidParameter` when the capacities or Michaelis constants are
/// non-positive, or when `cc` is negative. Cc at or below the
/// compensation point is *not* an error: the rates evaluate to
/// non-positive values and the limitation flag is set to
/// [`Limitation::BelowCompensation`].
pub fn assimilation(
    cc: f64,
    tleaf: f64,
    par: f64,
    params: &BiochemParams,
) -> LeafGasResult<AssimilationRates> {
    params.validate()?;
    if !cc.is_finite() || cc < 0.0 {
        return Err(LeafGasError::InvalidParameter(format!(
            "cc must be non-negative, got {}",
            cc
        )));
    }

    let table = &params.temperature;
    let vcmax = params.vcmax25 * table.vcmax.scaling(tleaf);
    let rd = params.rd25 * table.rd.scaling(tleaf);
    let gammastar = table.gammastar_at(tleaf);
    let km = table.km_at(tleaf);

    let j = params.electron_transport(par, tleaf);

    let ac = vcmax * (cc - gammastar) / (cc + km);
    let aj = j / 4.0 * (cc - gammastar) / (cc + 2.0 * gammastar);

    let am = hyperbolic_min(ac, aj, params.curvature);
    let an = am - rd;

    let limitation = if cc <= gammastar {
        Limitation::BelowCompensation
    } else if ac < aj {
        Limitation::Rubisco
    } else {
        Limitation::ElectronTransport
    };

    Ok(AssimilationRates {
        an,
        ac,
        aj,
        electron_transport: j,
        rd,
        limitation,
    })
}

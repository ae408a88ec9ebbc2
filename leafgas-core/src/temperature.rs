//! Temperature responses of the photosynthetic kinetic parameters.
//!
//! Every capacity and Michaelis constant in the biochemical model is
//! defined at 25 °C and scaled to leaf temperature through one of three
//! response shapes:
//!
//! - Arrhenius:
//!   $$f(T) = \exp\left(\frac{E_a (T_K - 298.15)}{298.15 \, R \, T_K}\right)$$
//! - Peaked (modified Arrhenius with high-temperature inhibition):
//!   $$f(T) = f_{Arrh}(T) \cdot
//!     \frac{1 + \exp((298.15 \Delta S - E_d)/(298.15 R))}
//!          {1 + \exp((T_K \Delta S - E_d)/(T_K R))}$$
//! - Q10: $$f(T) = Q_{10}^{(T - 25)/10}$$
//!
//! The coefficient table is plain configuration data so that alternative
//! calibrations can be substituted without touching the solvers; it is
//! deserializable from TOML.

use crate::constants::{GAS_CONSTANT, KELVIN, TREF_C};
use crate::errors::{LeafGasError, LeafGasResult};
use serde::{Deserialize, Serialize};

/// Shape of a single kinetic parameter's temperature response.
///
/// Activation/deactivation energies are in J mol⁻¹, entropy in
/// J mol⁻¹ K⁻¹.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemperatureResponse {
    Arrhenius { ea: f64 },
    Peaked { ea: f64, ed: f64, entropy: f64 },
    Q10 { q10: f64 },
}

impl TemperatureResponse {
    /// Scaling factor relative to the 25 °C reference value.
    ///
    /// All three shapes evaluate to exactly 1.0 at 25 °C.
    pub fn scaling(&self, tleaf: f64) -> f64 {
        let tk = tleaf + KELVIN;
        let tref = TREF_C + KELVIN;
        match *self {
            TemperatureResponse::Arrhenius { ea } => arrhenius(ea, tk, tref),
            TemperatureResponse::Peaked { ea, ed, entropy } => {
                let num = 1.0 + ((tref * entropy - ed) / (tref * GAS_CONSTANT)).exp();
                let den = 1.0 + ((tk * entropy - ed) / (tk * GAS_CONSTANT)).exp();
                arrhenius(ea, tk, tref) * num / den
            }
            TemperatureResponse::Q10 { q10 } => q10.powf((tleaf - TREF_C) / 10.0),
        }
    }
}

fn arrhenius(ea: f64, tk: f64, tref: f64) -> f64 {
    (ea * (tk - tref) / (tref * GAS_CONSTANT * tk)).exp()
}

/// Temperature-sensitivity coefficient table for the biochemical model.
///
/// Holds the response shape for each temperature-dependent quantity plus
/// the 25 °C reference values of the CO2 compensation point and the
/// Rubisco Michaelis constants. The default table follows the
/// Bernacchi et al. (2001) kinetics with the Medlyn et al. (2002)
/// peaked capacities.
/// Scalar reference values are declared ahead of the response tables so
/// the struct serializes cleanly to TOML (values before tables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureCoefficients {
    /// CO2 compensation point in the absence of respiration at 25 °C
    /// unit: µmol mol⁻¹
    pub gammastar25: f64,

    /// Michaelis constant of Rubisco for CO2 at 25 °C
    /// unit: µmol mol⁻¹
    pub kc25: f64,

    /// Michaelis constant of Rubisco for O2 at 25 °C
    /// unit: mmol mol⁻¹
    pub ko25: f64,

    /// Ambient O2 mole fraction
    /// unit: mmol mol⁻¹
    pub oxygen: f64,

    /// Response of the maximum carboxylation rate.
    pub vcmax: TemperatureResponse,

    /// Response of the maximum electron-transport rate.
    pub jmax: TemperatureResponse,

    /// Response of dark respiration.
    pub rd: TemperatureResponse,

    /// Response of the compensation point.
    pub gammastar: TemperatureResponse,

    /// Response of the CO2 Michaelis constant.
    pub kc: TemperatureResponse,

    /// Response of the O2 Michaelis constant.
    pub ko: TemperatureResponse,
}

impl Default for TemperatureCoefficients {
    fn default() -> Self {
        Self {
            gammastar25: 42.75,
            kc25: 404.9,
            ko25: 278.4,
            oxygen: 210.0,
            vcmax: TemperatureResponse::Peaked {
                ea: 58_550.0,
                ed: 200_000.0,
                entropy: 629.26,
            },
            jmax: TemperatureResponse::Peaked {
                ea: 29_680.0,
                ed: 200_000.0,
                entropy: 631.88,
            },
            rd: TemperatureResponse::Q10 { q10: 1.92 },
            gammastar: TemperatureResponse::Arrhenius { ea: 37_830.0 },
            kc: TemperatureResponse::Arrhenius { ea: 79_430.0 },
            ko: TemperatureResponse::Arrhenius { ea: 36_380.0 },
        }
    }
}

impl TemperatureCoefficients {
    /// Load a coefficient table from a TOML document.
    ///
    /// # Example
    ///
    /// ```
    /// use leafgas_core::temperature::TemperatureCoefficients;
    ///
    /// let table = TemperatureCoefficients::from_toml_str(
    ///     r#"
    ///     gammastar25 = 42.75
    ///     kc25 = 404.9
    ///     ko25 = 278.4
    ///     oxygen = 210.0
    ///     vcmax = { type = "peaked", ea = 58550.0, ed = 200000.0, entropy = 629.26 }
    ///     jmax = { type = "peaked", ea = 29680.0, ed = 200000.0, entropy = 631.88 }
    ///     rd = { type = "q10", q10 = 1.92 }
    ///     gammastar = { type = "arrhenius", ea = 37830.0 }
    ///     kc = { type = "arrhenius", ea = 79430.0 }
    ///     ko = { type = "arrhenius", ea = 36380.0 }
    ///     "#,
    /// )
    /// .unwrap();
    /// assert_eq!(table, TemperatureCoefficients::default());
    /// ```
    pub fn from_toml_str(source: &str) -> LeafGasResult<Self> {
        let table: Self = toml::from_str(source)
            .map_err(|e| LeafGasError::InvalidConfiguration(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    /// Check that all reference values are physically meaningful.
    pub fn validate(&self) -> LeafGasResult<()> {
        for (name, value) in [
            ("gammastar25", self.gammastar25),
            ("kc25", self.kc25),
            ("ko25", self.ko25),
            ("oxygen", self.oxygen),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(LeafGasError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Compensation point Γ* at leaf temperature (µmol mol⁻¹).
    pub fn gammastar_at(&self, tleaf: f64) -> f64 {
        self.gammastar25 * self.gammastar.scaling(tleaf)
    }

    /// Effective Michaelis constant `Km = Kc (1 + O / Ko)` at leaf
    /// temperature (µmol mol⁻¹).
    pub fn km_at(&self, tleaf: f64) -> f64 {
        let kc = self.kc25 * self.kc.scaling(tleaf);
        let ko = self.ko25 * self.ko.scaling(tleaf);
        kc * (1.0 + self.oxygen / ko)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_all_responses_are_unity_at_reference() {
        let table = TemperatureCoefficients::default();
        for response in [table.vcmax, table.jmax, table.rd, table.gammastar] {
            assert_relative_eq!(response.scaling(25.0), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_arrhenius_increases_with_temperature() {
        let r = TemperatureResponse::Arrhenius { ea: 37_830.0 };
        assert!(r.scaling(30.0) > 1.0);
        assert!(r.scaling(20.0) < 1.0);
    }

    #[test]
    fn test_peaked_response_declines_at_high_temperature() {
        let r = TemperatureResponse::Peaked {
            ea: 58_550.0,
            ed: 200_000.0,
            entropy: 629.26,
        };
        // The peaked shape must rise towards its optimum and fall beyond it
        let at_35 = r.scaling(35.0);
        let at_45 = r.scaling(45.0);
        assert!(at_35 > 1.0, "Scaling at 35 °C should exceed 1, got {}", at_35);
        assert!(
            at_45 < at_35,
            "Scaling should decline past the optimum: f(45)={} f(35)={}",
            at_45,
            at_35
        );
    }

    #[test]
    fn test_q10_doubles_per_decade_for_q10_of_two() {
        let r = TemperatureResponse::Q10 { q10: 2.0 };
        assert_relative_eq!(r.scaling(35.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(r.scaling(15.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_default_km_at_reference() {
        let table = TemperatureCoefficients::default();
        // Km(25) = 404.9 * (1 + 210/278.4)
        assert_relative_eq!(table.km_at(25.0), 710.3, epsilon = 0.1);
        assert_relative_eq!(table.gammastar_at(25.0), 42.75, epsilon = 1e-12);
    }

    #[test]
    fn test_toml_round_trip() {
        let table = TemperatureCoefficients::default();
        let encoded = toml::to_string(&table).unwrap();
        let decoded = TemperatureCoefficients::from_toml_str(&encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_invalid_reference_value_rejected() {
        let mut table = TemperatureCoefficients::default();
        table.kc25 = -1.0;
        assert!(table.validate().is_err());
    }
}
